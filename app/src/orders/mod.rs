use std::thread;

use anyhow::{anyhow, Context, Result};
use err_derive::Error;
use log::*;
use r2d2::Pool;
use rust_decimal::Decimal;

use infra::documents::DocMeta;
use infra::ids::Id;
use infra::persistence::{Direction, Query, Storage};

use crate::accounts::User;
use crate::cart::CartLine;
use crate::menu::MenuCache;
use crate::services::{Queryable, Request};

mod models;

pub use self::models::{Order, OrderItem, OrderStatus, PortionRow};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error(display = "enter a table number")]
    BlankTable,
    #[error(display = "the cart is empty")]
    EmptyCart,
    #[error(display = "sign in to place an order")]
    NotAuthenticated,
    #[error(display = "none of the items in the cart are available")]
    NothingOrderable,
}

/// What checking out did. The order always exists; `leftover` names the
/// cart lines that could not be cleared afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Placed {
    pub order_id: Id<Order>,
    pub total: Decimal,
    pub items: Vec<OrderItem>,
    pub leftover: Vec<Id<CartLine>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderHistory {
    pub user: Id<User>,
}

#[derive(Debug)]
pub struct Orders<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

/// Writes an order for `lines` and then clears them from the store.
///
/// Nothing is written unless the table is named, the cart has lines, a
/// customer is signed in and at least one line's menu item is known. Lines
/// for unknown items are left out of the order but are still cleared. The
/// clearing happens after the order is written and each line is deleted on
/// its own; lines whose delete failed are reported in `Placed::leftover`.
pub fn place<M, D>(
    db: &Pool<M>,
    user: Option<Id<User>>,
    table: &str,
    lines: &[CartLine],
    cache: &MenuCache,
) -> Result<Placed>
where
    M: r2d2::ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    let table = table.trim();
    if table.is_empty() {
        return Err(CheckoutError::BlankTable.into());
    }
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart.into());
    }
    let user = user.ok_or(CheckoutError::NotAuthenticated)?;

    let items = lines
        .iter()
        .filter_map(|l| match cache.get(&l.product_id) {
            Some(food) => Some(OrderItem::snapshot(l, food)),
            None => {
                warn!("Leaving {} out of the order; item unknown", l.product_id);
                None
            }
        })
        .collect::<Vec<_>>();
    if items.is_empty() {
        return Err(CheckoutError::NothingOrderable.into());
    }
    let total: Decimal = items.iter().map(OrderItem::subtotal).sum();

    let mut order = Order {
        meta: DocMeta::default(),
        user_id: user,
        total_amount: total,
        order_date: crate::now(),
        status: OrderStatus::Pending,
        table_number: table.to_string(),
        items,
    };
    let order_id = db.get()?.create(&mut order).context("write order")?;
    info!(
        "Placed order {} for {} at table {}: {} items, total {}",
        order_id,
        user,
        table,
        order.items.len(),
        total
    );

    let leftover = clear_lines(db, lines);
    if !leftover.is_empty() {
        warn!(
            "Order {} placed but {} cart lines remain",
            order_id,
            leftover.len()
        );
    }

    Ok(Placed {
        order_id,
        total,
        items: order.items,
        leftover,
    })
}

fn clear_lines<M, D>(db: &Pool<M>, lines: &[CartLine]) -> Vec<Id<CartLine>>
where
    M: r2d2::ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    let outcomes = thread::scope(|s| {
        let deletes = lines
            .iter()
            .map(|l| {
                let id = l.meta.id;
                let handle = s.spawn(move || -> Result<()> { db.get()?.delete(&id) });
                (id, handle)
            })
            .collect::<Vec<_>>();
        deletes
            .into_iter()
            .map(|(id, handle)| {
                let res = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("delete of {} panicked", id)));
                (id, res)
            })
            .collect::<Vec<_>>()
    });

    outcomes
        .into_iter()
        .filter_map(|(id, res)| match res {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to clear cart line {}: {:?}", id, e);
                Some(id)
            }
        })
        .collect()
}

impl Request for OrderHistory {
    type Resp = Vec<Order>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Orders<M> {
    pub fn new(db: Pool<M>) -> Self {
        Orders { db }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<OrderHistory> for Orders<M>
{
    fn query(&self, req: OrderHistory) -> Result<Vec<Order>> {
        let q = Query::<Order>::all()
            .where_eq("userId", req.user)?
            .order_by("orderDate", Direction::Descending);
        let orders = self.db.get()?.query(&q).context("load orders")?;
        debug!("Found {} orders for {}", orders.len(), req.user);
        Ok(orders)
    }
}

impl<M: r2d2::ManageConnection> Clone for Orders<M> {
    fn clone(&self) -> Self {
        let db = self.db.clone();
        Orders { db }
    }
}
