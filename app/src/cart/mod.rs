//! A signed-in customer's cart, as seen by one screen.
//!
//! A `Cart` is built fresh whenever a cart needs showing and dropped
//! afterwards. It keeps its own copy of the customer's lines, the menu items
//! they refer to and the running total. Every change goes to the store first.
//! The local copy is only touched once the store has accepted the write, so
//! a failed write leaves the cart exactly as it was.

use anyhow::{Context, Result};
use err_derive::Error;
use log::*;
use r2d2::Pool;
use rust_decimal::Decimal;
use serde_json::{json, Map};

use infra::ids::Id;
use infra::persistence::{Direction, Query, Storage};

use crate::accounts::User;
use crate::menu::{FoodItem, MenuCache, Portion};
use crate::orders::{self, Placed};

mod models;

pub use self::models::{CartLine, CartRow, Confirm, QuantityChange, Selection, Step};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    #[error(display = "sign in to use the cart")]
    NotAuthenticated,
    #[error(display = "no cart line {}", _0)]
    UnknownLine(String),
    #[error(display = "choose at least one portion")]
    NothingSelected,
    #[error(display = "{} portion is not offered for {}", _0, _1)]
    PortionUnavailable(Portion, String),
}

#[derive(Debug)]
pub struct Cart<M: r2d2::ManageConnection> {
    db: Pool<M>,
    user: Option<Id<User>>,
    lines: Vec<CartLine>,
    cache: MenuCache,
    total: Decimal,
}

/// Sum of every line's subtotal at cached prices. Lines whose menu item is
/// not cached are left out.
pub fn compute_total(lines: &[CartLine], cache: &MenuCache) -> Decimal {
    lines
        .iter()
        .filter_map(|l| cache.get(&l.product_id).map(|food| l.subtotal(food)))
        .sum()
}

const UPDATED_AT: &str = "updatedAt";

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Cart<M> {
    pub fn new(db: Pool<M>) -> Self {
        Cart {
            db,
            user: None,
            lines: Vec::new(),
            cache: MenuCache::new(),
            total: Decimal::ZERO,
        }
    }

    /// Fetches the customer's lines and the menu items they refer to. With
    /// nobody signed in the cart is emptied and the load refused.
    pub fn load(&mut self, user: Option<Id<User>>) -> Result<&[CartLine]> {
        let user = match user {
            Some(user) => user,
            None => {
                self.reset();
                self.user = None;
                return Err(CartError::NotAuthenticated.into());
            }
        };

        let docs = self.db.get()?;
        let q = Query::<CartLine>::all()
            .where_eq("userId", user)?
            .order_by("addedAt", Direction::Ascending);
        let lines = docs.query(&q).context("load cart")?;
        debug!("Loaded {} cart lines for {}", lines.len(), user);

        self.cache
            .ensure_loaded(&*docs, lines.iter().map(|l| l.product_id));
        self.user = Some(user);
        self.lines = lines;
        self.recompute();
        Ok(&self.lines)
    }

    pub fn user(&self) -> Option<Id<User>> {
        self.user
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn cache(&self) -> &MenuCache {
        &self.cache
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines that can be shown, in cart order. Lines for unknown menu items
    /// are skipped.
    pub fn rows(&self) -> Vec<CartRow> {
        self.lines
            .iter()
            .filter_map(|l| {
                let food = self.cache.get(&l.product_id)?;
                Some(CartRow {
                    line: l.meta.id,
                    product: l.product_id,
                    name: food.name.clone(),
                    image_url: food.image_url.clone(),
                    full_qty: l.full_portion_qty,
                    full_price: food.full_price,
                    half_qty: l.half_portion_qty,
                    half_price: food.half_price,
                    subtotal: l.subtotal(food),
                })
            })
            .collect()
    }

    /// Moves one portion's quantity by a single step, never below zero. A
    /// line left with nothing in it is deleted rather than saved.
    pub fn change_quantity(
        &mut self,
        line: Id<CartLine>,
        portion: Portion,
        step: Step,
    ) -> Result<QuantityChange> {
        let idx = self.position(line)?;
        let current = &self.lines[idx];
        let qty = step.apply(current.quantity(portion));
        let other = current.quantity(portion.other());

        if qty == 0 && other == 0 {
            self.db
                .get()?
                .delete(&line)
                .with_context(|| format!("delete cart line {}", line))?;
            info!("Removed emptied cart line {}", line);
            self.lines.remove(idx);
            self.recompute();
            return Ok(QuantityChange::Removed);
        }

        let now = crate::now();
        let mut fields = Map::new();
        fields.insert(portion.quantity_field().to_string(), json!(qty));
        fields.insert(UPDATED_AT.to_string(), json!(now.timestamp_millis()));
        self.db
            .get()?
            .update_fields(&line, fields)
            .with_context(|| format!("update cart line {}", line))?;

        let current = &mut self.lines[idx];
        current.set_quantity(portion, qty);
        current.updated_at = now;
        debug!(
            "Cart line {} now full:{} half:{}",
            line, current.full_portion_qty, current.half_portion_qty
        );
        let change = QuantityChange::Updated {
            full: current.full_portion_qty,
            half: current.half_portion_qty,
        };
        self.recompute();
        Ok(change)
    }

    /// Deletes a line once the customer agrees. Returns whether anything was
    /// removed.
    pub fn remove_line(&mut self, line: Id<CartLine>, confirm: &dyn Confirm) -> Result<bool> {
        let idx = self.position(line)?;
        let name = self
            .cache
            .get(&self.lines[idx].product_id)
            .map(|f| f.name.as_str())
            .unwrap_or("this item");
        if !confirm.confirm(&format!("Remove {} from your cart?", name)) {
            debug!("Removal of {} declined", line);
            return Ok(false);
        }

        self.db
            .get()?
            .delete(&line)
            .with_context(|| format!("delete cart line {}", line))?;
        info!("Removed cart line {}", line);
        self.lines.remove(idx);
        self.recompute();
        Ok(true)
    }

    /// Puts the selected portions of `food` in the cart, topping up the
    /// existing line for that item if there is one.
    pub fn add(&mut self, food: &FoodItem, selection: Selection) -> Result<Id<CartLine>> {
        let user = self.user.ok_or(CartError::NotAuthenticated)?;
        if selection.is_empty() {
            return Err(CartError::NothingSelected.into());
        }
        for &portion in Portion::ALL.iter() {
            if selection.quantity(portion) > 0 && !food.offers(portion) {
                return Err(CartError::PortionUnavailable(portion, food.name.clone()).into());
            }
        }

        let docs = self.db.get()?;
        let q = Query::<CartLine>::all()
            .where_eq("userId", user)?
            .where_eq("productId", food.meta.id)?;
        let existing = docs
            .query(&q)
            .context("find cart line")?
            .into_iter()
            .next();
        let now = crate::now();

        let line = match existing {
            Some(mut line) => {
                let full = line.full_portion_qty.saturating_add(selection.full);
                let half = line.half_portion_qty.saturating_add(selection.half);
                let mut fields = Map::new();
                fields.insert(Portion::Full.quantity_field().to_string(), json!(full));
                fields.insert(Portion::Half.quantity_field().to_string(), json!(half));
                fields.insert(UPDATED_AT.to_string(), json!(now.timestamp_millis()));
                docs.update_fields(&line.meta.id, fields)
                    .context("top up cart line")?;
                line.full_portion_qty = full;
                line.half_portion_qty = half;
                line.updated_at = now;
                info!("Topped up cart line {} with {:?}", line.meta.id, selection);
                line
            }
            None => {
                let mut line = CartLine::new(user, food.meta.id, selection, now);
                docs.create(&mut line).context("create cart line")?;
                info!("Added {} to cart as {}", food.meta.id, line.meta.id);
                line
            }
        };

        let id = line.meta.id;
        match self.lines.iter_mut().find(|l| l.meta.id == id) {
            Some(l) => *l = line,
            None => self.lines.push(line),
        }
        self.cache.insert(food);
        self.recompute();
        Ok(id)
    }

    /// Turns the cart into an order for `table`. Lines that could not be
    /// cleared afterwards stay in the cart and are listed in the outcome.
    pub fn checkout(&mut self, table: &str) -> Result<Placed> {
        let placed = orders::place(&self.db, self.user, table, &self.lines, &self.cache)?;
        self.lines.retain(|l| placed.leftover.contains(&l.meta.id));
        self.recompute();
        Ok(placed)
    }

    fn position(&self, line: Id<CartLine>) -> Result<usize> {
        self.lines
            .iter()
            .position(|l| l.meta.id == line)
            .ok_or_else(|| CartError::UnknownLine(line.to_string()).into())
    }

    fn recompute(&mut self) {
        self.total = compute_total(&self.lines, &self.cache);
    }

    fn reset(&mut self) {
        self.lines.clear();
        self.total = Decimal::ZERO;
    }
}
