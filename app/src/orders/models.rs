use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::accounts::User;
use crate::cart::CartLine;
use crate::menu::{CachedFood, FoodItem, Portion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
}

/// A placed order. Items carry the names and prices in force when the order
/// was placed, so later menu changes never alter it. Orders are not updated
/// once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(flatten)]
    pub meta: DocMeta<Order>,
    pub user_id: Id<User>,
    pub total_amount: Decimal,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub table_number: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Id<FoodItem>,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    pub full_portion_price: Decimal,
    pub full_portion_qty: u32,
    pub half_portion_price: Decimal,
    pub half_portion_qty: u32,
}

/// One portion of an item as printed on a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortionRow {
    pub portion: Portion,
    pub qty: u32,
    pub price: Decimal,
    pub amount: Decimal,
}

impl Order {
    /// Short, human friendly reference for the order.
    pub fn reference(&self) -> String {
        self.meta.id.short().to_uppercase()
    }
}

impl OrderItem {
    pub(super) fn snapshot(line: &CartLine, food: &CachedFood) -> Self {
        OrderItem {
            product_id: line.product_id,
            name: food.name.clone(),
            image_url: food.image_url.clone(),
            full_portion_price: food.full_price,
            full_portion_qty: line.full_portion_qty,
            half_portion_price: food.half_price,
            half_portion_qty: line.half_portion_qty,
        }
    }

    pub fn quantity(&self, portion: Portion) -> u32 {
        match portion {
            Portion::Full => self.full_portion_qty,
            Portion::Half => self.half_portion_qty,
        }
    }

    pub fn price(&self, portion: Portion) -> Decimal {
        match portion {
            Portion::Full => self.full_portion_price,
            Portion::Half => self.half_portion_price,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.rows().iter().map(|r| r.amount).sum()
    }

    /// Portions actually ordered, full first.
    pub fn rows(&self) -> Vec<PortionRow> {
        Portion::ALL
            .iter()
            .filter(|&&p| self.quantity(p) > 0)
            .map(|&portion| {
                let qty = self.quantity(portion);
                let price = self.price(portion);
                PortionRow {
                    portion,
                    qty,
                    price,
                    amount: Decimal::from(qty) * price,
                }
            })
            .collect()
    }
}

impl Entity for Order {
    const PREFIX: &'static str = "order";
}

impl HasMeta for Order {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}
