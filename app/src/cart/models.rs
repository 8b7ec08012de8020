use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::accounts::User;
use crate::menu::{CachedFood, FoodItem, Portion};

/// One customer's pending selection of one menu item. There should be at
/// most one line per customer and item, and never one with both quantities
/// at zero.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(flatten)]
    pub meta: DocMeta<CartLine>,
    pub user_id: Id<User>,
    pub product_id: Id<FoodItem>,
    #[serde(default)]
    pub full_portion_qty: u32,
    #[serde(default)]
    pub half_portion_qty: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Quantities picked on a menu item's page before adding it to the cart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub full: u32,
    pub half: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    Updated { full: u32, half: u32 },
    Removed,
}

/// Asks the customer to approve something destructive.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// A cart line joined with its menu item, ready to show.
#[derive(Debug, Clone, PartialEq)]
pub struct CartRow {
    pub line: Id<CartLine>,
    pub product: Id<FoodItem>,
    pub name: String,
    pub image_url: String,
    pub full_qty: u32,
    pub full_price: Decimal,
    pub half_qty: u32,
    pub half_price: Decimal,
    pub subtotal: Decimal,
}

impl CartLine {
    pub fn new(
        user_id: Id<User>,
        product_id: Id<FoodItem>,
        selection: Selection,
        now: DateTime<Utc>,
    ) -> Self {
        CartLine {
            meta: DocMeta::default(),
            user_id,
            product_id,
            full_portion_qty: selection.full,
            half_portion_qty: selection.half,
            added_at: now,
            updated_at: now,
        }
    }

    pub fn quantity(&self, portion: Portion) -> u32 {
        match portion {
            Portion::Full => self.full_portion_qty,
            Portion::Half => self.half_portion_qty,
        }
    }

    pub(crate) fn set_quantity(&mut self, portion: Portion, qty: u32) {
        match portion {
            Portion::Full => self.full_portion_qty = qty,
            Portion::Half => self.half_portion_qty = qty,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.full_portion_qty == 0 && self.half_portion_qty == 0
    }

    pub fn subtotal(&self, food: &CachedFood) -> Decimal {
        Decimal::from(self.full_portion_qty) * food.full_price
            + Decimal::from(self.half_portion_qty) * food.half_price
    }
}

impl Entity for CartLine {
    const PREFIX: &'static str = "cart";
}

impl HasMeta for CartLine {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.full == 0 && self.half == 0
    }

    pub fn quantity(&self, portion: Portion) -> u32 {
        match portion {
            Portion::Full => self.full,
            Portion::Half => self.half,
        }
    }

    /// What the selection would cost at the item's current prices.
    pub fn total(&self, food: &FoodItem) -> Decimal {
        Portion::ALL
            .iter()
            .map(|&p| Decimal::from(self.quantity(p)) * food.price(p))
            .sum()
    }
}

impl Step {
    pub fn apply(self, qty: u32) -> u32 {
        match self {
            Step::Increment => qty.saturating_add(1),
            Step::Decrement => qty.saturating_sub(1),
        }
    }
}

impl FromStr for Step {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "+" | "inc" | "up" => Ok(Step::Increment),
            "-" | "dec" | "down" => Ok(Step::Decrement),
            other => bail!("unknown step {:?}; expected + or -", other),
        }
    }
}
