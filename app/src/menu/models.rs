use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

/// One of the two serving sizes a dish is sold in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Portion {
    Full,
    Half,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    #[serde(flatten)]
    pub meta: DocMeta<FoodItem>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub is_vegetarian: bool,
    #[serde(default)]
    pub full_portion_price: Decimal,
    #[serde(default)]
    pub half_portion_price: Decimal,
}

/// A menu item as written in an import file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MenuEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub vegetarian: bool,
    #[serde(default)]
    pub full_price: Decimal,
    #[serde(default)]
    pub half_price: Decimal,
}

pub const UNCATEGORIZED: &str = "Uncategorized";

impl Portion {
    pub const ALL: [Portion; 2] = [Portion::Full, Portion::Half];

    pub fn other(self) -> Portion {
        match self {
            Portion::Full => Portion::Half,
            Portion::Half => Portion::Full,
        }
    }

    /// Name of the matching quantity field on a cart line document.
    pub(crate) fn quantity_field(self) -> &'static str {
        match self {
            Portion::Full => "fullPortionQty",
            Portion::Half => "halfPortionQty",
        }
    }
}

impl fmt::Display for Portion {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Portion::Full => write!(fmt, "full"),
            Portion::Half => write!(fmt, "half"),
        }
    }
}

impl FromStr for Portion {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(Portion::Full),
            "half" => Ok(Portion::Half),
            other => bail!("unknown portion {:?}; expected full or half", other),
        }
    }
}

impl FoodItem {
    pub fn price(&self, portion: Portion) -> Decimal {
        match portion {
            Portion::Full => self.full_portion_price,
            Portion::Half => self.half_portion_price,
        }
    }

    /// A portion with no price is not on sale.
    pub fn offers(&self, portion: Portion) -> bool {
        self.price(portion) > Decimal::ZERO
    }

    pub fn category(&self) -> &str {
        match self.category.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => UNCATEGORIZED,
        }
    }

    pub(super) fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.name.to_lowercase().contains(&term) || self.description.to_lowercase().contains(&term)
    }

    pub(super) fn from_entry(id: Id<FoodItem>, entry: MenuEntry) -> Self {
        let mut food = FoodItem {
            meta: DocMeta::new_with_id(id),
            name: String::new(),
            description: String::new(),
            category: None,
            image_url: String::new(),
            is_vegetarian: false,
            full_portion_price: Decimal::ZERO,
            half_portion_price: Decimal::ZERO,
        };
        food.apply(entry);
        food
    }

    pub(super) fn apply(&mut self, entry: MenuEntry) {
        self.name = entry.name;
        self.description = entry.description;
        self.category = entry.category;
        self.image_url = entry.image_url;
        self.is_vegetarian = entry.vegetarian;
        self.full_portion_price = entry.full_price;
        self.half_portion_price = entry.half_price;
    }
}

impl Entity for FoodItem {
    const PREFIX: &'static str = "food";
}

impl HasMeta for FoodItem {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}
