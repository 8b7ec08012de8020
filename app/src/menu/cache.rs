use std::collections::HashMap;

use log::*;
use rust_decimal::Decimal;

use infra::ids::Id;
use infra::persistence::Storage;

use super::models::{FoodItem, Portion};

const UNKNOWN_NAME: &str = "Unknown";

/// The fields of a menu item a cart needs to price and show a line.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFood {
    pub name: String,
    pub image_url: String,
    pub full_price: Decimal,
    pub half_price: Decimal,
}

/// Read-through cache of menu items for the lifetime of one cart. Entries
/// are never refreshed; an id that could not be fetched is simply absent.
#[derive(Debug, Default, Clone)]
pub struct MenuCache {
    entries: HashMap<Id<FoodItem>, CachedFood>,
}

impl CachedFood {
    pub fn price(&self, portion: Portion) -> Decimal {
        match portion {
            Portion::Full => self.full_price,
            Portion::Half => self.half_price,
        }
    }
}

impl From<&FoodItem> for CachedFood {
    fn from(food: &FoodItem) -> Self {
        let name = if food.name.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            food.name.clone()
        };
        CachedFood {
            name,
            image_url: food.image_url.clone(),
            full_price: food.full_portion_price,
            half_price: food.half_portion_price,
        }
    }
}

impl MenuCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Id<FoodItem>) -> Option<&CachedFood> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Id<FoodItem>) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, food: &FoodItem) {
        self.entries.insert(food.meta.id, CachedFood::from(food));
    }

    /// Fetches every id not already cached. Missing items and failed
    /// fetches are logged and skipped; nothing is reported to the caller.
    pub fn ensure_loaded<D, I>(&mut self, docs: &D, ids: I)
    where
        D: Storage,
        I: IntoIterator<Item = Id<FoodItem>>,
    {
        for id in ids {
            if self.contains(&id) {
                continue;
            }
            match docs.load::<FoodItem>(&id) {
                Ok(Some(food)) => {
                    debug!("Cached {}: {:?}", id, food.name);
                    self.insert(&food);
                }
                Ok(None) => error!("Food document not found for {}", id),
                Err(e) => error!("Failed to fetch food details for {}: {:?}", id, e),
            }
        }
    }
}
