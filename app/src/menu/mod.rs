use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;

use infra::ids::Id;
use infra::persistence::{Query, Storage};

use crate::services::{Queryable, Request};

mod cache;
mod models;

pub use self::cache::{CachedFood, MenuCache};
pub use self::models::{FoodItem, MenuEntry, Portion, UNCATEGORIZED};

/// Menu items grouped by category name, categories in name order.
pub type Listing = BTreeMap<String, Vec<FoodItem>>;

#[derive(Debug)]
pub struct Menu<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowMenu;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMenu {
    pub term: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowFood {
    pub id: Id<FoodItem>,
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Menu<M> {
    pub fn new(db: Pool<M>) -> Self {
        Menu { db }
    }

    /// Creates or overwrites menu items, keyed by name.
    pub fn import<I: IntoIterator<Item = MenuEntry>>(&self, entries: I) -> Result<Vec<Id<FoodItem>>> {
        let docs = self.db.get()?;
        let mut ids = Vec::new();
        for entry in entries {
            let id = Id::hashed(entry.name.as_str());
            let mut food = match docs.load::<FoodItem>(&id).context("load food")? {
                Some(mut food) => {
                    food.apply(entry);
                    food
                }
                None => FoodItem::from_entry(id, entry),
            };
            docs.save(&mut food)
                .with_context(|| format!("save food {:?}", food.name))?;
            debug!("Saved food {}: {:?}", id, food.name);
            ids.push(id);
        }
        info!("Imported {} menu items", ids.len());
        Ok(ids)
    }

    fn all_items(&self) -> Result<Vec<FoodItem>> {
        let items = self
            .db
            .get()?
            .query(&Query::<FoodItem>::all())
            .context("load menu")?;
        Ok(items)
    }
}

fn group(items: Vec<FoodItem>) -> Listing {
    let mut listing = Listing::new();
    for item in items {
        listing
            .entry(item.category().to_string())
            .or_insert_with(Vec::new)
            .push(item);
    }
    for items in listing.values_mut() {
        items.sort_by(|a, b| a.name.cmp(&b.name));
    }
    listing
}

impl Request for ShowMenu {
    type Resp = Listing;
}

impl Request for SearchMenu {
    type Resp = Listing;
}

impl Request for ShowFood {
    type Resp = Option<FoodItem>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ShowMenu>
    for Menu<M>
{
    fn query(&self, _: ShowMenu) -> Result<Listing> {
        let items = self.all_items()?;
        debug!("Menu has {} items", items.len());
        Ok(group(items))
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<SearchMenu> for Menu<M>
{
    fn query(&self, req: SearchMenu) -> Result<Listing> {
        let items = self
            .all_items()?
            .into_iter()
            .filter(|item| item.matches(&req.term))
            .collect::<Vec<_>>();
        debug!("Search for {:?} matched {} items", req.term, items.len());
        Ok(group(items))
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ShowFood>
    for Menu<M>
{
    fn query(&self, req: ShowFood) -> Result<Option<FoodItem>> {
        let food = self.db.get()?.load(&req.id).context("load food")?;
        debug!("Load {} -> found:{}", req.id, food.is_some());
        Ok(food)
    }
}

impl<M: r2d2::ManageConnection> Clone for Menu<M> {
    fn clone(&self) -> Self {
        let db = self.db.clone();
        Menu { db }
    }
}
