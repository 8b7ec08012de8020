//! Table-side ordering for a restaurant: customers sign up by mobile number,
//! browse the menu, fill a cart and send it to the kitchen as an order for
//! their table.

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use log::*;
use r2d2::Pool;

use infra::persistence::{DocumentConnectionManager, Storage};

pub mod accounts;
pub mod cart;
pub mod config;
pub mod menu;
pub mod orders;
pub mod services;
pub mod session;

#[cfg(test)]
mod test;

pub struct Tableside<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

impl Tableside<DocumentConnectionManager> {
    pub fn new(config: &config::Config) -> Result<Self> {
        let db = config.db.build()?;
        Ok(Tableside::with_pool(db))
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Tableside<M> {
    pub fn with_pool(db: Pool<M>) -> Self {
        Tableside { db }
    }

    pub fn setup(&self) -> Result<()> {
        debug!("Init schema");
        self.db.get()?.setup().context("Setup persistence")?;
        Ok(())
    }

    pub fn menu(&self) -> menu::Menu<M> {
        menu::Menu::new(self.db.clone())
    }

    pub fn accounts(&self) -> accounts::Accounts<M> {
        accounts::Accounts::new(self.db.clone())
    }

    pub fn orders(&self) -> orders::Orders<M> {
        orders::Orders::new(self.db.clone())
    }

    /// An empty cart; call `Cart::load` before using it.
    pub fn cart(&self) -> cart::Cart<M> {
        cart::Cart::new(self.db.clone())
    }
}

/// Current time at the precision documents store it.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
