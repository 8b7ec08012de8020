use std::collections::HashSet;
use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use log::*;
use r2d2::Pool;
use r2d2_postgres::{PostgresConnectionManager, TlsMode};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};
use infra::memory::{MemoryConnectionManager, MemoryDocuments};
use infra::persistence::{DocumentConnectionManager, Documents, Query, Storage};

use crate::menu::FoodItem;

pub(crate) fn pool() -> Pool<MemoryConnectionManager> {
    r2d2::Pool::builder()
        .max_size(8)
        .build(MemoryConnectionManager::new())
        .expect("memory pool")
}

/// Stores a menu item with the given prices under a fresh id.
pub(crate) fn food<D: Storage>(docs: &D, name: &str, full: i64, half: i64) -> FoodItem {
    let mut food = FoodItem {
        meta: DocMeta::default(),
        name: name.to_string(),
        description: format!("A plate of {}", name),
        category: None,
        image_url: String::new(),
        is_vegetarian: false,
        full_portion_price: Decimal::from(full),
        half_portion_price: Decimal::from(half),
    };
    docs.create(&mut food).expect("create food");
    food
}

/// Shared switches for a `FaultyConnectionManager`'s connections.
#[derive(Debug, Clone, Default)]
pub(crate) struct Faults(Arc<FaultState>);

#[derive(Debug, Default)]
struct FaultState {
    writes: AtomicUsize,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    fail_deletes: Mutex<HashSet<String>>,
}

#[derive(Debug)]
pub(crate) struct FaultyDocuments {
    inner: MemoryDocuments,
    faults: Faults,
}

#[derive(Debug)]
pub(crate) struct FaultyConnectionManager {
    docs: MemoryDocuments,
    faults: Faults,
}

pub(crate) fn faulty_pool() -> (Pool<FaultyConnectionManager>, Faults) {
    let faults = Faults::default();
    let manager = FaultyConnectionManager {
        docs: MemoryDocuments::new(),
        faults: faults.clone(),
    };
    let pool = r2d2::Pool::builder()
        .max_size(8)
        .build(manager)
        .expect("faulty pool");
    (pool, faults)
}

impl Faults {
    /// Successful and attempted writes of any kind.
    pub(crate) fn writes(&self) -> usize {
        self.0.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_creates(&self, fail: bool) {
        self.0.fail_creates.store(fail, Ordering::SeqCst)
    }

    pub(crate) fn fail_updates(&self, fail: bool) {
        self.0.fail_updates.store(fail, Ordering::SeqCst)
    }

    pub(crate) fn fail_delete<T: Entity>(&self, id: Id<T>) {
        self.0
            .fail_deletes
            .lock()
            .expect("lock")
            .insert(id.to_string());
    }

    fn wrote(&self) {
        self.0.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Storage for FaultyDocuments {
    fn setup(&self) -> Result<()> {
        self.inner.setup()
    }

    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        self.inner.load(id)
    }

    fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        self.faults.wrote();
        self.inner.save(document)
    }

    fn create<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<Id<D>> {
        self.faults.wrote();
        if self.faults.0.fail_creates.load(Ordering::SeqCst) {
            bail!("injected failure creating {}", D::PREFIX);
        }
        self.inner.create(document)
    }

    fn update_fields<D: Entity>(&self, id: &Id<D>, fields: Map<String, Value>) -> Result<()> {
        self.faults.wrote();
        if self.faults.0.fail_updates.load(Ordering::SeqCst) {
            bail!("injected failure updating {}", id);
        }
        self.inner.update_fields(id, fields)
    }

    fn delete<D: Entity>(&self, id: &Id<D>) -> Result<()> {
        self.faults.wrote();
        let doomed = self
            .faults
            .0
            .fail_deletes
            .lock()
            .expect("lock")
            .contains(&id.to_string());
        if doomed {
            bail!("injected failure deleting {}", id);
        }
        self.inner.delete(id)
    }

    fn query<D: DeserializeOwned + Entity>(&self, query: &Query<D>) -> Result<Vec<D>> {
        self.inner.query(query)
    }
}

impl r2d2::ManageConnection for FaultyConnectionManager {
    type Connection = FaultyDocuments;
    type Error = Infallible;

    fn connect(&self) -> Result<FaultyDocuments, Infallible> {
        Ok(FaultyDocuments {
            inner: self.docs.clone(),
            faults: self.faults.clone(),
        })
    }

    fn is_valid(&self, _: &mut FaultyDocuments) -> Result<(), Infallible> {
        Ok(())
    }

    fn has_broken(&self, _: &mut FaultyDocuments) -> bool {
        false
    }
}

#[derive(Debug)]
struct UseTempSchema(String);

impl r2d2::CustomizeConnection<Documents, postgres::Error> for UseTempSchema {
    fn on_acquire(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
        loop {
            let t = conn.get_ref().transaction()?;
            let nschemas: i64 = {
                let rows = t.query(
                    "SELECT count(*) from pg_catalog.pg_namespace n where n.nspname = $1",
                    &[&self.0],
                )?;
                let row = rows.get(0);
                row.get(0)
            };
            debug!("Number of {} schemas:{}", self.0, nschemas);
            if nschemas == 0 {
                match t.execute(&format!("CREATE SCHEMA \"{}\"", self.0), &[]) {
                    Ok(_) => {
                        t.commit()?;
                        break;
                    }
                    Err(e) => warn!("Error creating schema:{:?}: {:?}", self.0, e),
                }
            } else {
                break;
            }
        }
        conn.get_ref()
            .execute(&format!("SET search_path TO \"{}\"", self.0), &[])?;
        Ok(())
    }
}

/// A pool on the database named by `$POSTGRES_URL`, confined to a freshly
/// emptied schema.
pub(crate) fn postgres_pool(schema: &str) -> Result<Pool<DocumentConnectionManager>> {
    let url = env::var("POSTGRES_URL").context("$POSTGRES_URL")?;
    debug!("Use schema name: {}", schema);
    let manager = PostgresConnectionManager::new(&*url, TlsMode::None)?;

    let pool = r2d2::Pool::builder()
        .max_size(4)
        .connection_customizer(Box::new(UseTempSchema(schema.to_string())))
        .build(DocumentConnectionManager::new(manager))?;

    let conn = pool.get()?;
    cleanup(conn.get_ref(), schema)?;
    conn.setup()?;

    Ok(pool)
}

fn cleanup(conn: &postgres::Connection, schema: &str) -> Result<()> {
    let t = conn.transaction()?;
    debug!("Clean old tables in {}", schema);
    for row in t
        .query(
            "SELECT n.nspname, c.relname \
             FROM pg_catalog.pg_class c \
             LEFT JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 and c.relkind = 'r'",
            &[&schema],
        )?
        .iter()
    {
        let schema = row.get::<_, String>(0);
        let table = row.get::<_, String>(1);
        t.execute(&format!("DROP TABLE {}.{}", schema, table), &[])?;
    }
    t.commit()?;
    Ok(())
}
