//! A process-local document store. Every connection handed out by one
//! `MemoryConnectionManager` sees the same documents.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use log::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id, IdGen};
use crate::persistence::{ConcurrencyError, NotFound, Query, Storage};

const VERSION_FIELD: &str = "_version";

#[derive(Debug, Default)]
struct Shelf {
    docs: BTreeMap<String, Stored>,
    last_version: u64,
}

#[derive(Debug, Clone)]
struct Stored {
    collection: &'static str,
    body: Value,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDocuments {
    shelf: Arc<Mutex<Shelf>>,
    idgen: IdGen,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionManager {
    docs: MemoryDocuments,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    fn shelf(&self) -> Result<MutexGuard<Shelf>> {
        self.shelf
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        let key = document.meta().id.to_string();
        let mut body = serde_json::to_value(&*document)?;
        let mut shelf = self.shelf()?;

        let expected = document.meta().version.clone();
        let current = shelf.docs.get(&key).map(|s| s.body[VERSION_FIELD].clone());
        match current {
            None if expected.is_new() => {}
            Some(Value::String(ref v)) if !expected.is_new() && v == expected.as_str() => {}
            other => {
                warn!(
                    "Write of {} expected version {:?}, found {:?}",
                    key, expected, other
                );
                return Err(ConcurrencyError.into());
            }
        }

        shelf.last_version += 1;
        let version = format!("{:x}", shelf.last_version);
        body[VERSION_FIELD] = Value::String(version.clone());
        shelf.docs.insert(
            key,
            Stored {
                collection: D::PREFIX,
                body,
            },
        );
        document.meta_mut().version = Version::new(version);
        Ok(())
    }
}

impl Storage for MemoryDocuments {
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        let body = self
            .shelf()?
            .docs
            .get(&id.to_string())
            .map(|s| s.body.clone());
        debug!("Load {} -> found:{}", id, body.is_some());
        body.map(|b| serde_json::from_value(b).with_context(|| format!("decode {}", id)))
            .transpose()
    }

    fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        self.write(document)
    }

    fn create<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<Id<D>> {
        let id = self.idgen.generate();
        document.meta_mut().id = id;
        document.meta_mut().version = Version::default();
        self.write(document)?;
        Ok(id)
    }

    fn update_fields<D: Entity>(&self, id: &Id<D>, fields: Map<String, Value>) -> Result<()> {
        let mut shelf = self.shelf()?;
        shelf.last_version += 1;
        let version = format!("{:x}", shelf.last_version);
        let stored = shelf
            .docs
            .get_mut(&id.to_string())
            .ok_or_else(|| NotFound(id.to_string()))?;
        let body = stored
            .body
            .as_object_mut()
            .ok_or_else(|| anyhow!("document {} is not an object", id))?;
        for (k, v) in fields {
            body.insert(k, v);
        }
        body.insert(VERSION_FIELD.to_string(), Value::String(version));
        debug!("Updated fields of {}", id);
        Ok(())
    }

    fn delete<D: Entity>(&self, id: &Id<D>) -> Result<()> {
        let removed = self.shelf()?.docs.remove(&id.to_string());
        debug!("Delete {} -> existed:{}", id, removed.is_some());
        Ok(())
    }

    fn query<D: DeserializeOwned + Entity>(&self, query: &Query<D>) -> Result<Vec<D>> {
        let mut bodies = self
            .shelf()?
            .docs
            .values()
            .filter(|s| s.collection == D::PREFIX && query.matches(&s.body))
            .map(|s| s.body.clone())
            .collect::<Vec<_>>();
        // Stable, so ties keep id order.
        bodies.sort_by(|a, b| query.compare(a, b));
        debug!("Query on {} found {} documents", D::PREFIX, bodies.len());

        bodies
            .into_iter()
            .map(|b| serde_json::from_value(b).with_context(|| format!("decode {}", D::PREFIX)))
            .collect()
    }
}

impl MemoryConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl r2d2::ManageConnection for MemoryConnectionManager {
    type Connection = MemoryDocuments;
    type Error = Infallible;

    fn connect(&self) -> Result<MemoryDocuments, Infallible> {
        Ok(self.docs.clone())
    }

    fn is_valid(&self, _: &mut MemoryDocuments) -> Result<(), Infallible> {
        Ok(())
    }

    fn has_broken(&self, _: &mut MemoryDocuments) -> bool {
        false
    }
}
