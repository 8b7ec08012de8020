use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use anyhow::{anyhow, Context, Result};
use err_derive::Error;
use log::*;
use postgres::types::ToSql;
use postgres::GenericConnection;
use r2d2::ManageConnection;
use r2d2_postgres::PostgresConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id, IdGen};

#[derive(Error, Debug, PartialEq, Eq)]
#[error(display = "stale version")]
pub struct ConcurrencyError;

#[derive(Error, Debug, PartialEq, Eq)]
#[error(display = "no such document: {}", _0)]
pub struct NotFound(pub String);

/// A document store: point reads and writes, partial updates, and
/// equality queries within a single collection.
pub trait Storage {
    fn setup(&self) -> Result<()>;
    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>>;
    /// Versioned write of a whole document.
    fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()>;
    /// Inserts a document under a freshly assigned id.
    fn create<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<Id<D>>;
    /// Merges `fields` into the stored body. No version check.
    fn update_fields<D: Entity>(&self, id: &Id<D>, fields: Map<String, Value>) -> Result<()>;
    fn delete<D: Entity>(&self, id: &Id<D>) -> Result<()>;
    fn query<D: DeserializeOwned + Entity>(&self, query: &Query<D>) -> Result<Vec<D>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Selects documents from the collection of `D`.
pub struct Query<D> {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    _phantom: PhantomData<D>,
}

impl<D> Query<D> {
    pub fn all() -> Self {
        Query {
            filters: Vec::new(),
            order_by: None,
            _phantom: PhantomData,
        }
    }

    pub fn where_eq<F: Into<String>, V: Serialize>(mut self, field: F, value: V) -> Result<Self> {
        let field = field.into();
        let value = serde_json::to_value(value).with_context(|| format!("filter on {}", field))?;
        self.filters.push(Filter { field, value });
        Ok(self)
    }

    pub fn order_by<F: Into<String>>(mut self, field: F, direction: Direction) -> Self {
        let field = field.into();
        self.order_by = Some(OrderBy { field, direction });
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.filters
            .iter()
            .all(|f| body.get(&f.field) == Some(&f.value))
    }

    /// Orders two bodies by the sort field, as `ORDER BY` on jsonb would for
    /// same-typed scalars.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let order = match self.order_by.as_ref() {
            Some(order) => order,
            None => return Ordering::Equal,
        };
        let ord = compare_json(a.get(&order.field), b.get(&order.field));
        match order.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

impl<D> fmt::Debug for Query<D> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Query")
            .field("filters", &self.filters)
            .field("order_by", &self.order_by)
            .finish()
    }
}

fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        // Missing or null sorts first.
        (None, None) | (Some(Value::Null), Some(Value::Null)) => Ordering::Equal,
        (None, _) | (Some(Value::Null), _) => Ordering::Less,
        (_, None) | (_, Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

const SETUP_SQL: &str = include_str!("persistence.sql");
const LOAD_SQL: &str = "SELECT body FROM documents WHERE id = $1";
const INSERT_SQL: &str = "WITH a as (
                            SELECT $1::jsonb as body
                            )
                            INSERT INTO documents (id, collection, body)
                            SELECT a.body ->> '_id', $2, jsonb_set(a.body, '{_version}', to_jsonb(to_hex(txid_current())))
                            FROM a
                            WHERE NOT EXISTS (
                                SELECT 1 FROM documents d where d.id = a.body ->> '_id'
                            )";
const SAVE_SQL: &str = "WITH a as (
                            SELECT $1::jsonb as body
                            )
                            UPDATE documents AS d
                                SET body = jsonb_set(a.body, '{_version}', to_jsonb(to_hex(txid_current())))
                                FROM a
                                WHERE id = a.body ->> '_id'
                                AND d.body -> '_version' = a.body -> '_version'";
const UPDATE_FIELDS_SQL: &str = "UPDATE documents
                                SET body = body || $2::jsonb || jsonb_build_object('_version', to_hex(txid_current()))
                                WHERE id = $1";
const DELETE_SQL: &str = "DELETE FROM documents WHERE id = $1";
const VERSION_SQL: &str = "SELECT to_hex(txid_current())";

/// PostgreSQL-backed documents; every collection shares one jsonb table.
pub struct Documents {
    connection: postgres::Connection,
    idgen: IdGen,
}

pub struct DocumentConnectionManager {
    inner: PostgresConnectionManager,
}

impl Documents {
    pub fn wrap(connection: postgres::Connection) -> Self {
        let idgen = IdGen::new();
        Documents { connection, idgen }
    }

    pub fn get_ref(&self) -> &postgres::Connection {
        &self.connection
    }

    fn write<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        let json = serde_json::to_value(&*document)?;
        let t = self.connection.transaction()?;
        let nrows = if document.meta().version.is_new() {
            t.prepare_cached(INSERT_SQL)?
                .execute(&[&json, &D::PREFIX])?
        } else {
            t.prepare_cached(SAVE_SQL)?.execute(&[&json])?
        };
        debug!("Write of {} modified {} rows", document.meta().id, nrows);
        if nrows != 1 {
            warn!("Write impacted {} rows not 1", nrows);
            return Err(ConcurrencyError.into());
        }
        let version = current_version(&t)?;
        t.commit()?;
        document.meta_mut().version = version;
        Ok(())
    }
}

fn current_version<C: GenericConnection>(conn: &C) -> Result<Version> {
    let res = conn.prepare_cached(VERSION_SQL)?.query(&[])?;
    let version: String = res
        .iter()
        .next()
        .ok_or_else(|| anyhow!("Missing version row?"))?
        .get_opt(0)
        .ok_or_else(|| anyhow!("Missing version column?"))??;
    Ok(Version::new(version))
}

impl Storage for Documents {
    fn setup(&self) -> Result<()> {
        self.connection.batch_execute(SETUP_SQL)?;
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        let load = self.connection.prepare_cached(LOAD_SQL)?;
        let res = load.query(&[&id.to_string()])?;

        if let Some(row) = res.iter().next() {
            let json: Value = row
                .get_opt(0)
                .ok_or_else(|| anyhow!("Missing column in row?"))??;
            let doc = serde_json::from_value(json).with_context(|| format!("decode {}", id))?;
            Ok(Some(doc))
        } else {
            Ok(None)
        }
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
        let patch = Value::Object(fields);
        let nrows = self
            .connection
            .prepare_cached(UPDATE_FIELDS_SQL)?
            .execute(&[&id.to_string(), &patch])?;
        debug!("Update of {} modified {} rows", id, nrows);
        if nrows != 1 {
            return Err(NotFound(id.to_string()).into());
        }
        Ok(())
    }

    fn delete<D: Entity>(&self, id: &Id<D>) -> Result<()> {
        let nrows = self
            .connection
            .prepare_cached(DELETE_SQL)?
            .execute(&[&id.to_string()])?;
        debug!("Delete of {} removed {} rows", id, nrows);
        Ok(())
    }

    fn query<D: DeserializeOwned + Entity>(&self, query: &Query<D>) -> Result<Vec<D>> {
        let collection = D::PREFIX;
        let mut sql = String::from("SELECT body FROM documents WHERE collection = $1");
        let mut params: Vec<&dyn ToSql> = vec![&collection];
        for f in query.filters.iter() {
            sql.push_str(&format!(
                " AND body -> ${}::text = ${}::jsonb",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(&f.field);
            params.push(&f.value);
        }
        if let Some(order) = query.order_by.as_ref() {
            sql.push_str(&format!(" ORDER BY body -> ${}::text", params.len() + 1));
            if order.direction == Direction::Descending {
                sql.push_str(" DESC");
            }
            params.push(&order.field);
        }
        trace!("Query {:?} as {:?}", query, sql);

        let rows = self.connection.prepare_cached(&sql)?.query(&params)?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let json: Value = row
                .get_opt(0)
                .ok_or_else(|| anyhow!("Missing column in row?"))??;
            docs.push(serde_json::from_value(json).with_context(|| format!("decode {}", collection))?);
        }
        debug!("Query on {} found {} documents", collection, docs.len());
        Ok(docs)
    }
}

impl DocumentConnectionManager {
    pub fn new(inner: PostgresConnectionManager) -> Self {
        DocumentConnectionManager { inner }
    }
}

impl fmt::Debug for DocumentConnectionManager {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DocumentConnectionManager").finish()
    }
}

impl ManageConnection for DocumentConnectionManager {
    type Connection = Documents;
    type Error = postgres::Error;

    fn connect(&self) -> Result<Documents, postgres::Error> {
        let connection = self.inner.connect()?;
        Ok(Documents::wrap(connection))
    }

    fn is_valid(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
        self.inner.is_valid(&mut conn.connection)
    }

    fn has_broken(&self, conn: &mut Documents) -> bool {
        self.inner.has_broken(&mut conn.connection)
    }
}
