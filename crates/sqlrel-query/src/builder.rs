//! Fluent query builder over any [`RecordStore`].
//!
//! ```ignore
//! let owned = QueryBuilder::new(&store, &OWNED)
//!     .equal("owner_id", "o1")
//!     .order_by(OrderBy::asc("id"))
//!     .get(&cx)
//!     .await;
//! ```
//!
//! Queries containing an empty `IN` list cannot match anything; terminal
//! operations on them short-circuit without touching the store.

use asupersync::{Cx, Outcome};
use sqlrel_core::{EntityType, Error, OrderBy, Query, Record, RecordStore, Value};

/// A `column = value` assignment for [`QueryBuilder::update`].
pub fn assign(column: &str, value: impl Into<Value>) -> (String, Value) {
    (column.to_string(), value.into())
}

/// Query builder bound to a store and an entity type.
#[derive(Debug)]
pub struct QueryBuilder<'s, S: RecordStore> {
    store: &'s S,
    query: Query,
}

impl<'s, S: RecordStore> QueryBuilder<'s, S> {
    pub fn new(store: &'s S, entity: &'static EntityType) -> Self {
        Self {
            store,
            query: Query::new(entity),
        }
    }

    /// Continue building from an existing query.
    pub fn from_query(store: &'s S, query: Query) -> Self {
        Self { store, query }
    }

    pub fn equal(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.query = self.query.equal(column, value);
        self
    }

    pub fn is_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.is_in(column, values);
        self
    }

    pub fn contains(mut self, column: &str, needle: impl Into<String>) -> Self {
        self.query = self.query.contains(column, needle);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.query = self.query.order_by(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn into_query(self) -> Query {
        self.query
    }

    /// First matching record, if any.
    pub async fn first(self, cx: &Cx) -> Outcome<Option<Record>, Error> {
        if self.query.is_trivially_empty() {
            return Outcome::Ok(None);
        }
        let query = self.query.limit(1);
        self.store
            .select(cx, &query)
            .await
            .map(|rows| rows.into_iter().next())
    }

    /// All matching records.
    pub async fn get(self, cx: &Cx) -> Outcome<Vec<Record>, Error> {
        if self.query.is_trivially_empty() {
            return Outcome::Ok(Vec::new());
        }
        self.store.select(cx, &self.query).await
    }

    pub async fn count(self, cx: &Cx) -> Outcome<u64, Error> {
        if self.query.is_trivially_empty() {
            return Outcome::Ok(0);
        }
        self.store.count(cx, &self.query).await
    }

    /// Apply `changes` to every matching record.
    pub async fn update(self, cx: &Cx, changes: &[(String, Value)]) -> Outcome<u64, Error> {
        if changes.is_empty() || self.query.is_trivially_empty() {
            tracing::trace!(table = self.query.entity().table, "Skipping no-op update");
            return Outcome::Ok(0);
        }
        self.store.update(cx, &self.query, changes).await
    }

    /// Delete every matching record.
    pub async fn delete(self, cx: &Cx) -> Outcome<u64, Error> {
        if self.query.is_trivially_empty() {
            tracing::trace!(table = self.query.entity().table, "Skipping no-op delete");
            return Outcome::Ok(0);
        }
        self.store.delete(cx, &self.query).await
    }

    /// Find by id, ignoring any conditions added so far.
    pub async fn find(self, cx: &Cx, id: &Value) -> Outcome<Option<Record>, Error> {
        self.store.find(cx, self.query.entity(), id).await
    }

    /// Insert a record of the builder's entity type.
    pub async fn insert(self, cx: &Cx, record: Record) -> Outcome<Record, Error> {
        let entity = self.query.entity();
        if !record.is(entity) {
            return Outcome::Err(Error::wrong_model_type(entity.name, record.entity().name));
        }
        self.store.insert(cx, record).await
    }

    /// Insert several records of the builder's entity type.
    pub async fn insert_many(self, cx: &Cx, records: Vec<Record>) -> Outcome<u64, Error> {
        if records.is_empty() {
            return Outcome::Ok(0);
        }
        self.store
            .insert_many(cx, self.query.entity(), records)
            .await
    }
}
