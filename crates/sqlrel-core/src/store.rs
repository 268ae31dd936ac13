//! The record store boundary.
//!
//! The relation engine never talks to a database directly. Everything it
//! reads or writes goes through a [`RecordStore`], and SQL-backed stores in
//! turn sit on a [`Connection`].

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::{EntityType, Error, Query, Record, Row, Value};

/// Per-entity-type persistence operations.
///
/// All methods are cancel-aware: an implementation should return
/// `Outcome::Cancelled` when `cx` is cancelled before the operation runs.
/// Transactions are optional; the default `begin`/`commit`/`rollback` are
/// no-ops for stores that cannot group statements.
pub trait RecordStore: Send + Sync {
    /// Fetch a record by id.
    fn find(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        id: &Value,
    ) -> impl Future<Output = Outcome<Option<Record>, Error>> + Send;

    /// Fetch all records matching `query`, honouring ordering and limit.
    fn select(
        &self,
        cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send;

    /// Count records matching `query`.
    fn count(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Insert one record, filling a missing id from the entity's hook.
    /// Returns the record as stored.
    fn insert(
        &self,
        cx: &Cx,
        record: Record,
    ) -> impl Future<Output = Outcome<Record, Error>> + Send;

    /// Insert several records of one entity type. Returns rows inserted.
    fn insert_many(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        records: Vec<Record>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Apply `changes` to every record matching `query`. Returns rows affected.
    fn update(
        &self,
        cx: &Cx,
        query: &Query,
        changes: &[(String, Value)],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Delete every record matching `query`. Returns rows affected.
    fn delete(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Whether `begin`/`commit`/`rollback` actually group statements.
    fn supports_transactions(&self) -> bool {
        false
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

/// A raw SQL connection, as consumed by SQL-backed record stores.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}
