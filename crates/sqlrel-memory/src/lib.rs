//! In-process [`RecordStore`] for sqlrel.
//!
//! `MemoryStore` keeps one vector of records per table behind a mutex. It
//! supports single-level snapshot transactions, keeps a log of every
//! statement it executes, and can be told to fail the next statement of a
//! given kind on a given table. Tests use the log to assert how many writes
//! an operation issued and the failure hook to exercise rollback paths.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use asupersync::{Cx, Outcome};
use sqlrel_core::error::{QueryError, QueryErrorKind, TransactionError, TransactionErrorKind};
use sqlrel_core::{EntityType, Error, Query, Record, RecordStore, Value};

/// Kind of statement recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Find,
    Select,
    Count,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
}

impl StatementKind {
    /// Whether this statement mutates table contents.
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

/// One executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    /// Table name; empty for transaction control.
    pub table: &'static str,
    /// Rows returned or affected.
    pub rows: u64,
}

type Tables = BTreeMap<&'static str, Vec<Record>>;

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    snapshot: Option<Tables>,
    log: Vec<Statement>,
    fail_next: Option<(StatementKind, &'static str)>,
}

impl Inner {
    fn record(&mut self, kind: StatementKind, table: &'static str, rows: u64) {
        tracing::trace!(?kind, table, rows, "memory store statement");
        self.log.push(Statement { kind, table, rows });
    }

    fn check_injected(&mut self, kind: StatementKind, table: &'static str) -> Result<(), Error> {
        if self.fail_next == Some((kind, table)) {
            self.fail_next = None;
            tracing::debug!(?kind, table, "Injected store failure");
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                message: format!("injected {kind:?} failure on {table}"),
                source: None,
            }));
        }
        Ok(())
    }

    fn select(&self, query: &Query) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .tables
            .get(query.entity().table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        query.apply_order(&mut rows);
        rows
    }

    fn insert(&mut self, mut record: Record) -> Result<Record, Error> {
        let entity = record.entity();
        if !record.has_id() {
            record.set_id(entity.new_id());
        }
        let table = self.tables.entry(entity.table).or_default();
        if table.iter().any(|r| r.id() == record.id()) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: None,
                message: format!(
                    "duplicate id {} in {}",
                    record.value(entity.id_column),
                    entity.table
                ),
                source: None,
            }));
        }
        table.push(record.clone());
        Ok(record)
    }
}

fn unknown_column(entity: &EntityType, column: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::NotFound,
        sql: None,
        message: format!("no column '{}' on {}", column, entity.table),
        source: None,
    })
}

/// An in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("MemoryStore mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Insert fixture rows directly, bypassing the log.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) -> Result<(), Error> {
        let mut inner = self.lock();
        for record in records {
            inner.insert(record)?;
        }
        Ok(())
    }

    /// All rows currently stored for `entity`, in insertion order.
    pub fn rows(&self, entity: &EntityType) -> Vec<Record> {
        self.lock()
            .tables
            .get(entity.table)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored row with the given id, read without logging.
    pub fn peek(&self, entity: &EntityType, id: impl Into<Value>) -> Option<Record> {
        let id = id.into();
        self.lock()
            .tables
            .get(entity.table)
            .and_then(|rows| rows.iter().find(|r| r.id() == Some(&id)).cloned())
    }

    /// Every statement executed so far.
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().log.clone()
    }

    /// Number of logged statements of `kind` against `table`.
    pub fn count_statements(&self, kind: StatementKind, table: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|s| s.kind == kind && s.table == table)
            .count()
    }

    /// Number of logged writes of any kind.
    pub fn write_count(&self) -> usize {
        self.lock().log.iter().filter(|s| s.kind.is_write()).count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Make the next `kind` statement against `table` fail.
    pub fn fail_next(&self, kind: StatementKind, table: &'static str) {
        self.lock().fail_next = Some((kind, table));
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().snapshot.is_some()
    }

    fn run<T>(
        &self,
        cx: &Cx,
        kind: StatementKind,
        table: &'static str,
        op: impl FnOnce(&mut Inner) -> Result<(T, u64), Error>,
    ) -> Outcome<T, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let mut inner = self.lock();
        if let Err(e) = inner.check_injected(kind, table) {
            return Outcome::Err(e);
        }
        match op(&mut *inner) {
            Ok((value, rows)) => {
                inner.record(kind, table, rows);
                Outcome::Ok(value)
            }
            Err(e) => Outcome::Err(e),
        }
    }
}

impl RecordStore for MemoryStore {
    fn find(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        id: &Value,
    ) -> impl Future<Output = Outcome<Option<Record>, Error>> + Send {
        let query = Query::new(entity).equal(entity.id_column, id.clone()).limit(1);
        let result = self.run(cx, StatementKind::Find, entity.table, |inner| {
            let found = inner.select(&query).pop();
            let rows = u64::from(found.is_some());
            Ok((found, rows))
        });
        async move { result }
    }

    fn select(
        &self,
        cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        let result = self.run(cx, StatementKind::Select, query.entity().table, |inner| {
            let rows = inner.select(query);
            let n = rows.len() as u64;
            Ok((rows, n))
        });
        async move { result }
    }

    fn count(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.run(cx, StatementKind::Count, query.entity().table, |inner| {
            let n = inner.select(query).len() as u64;
            Ok((n, n))
        });
        async move { result }
    }

    fn insert(
        &self,
        cx: &Cx,
        record: Record,
    ) -> impl Future<Output = Outcome<Record, Error>> + Send {
        let table = record.table();
        let result = self.run(cx, StatementKind::Insert, table, |inner| {
            inner.insert(record).map(|stored| (stored, 1))
        });
        async move { result }
    }

    fn insert_many(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        records: Vec<Record>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.run(cx, StatementKind::Insert, entity.table, |inner| {
            let mut inserted = 0u64;
            for record in records {
                if !record.is(entity) {
                    return Err(Error::wrong_model_type(entity.name, record.entity().name));
                }
                inner.insert(record)?;
                inserted += 1;
            }
            Ok((inserted, inserted))
        });
        async move { result }
    }

    fn update(
        &self,
        cx: &Cx,
        query: &Query,
        changes: &[(String, Value)],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let entity = query.entity();
        let result = self.run(cx, StatementKind::Update, entity.table, |inner| {
            if let Some((column, _)) = changes.iter().find(|(c, _)| !entity.has_column(c)) {
                return Err(unknown_column(entity, column));
            }
            let mut affected = 0u64;
            if let Some(rows) = inner.tables.get_mut(entity.table) {
                for row in rows.iter_mut().filter(|r| query.matches(r)) {
                    for (column, value) in changes {
                        row.set(column, value.clone())?;
                    }
                    affected += 1;
                }
            }
            Ok((affected, affected))
        });
        async move { result }
    }

    fn delete(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let entity = query.entity();
        let result = self.run(cx, StatementKind::Delete, entity.table, |inner| {
            let mut affected = 0u64;
            if let Some(rows) = inner.tables.get_mut(entity.table) {
                let before = rows.len();
                rows.retain(|r| !query.matches(r));
                affected = (before - rows.len()) as u64;
            }
            Ok((affected, affected))
        });
        async move { result }
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.run(cx, StatementKind::Begin, "", |inner| {
            if inner.snapshot.is_some() {
                return Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::NestedNotSupported,
                    message: "MemoryStore does not support nested transactions".to_string(),
                }));
            }
            inner.snapshot = Some(inner.tables.clone());
            Ok(((), 0))
        });
        async move { result }
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.run(cx, StatementKind::Commit, "", |inner| {
            match inner.snapshot.take() {
                Some(_) => Ok(((), 0)),
                None => Err(not_active("commit")),
            }
        });
        async move { result }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        // Rollback runs even under cancellation so an aborted save can undo itself.
        let mut inner = self.lock();
        let result = match inner.snapshot.take() {
            Some(snapshot) => {
                inner.tables = snapshot;
                inner.record(StatementKind::Rollback, "", 0);
                Outcome::Ok(())
            }
            None => Outcome::Err(not_active("rollback")),
        };
        drop(inner);
        async move { result }
    }
}

fn not_active(op: &str) -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: format!("{op} without an active transaction"),
    })
}
