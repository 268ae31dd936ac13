//! A [`RecordStore`] backed by a SQL [`Connection`].

use std::future::Future;

use asupersync::{Cx, Outcome};
use sqlrel_core::error::{QueryError, QueryErrorKind};
use sqlrel_core::{
    Connection, EntityType, Error, Query, Record, RecordStore, Value, try_outcome, try_result,
};

use crate::{Dialect, render};

/// Renders store operations to SQL and runs them on a connection.
///
/// Transactions map to `BEGIN`/`COMMIT`/`ROLLBACK` on the same connection,
/// so a `SqlStore` must not be shared by concurrent writers.
#[derive(Debug)]
pub struct SqlStore<C: Connection> {
    conn: C,
    dialect: Dialect,
}

impl<C: Connection> SqlStore<C> {
    pub fn new(conn: C, dialect: Dialect) -> Self {
        Self { conn, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    async fn fetch(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        sql: String,
        params: Vec<Value>,
    ) -> Outcome<Vec<Record>, Error> {
        tracing::trace!(sql = %sql, params = params.len(), "SqlStore query");
        let rows = try_outcome!(self.conn.query(cx, &sql, &params).await);
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(try_result!(row.into_record(entity)));
        }
        Outcome::Ok(records)
    }

    async fn run(&self, cx: &Cx, sql: String, params: Vec<Value>) -> Outcome<u64, Error> {
        tracing::trace!(sql = %sql, params = params.len(), "SqlStore execute");
        self.conn.execute(cx, &sql, &params).await
    }
}

fn with_id(mut record: Record) -> Record {
    if !record.has_id() {
        record.set_id(record.entity().new_id());
    }
    record
}

impl<C: Connection> RecordStore for SqlStore<C> {
    fn find(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        id: &Value,
    ) -> impl Future<Output = Outcome<Option<Record>, Error>> + Send {
        let query = Query::new(entity).equal(entity.id_column, id.clone()).limit(1);
        let (sql, params) = render::select(&query, self.dialect);
        async move {
            self.fetch(cx, entity, sql, params)
                .await
                .map(|rows| rows.into_iter().next())
        }
    }

    fn select(
        &self,
        cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        let entity = query.entity();
        let (sql, params) = render::select(query, self.dialect);
        async move { self.fetch(cx, entity, sql, params).await }
    }

    fn count(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let (sql, params) = render::count(query, self.dialect);
        async move {
            let rows = try_outcome!(self.conn.query(cx, &sql, &params).await);
            let count = rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_i64)
                .and_then(|n| u64::try_from(n).ok());
            match count {
                Some(n) => Outcome::Ok(n),
                None => Outcome::Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(sql),
                    message: "COUNT(*) returned no integer".to_string(),
                    source: None,
                })),
            }
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        record: Record,
    ) -> impl Future<Output = Outcome<Record, Error>> + Send {
        let record = with_id(record);
        let (sql, params) = render::insert(record.entity(), std::slice::from_ref(&record), self.dialect);
        async move { self.run(cx, sql, params).await.map(|_| record) }
    }

    fn insert_many(
        &self,
        cx: &Cx,
        entity: &'static EntityType,
        records: Vec<Record>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let mismatched = records.iter().find(|r| !r.is(entity)).map(|r| r.entity().name);
        let records: Vec<Record> = records.into_iter().map(with_id).collect();
        let (sql, params) = render::insert(entity, &records, self.dialect);
        async move {
            if let Some(actual) = mismatched {
                return Outcome::Err(Error::wrong_model_type(entity.name, actual));
            }
            if records.is_empty() {
                return Outcome::Ok(0);
            }
            self.run(cx, sql, params).await
        }
    }

    fn update(
        &self,
        cx: &Cx,
        query: &Query,
        changes: &[(String, Value)],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let (sql, params) = render::update(query, changes, self.dialect);
        async move { self.run(cx, sql, params).await }
    }

    fn delete(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let (sql, params) = render::delete(query, self.dialect);
        async move { self.run(cx, sql, params).await }
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let sql = self.dialect.begin_sql().to_string();
        async move { self.run(cx, sql, Vec::new()).await.map(|_| ()) }
    }

    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move { self.run(cx, "COMMIT".to_string(), Vec::new()).await.map(|_| ()) }
    }

    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            self.run(cx, "ROLLBACK".to_string(), Vec::new())
                .await
                .map(|_| ())
        }
    }
}
