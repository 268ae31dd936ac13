//! SQL rendering for store-neutral queries.
//!
//! Every function returns the statement text plus its bound parameters, in
//! placeholder order.

use sqlrel_core::{Condition, EntityType, OrderDirection, Query, Record, Value};

use crate::Dialect;

struct Params {
    dialect: Dialect,
    values: Vec<Value>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn where_clause(query: &Query, params: &mut Params) -> String {
    if query.conditions().is_empty() {
        return String::new();
    }
    let dialect = params.dialect;
    let q = |name: &str| dialect.quote_identifier(name);
    let mut parts = Vec::with_capacity(query.conditions().len());
    for condition in query.conditions() {
        let part = match condition {
            Condition::Equal { column, value } if value.is_null() => {
                format!("{} IS NULL", q(column))
            }
            Condition::Equal { column, value } => {
                let col = q(column);
                format!("{} = {}", col, params.bind(value.clone()))
            }
            Condition::IsIn { values, .. } if values.is_empty() => "1 = 0".to_string(),
            Condition::IsIn { column, values } => {
                let col = q(column);
                let placeholders: Vec<String> =
                    values.iter().map(|v| params.bind(v.clone())).collect();
                format!("{} IN ({})", col, placeholders.join(", "))
            }
            Condition::Contains { column, needle } => {
                let col = q(column);
                format!(
                    "{} LIKE {} ESCAPE '\\'",
                    col,
                    params.bind(Value::Text(escape_like(needle)))
                )
            }
        };
        parts.push(part);
    }
    format!(" WHERE {}", parts.join(" AND "))
}

fn order_and_limit(query: &Query, params: &mut Params) -> String {
    let mut sql = String::new();
    if !query.ordering().is_empty() {
        let terms: Vec<String> = query
            .ordering()
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    OrderDirection::Asc => "ASC",
                    OrderDirection::Desc => "DESC",
                };
                format!("{} {}", params.dialect.quote_identifier(&o.column), dir)
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }
    if let Some(limit) = query.limit_value() {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sql.push_str(" LIMIT ");
        sql.push_str(&params.bind(Value::BigInt(limit)));
    }
    sql
}

fn column_list(entity: &EntityType, dialect: Dialect) -> String {
    entity
        .columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn select(query: &Query, dialect: Dialect) -> (String, Vec<Value>) {
    let entity = query.entity();
    let mut params = Params::new(dialect);
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(entity, dialect),
        dialect.quote_identifier(entity.table)
    );
    sql.push_str(&where_clause(query, &mut params));
    sql.push_str(&order_and_limit(query, &mut params));
    (sql, params.values)
}

pub fn count(query: &Query, dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let mut sql = format!(
        "SELECT COUNT(*) FROM {}",
        dialect.quote_identifier(query.entity().table)
    );
    sql.push_str(&where_clause(query, &mut params));
    (sql, params.values)
}

/// Multi-row INSERT over the entity's full column list; unset columns bind
/// NULL. All records must already carry ids.
pub fn insert(entity: &EntityType, records: &[Record], dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let rows: Vec<String> = records
        .iter()
        .map(|record| {
            let placeholders: Vec<String> = entity
                .columns
                .iter()
                .map(|c| params.bind(record.value(c)))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.quote_identifier(entity.table),
        column_list(entity, dialect),
        rows.join(", ")
    );
    (sql, params.values)
}

pub fn update(query: &Query, changes: &[(String, Value)], dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let sets: Vec<String> = changes
        .iter()
        .map(|(column, value)| {
            let col = dialect.quote_identifier(column);
            format!("{} = {}", col, params.bind(value.clone()))
        })
        .collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        dialect.quote_identifier(query.entity().table),
        sets.join(", ")
    );
    sql.push_str(&where_clause(query, &mut params));
    (sql, params.values)
}

pub fn delete(query: &Query, dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let mut sql = format!(
        "DELETE FROM {}",
        dialect.quote_identifier(query.entity().table)
    );
    sql.push_str(&where_clause(query, &mut params));
    (sql, params.values)
}
