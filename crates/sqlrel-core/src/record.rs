//! Records: one stored row of a known entity type.

use std::collections::BTreeMap;

use crate::error::{Error, QueryError, QueryErrorKind};
use crate::{EntityType, Value};

/// A single row: the entity type it belongs to plus its column data.
///
/// Columns not declared on the entity type are never stored. Equality is
/// content equality (same entity type, same data); use
/// [`Record::same_entity`] to compare identity.
#[derive(Debug, Clone)]
pub struct Record {
    entity: &'static EntityType,
    data: BTreeMap<String, Value>,
}

impl Record {
    /// An empty record of the given type.
    pub fn new(entity: &'static EntityType) -> Self {
        Self {
            entity,
            data: BTreeMap::new(),
        }
    }

    /// Build a record from column/value pairs, dropping undeclared columns.
    pub fn from_pairs<I, K, V>(entity: &'static EntityType, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Self::new(entity);
        for (column, value) in pairs {
            let column = column.into();
            if entity.has_column(&column) {
                record.data.insert(column, value.into());
            } else {
                tracing::warn!(
                    entity = entity.name,
                    column = %column,
                    "Dropping undeclared column"
                );
            }
        }
        record
    }

    /// Builder-style setter. Undeclared columns are dropped.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        if self.entity.has_column(column) {
            self.data.insert(column.to_string(), value.into());
        } else {
            tracing::warn!(entity = self.entity.name, column, "Dropping undeclared column");
        }
        self
    }

    pub fn entity(&self) -> &'static EntityType {
        self.entity
    }

    pub fn table(&self) -> &'static str {
        self.entity.table
    }

    pub fn is(&self, entity: &EntityType) -> bool {
        self.entity.is(entity)
    }

    /// Column value, `None` when the column was never set.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// Column value with missing columns read as NULL.
    pub fn value(&self, column: &str) -> Value {
        self.data.get(column).cloned().unwrap_or(Value::Null)
    }

    /// Set a declared column.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> crate::Result<()> {
        if !self.entity.has_column(column) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                sql: None,
                message: format!(
                    "column '{}' is not declared on {}",
                    column, self.entity.name
                ),
                source: None,
            }));
        }
        self.data.insert(column.to_string(), value.into());
        Ok(())
    }

    /// The id, if present and not NULL.
    pub fn id(&self) -> Option<&Value> {
        self.data
            .get(self.entity.id_column)
            .filter(|value| !value.is_null())
    }

    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    pub fn set_id(&mut self, id: impl Into<Value>) {
        self.data.insert(self.entity.id_column.to_string(), id.into());
    }

    /// Column data in declaration order, unset columns omitted.
    pub fn values(&self) -> impl Iterator<Item = (&'static str, &Value)> + '_ {
        self.entity
            .columns
            .iter()
            .filter_map(|column| self.data.get(*column).map(|value| (*column, value)))
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Whether both records denote the same stored entity.
    ///
    /// Records with ids compare by id; otherwise they compare by content.
    pub fn same_entity(&self, other: &Record) -> bool {
        if !self.entity.is(other.entity) {
            return false;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => self.data == other.data,
        }
    }

    /// Render the record as a JSON object keyed by column.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .values()
            .map(|(column, value)| (column.to_string(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.entity.is(other.entity) && self.data == other.data
    }
}
