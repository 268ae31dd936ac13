//! Store-neutral query descriptions.
//!
//! A [`Query`] names an entity type plus a conjunction of [`Condition`]s,
//! an optional ordering and an optional limit. Record stores either render
//! it to SQL or evaluate it directly against in-memory rows via
//! [`Query::matches`] and [`Query::apply_order`].

use std::cmp::Ordering;

use crate::{EntityType, Record, Value};

/// A single predicate on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`; a NULL value means `column IS NULL`.
    Equal { column: String, value: Value },
    /// `column IN (values)`; an empty list matches nothing.
    IsIn { column: String, values: Vec<Value> },
    /// Substring containment on a text column (`LIKE '%needle%'`).
    Contains { column: String, needle: String },
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Equal { column, .. }
            | Condition::IsIn { column, .. }
            | Condition::Contains { column, .. } => column,
        }
    }

    /// Evaluate against a record; missing columns read as NULL.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::Equal { column, value } => {
                let actual = record.value(column);
                if value.is_null() {
                    actual.is_null()
                } else {
                    !actual.is_null() && actual.loosely_eq(value)
                }
            }
            Condition::IsIn { column, values } => {
                let actual = record.value(column);
                !actual.is_null() && values.iter().any(|v| actual.loosely_eq(v))
            }
            Condition::Contains { column, needle } => record
                .get(column)
                .and_then(Value::as_str)
                .is_some_and(|text| text.contains(needle.as_str())),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// A conjunctive query over one entity type.
#[derive(Debug, Clone)]
pub struct Query {
    entity: &'static EntityType,
    conditions: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
}

impl Query {
    pub fn new(entity: &'static EntityType) -> Self {
        Self {
            entity,
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::Equal {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn is_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Condition::IsIn {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn contains(self, column: impl Into<String>, needle: impl Into<String>) -> Self {
        self.filter(Condition::Contains {
            column: column.into(),
            needle: needle.into(),
        })
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn entity(&self) -> &'static EntityType {
        self.entity
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Whether an `IsIn` with an empty list makes the query unsatisfiable.
    pub fn is_trivially_empty(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| matches!(c, Condition::IsIn { values, .. } if values.is_empty()))
    }

    /// Evaluate every condition against `record`.
    pub fn matches(&self, record: &Record) -> bool {
        record.is(self.entity) && self.conditions.iter().all(|c| c.matches(record))
    }

    /// Sort by the ORDER BY terms, then truncate to the limit.
    pub fn apply_order(&self, records: &mut Vec<Record>) {
        if !self.order_by.is_empty() {
            records.sort_by(|a, b| {
                for term in &self.order_by {
                    let ord = a.value(&term.column).sort_cmp(&b.value(&term.column));
                    let ord = match term.direction {
                        OrderDirection::Asc => ord,
                        OrderDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = self.limit {
            records.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
    }
}
