//! Core types and traits for sqlrel.
//!
//! This crate provides the foundations the relation engine builds on:
//!
//! - `Value` for dynamically-typed column data
//! - `EntityType` static metadata and `Record` rows
//! - `Query`/`Condition` store-neutral query descriptions
//! - `RecordStore` and `Connection` traits at the storage boundary
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod entity;
pub mod error;
pub mod identifiers;
pub mod query;
pub mod record;
pub mod row;
pub mod store;
pub mod value;

pub use entity::{EntityType, random_hex_id};
pub use error::{
    ConfigError, Error, QueryError, QueryErrorKind, RelationError, RelationErrorKind, Result,
    TransactionError, TransactionErrorKind, TypeError,
};
pub use identifiers::{is_valid_identifier, quote_ident, quote_ident_mysql, snake_case};
pub use query::{Condition, OrderBy, OrderDirection, Query};
pub use record::Record;
pub use row::{ColumnInfo, Row};
pub use store::{Connection, RecordStore};
pub use value::Value;

/// Unwrap an `Outcome`, returning early from the enclosing async fn on
/// `Err`, `Cancelled` or `Panicked`.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning `Outcome`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::Outcome::Err(e.into()),
        }
    };
}
