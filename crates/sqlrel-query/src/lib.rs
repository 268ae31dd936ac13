//! Query construction and SQL execution for sqlrel.
//!
//! `sqlrel-query` is the layer between the relation engine and storage:
//!
//! - [`QueryBuilder`] is the fluent `equal`/`is_in`/`contains`/`order_by`/
//!   `first`/`get`/`count`/`update`/`delete`/`insert`/`insert_many` API the
//!   engine issues all of its reads and writes through.
//! - [`render`] turns store-neutral [`Query`](sqlrel_core::Query) values into
//!   SQL for a [`Dialect`].
//! - [`SqlStore`] implements [`RecordStore`](sqlrel_core::RecordStore) on top
//!   of any [`Connection`](sqlrel_core::Connection).

pub mod builder;
pub mod dialect;
pub mod render;
pub mod sql_store;

pub use builder::{QueryBuilder, assign};
pub use dialect::Dialect;
pub use sql_store::SqlStore;

use sqlrel_core::{EntityType, RecordStore};

/// Start a query against `entity` in `store`.
pub fn query<'s, S: RecordStore>(store: &'s S, entity: &'static EntityType) -> QueryBuilder<'s, S> {
    QueryBuilder::new(store, entity)
}
