//! sqlrel - relationships between stored records.
//!
//! sqlrel tracks how records relate and writes those links back through
//! any [`RecordStore`]:
//!
//! - Six relation kinds: owned records, back-references, pivot-table
//!   many-to-many and id-list containment in either direction
//! - Pending-change buffers, reconciled by one `save()` per relation
//! - Lazy loading with one shared, cached state per record and relation
//! - Cancel-correct async built on asupersync
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlrel::prelude::*;
//!
//! static OWNER: EntityType = EntityType::new("Owner", "owners", &["id", "name"]);
//! static OWNED: EntityType = EntityType::new("Owned", "owned", &["id", "owner_id"]);
//!
//! async fn example(cx: &Cx, store: &MemoryStore) -> Outcome<(), Error> {
//!     let owned = try_result!(has_many(&OWNER, &OWNED, None));
//!     let owner = Record::new(&OWNER).with("id", "o1");
//!
//!     let bound = try_result!(owned.bind_global(&owner));
//!     try_result!(bound.set(vec![Record::new(&OWNED), Record::new(&OWNED)]));
//!     try_outcome!(bound.save(cx, store).await);
//!
//!     for record in &try_outcome!(bound.get(cx, store).await) {
//!         assert_eq!(record.value("owner_id"), Value::from("o1"));
//!     }
//!     Outcome::Ok(())
//! }
//! ```

pub use sqlrel_core::{
    Budget, ColumnInfo, Condition, Connection, Cx, EntityType, Error, OrderBy, OrderDirection,
    Outcome, Query, QueryErrorKind, Record, RecordStore, RegionId, RelationErrorKind, Result, Row,
    TaskId, Value, error, random_hex_id, snake_case, try_outcome, try_result,
};
pub use sqlrel_memory::{MemoryStore, Statement, StatementKind};
pub use sqlrel_query::{Dialect, QueryBuilder, SqlStore, assign, query};
pub use sqlrel_relations::{
    BoundRelation, DescriptorId, Many, Multiplicity, One, Pivot, RegistryKey, Related,
    RelationBinder, RelationConfig, RelationDescriptor, RelationHandle, RelationKind,
    RelationRegistry, RelationState, Secondary, belongs_to, belongs_to_many, contains, has_many,
    has_one, idlist, link_inverses, within,
};

/// Common imports.
///
/// ```ignore
/// use sqlrel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Cx,
        Outcome,
        // Records and storage
        EntityType,
        Error,
        MemoryStore,
        OrderBy,
        Query,
        QueryBuilder,
        Record,
        RecordStore,
        Result,
        Value,
        // Relations
        Many,
        One,
        Related,
        RelationBinder,
        RelationConfig,
        RelationHandle,
        RelationKind,
        RelationRegistry,
        RelationState,
        Secondary,
        belongs_to,
        belongs_to_many,
        contains,
        has_many,
        has_one,
        within,
        // Macros
        try_outcome,
        try_result,
    };
}
