//! Relation engine for sqlrel.
//!
//! Six relation kinds connect a primary record to its secondaries:
//!
//! | Kind | Link stored in |
//! |------|----------------|
//! | `OwnsOne` / `OwnsMany` | foreign key on the secondary table |
//! | `BelongsToOne` | foreign key on the primary table |
//! | `ManyToMany` | rows of a pivot table |
//! | `SetContains` | sorted id list on the primary |
//! | `SetContainedIn` | sorted id list on each secondary |
//!
//! A [`RelationState`] buffers assignments as pending changes;
//! [`RelationState::save`] reconciles them into set-based writes and
//! [`RelationState::reload`] re-derives the relation from storage. The
//! factory functions ([`has_many`], [`belongs_to`], ...) return binders that
//! attach relations to owning records through a [`RelationRegistry`], which
//! keeps one shared state per record and relation.

pub mod binder;
pub mod config;
pub mod descriptor;
mod fetch;
pub mod factory;
pub mod handle;
pub mod idlist;
mod reconcile;
pub mod registry;
pub mod state;

pub use binder::{BoundRelation, Many, Multiplicity, One, Related, RelationBinder, link_inverses};
pub use config::RelationConfig;
pub use descriptor::{DescriptorId, Pivot, RelationDescriptor, RelationKind};
pub use factory::{belongs_to, belongs_to_many, contains, has_many, has_one, within};
pub use handle::RelationHandle;
pub use registry::{RegistryKey, RelationRegistry};
pub use state::{RelationState, Secondary};
