//! Factory functions for declaring relations.
//!
//! Column names default from the entity type names, so
//! `has_many(&OWNER, &OWNED, None)` links through `owned.owner_id`.

use sqlrel_core::{EntityType, Result, snake_case};

use crate::binder::{Many, One, RelationBinder};
use crate::descriptor::{RelationDescriptor, RelationKind};

fn default_fk(owner: &EntityType) -> String {
    format!("{}_{}", snake_case(owner.name), owner.id_column)
}

fn default_list(members: &EntityType) -> String {
    format!("{}_ids", snake_case(members.name))
}

fn column(given: Option<&str>, default: impl FnOnce() -> String) -> String {
    given.map_or_else(default, str::to_string)
}

/// `primary` owns at most one `secondary`; the key lives on `secondary`.
pub fn has_one(
    primary: &'static EntityType,
    secondary: &'static EntityType,
    foreign_key: Option<&str>,
) -> Result<RelationBinder<One>> {
    let fk = column(foreign_key, || default_fk(primary));
    RelationBinder::new(RelationDescriptor::new(RelationKind::OwnsOne, primary, secondary, &fk)?)
}

/// `primary` owns any number of `secondary` records; the key lives on
/// `secondary`.
pub fn has_many(
    primary: &'static EntityType,
    secondary: &'static EntityType,
    foreign_key: Option<&str>,
) -> Result<RelationBinder<Many>> {
    let fk = column(foreign_key, || default_fk(primary));
    RelationBinder::new(RelationDescriptor::new(RelationKind::OwnsMany, primary, secondary, &fk)?)
}

/// `primary` holds a key to its single owner `secondary`.
pub fn belongs_to(
    primary: &'static EntityType,
    secondary: &'static EntityType,
    foreign_key: Option<&str>,
) -> Result<RelationBinder<One>> {
    let fk = column(foreign_key, || default_fk(secondary));
    RelationBinder::new(RelationDescriptor::new(
        RelationKind::BelongsToOne,
        primary,
        secondary,
        &fk,
    )?)
}

/// Many-to-many through `pivot` rows holding both ids.
pub fn belongs_to_many(
    primary: &'static EntityType,
    secondary: &'static EntityType,
    pivot: &'static EntityType,
    primary_column: Option<&str>,
    secondary_column: Option<&str>,
) -> Result<RelationBinder<Many>> {
    let pcol = column(primary_column, || format!("{}_id", snake_case(primary.name)));
    let scol = column(secondary_column, || format!("{}_id", snake_case(secondary.name)));
    RelationBinder::new(RelationDescriptor::many_to_many(
        primary, secondary, pivot, &pcol, &scol,
    )?)
}

/// `primary`'s list column holds the ids of its `secondary` records.
pub fn contains(
    primary: &'static EntityType,
    secondary: &'static EntityType,
    list_column: Option<&str>,
) -> Result<RelationBinder<Many>> {
    let fk = column(list_column, || default_list(secondary));
    RelationBinder::new(RelationDescriptor::new(
        RelationKind::SetContains,
        primary,
        secondary,
        &fk,
    )?)
}

/// Each `secondary`'s list column holds `primary`'s id.
pub fn within(
    primary: &'static EntityType,
    secondary: &'static EntityType,
    list_column: Option<&str>,
) -> Result<RelationBinder<Many>> {
    let fk = column(list_column, || default_list(primary));
    RelationBinder::new(RelationDescriptor::new(
        RelationKind::SetContainedIn,
        primary,
        secondary,
        &fk,
    )?)
}
