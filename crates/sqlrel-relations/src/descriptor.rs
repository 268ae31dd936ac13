//! Relation descriptors.
//!
//! A [`RelationDescriptor`] is the immutable description of one relation
//! edge: which kind it is, the two entity types it connects, and where the
//! link is stored (a foreign-key column, a pivot table, or an id-list
//! column). Descriptors are validated at construction and carry a stable
//! [`DescriptorId`] used to key cached relation state.

use std::fmt;
use std::sync::Arc;

use sqlrel_core::{EntityType, Error, Result, is_valid_identifier};

/// The six supported relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Owner has zero or one owned record; the foreign key lives on the
    /// owned (secondary) table.
    OwnsOne,
    /// Owner has zero or more owned records; foreign key on the owned table.
    OwnsMany,
    /// The primary holds a foreign key to its single owner (the secondary).
    BelongsToOne,
    /// Links through rows of a pivot table holding both ids.
    ManyToMany,
    /// The primary's list column holds the sorted ids of its secondaries.
    SetContains,
    /// Each secondary's list column holds the primary's id.
    SetContainedIn,
}

impl RelationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::OwnsOne => "OwnsOne",
            RelationKind::OwnsMany => "OwnsMany",
            RelationKind::BelongsToOne => "BelongsToOne",
            RelationKind::ManyToMany => "ManyToMany",
            RelationKind::SetContains => "SetContains",
            RelationKind::SetContainedIn => "SetContainedIn",
        }
    }

    /// Whether the secondary side is a set rather than a single record.
    pub const fn is_collection(self) -> bool {
        !matches!(self, RelationKind::OwnsOne | RelationKind::BelongsToOne)
    }

    /// Owner kinds keep the foreign key on the secondary table.
    pub const fn is_owner_kind(self) -> bool {
        matches!(self, RelationKind::OwnsOne | RelationKind::OwnsMany)
    }

    pub const fn is_set_kind(self) -> bool {
        matches!(self, RelationKind::SetContains | RelationKind::SetContainedIn)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a descriptor, derived from its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(Arc<str>);

impl DescriptorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pivot table used by a many-to-many relation.
#[derive(Debug, Clone)]
pub struct Pivot {
    pub entity: &'static EntityType,
    /// Pivot column holding the primary's id.
    pub primary_column: String,
    /// Pivot column holding the secondary's id.
    pub secondary_column: String,
}

/// Immutable description of one relation edge.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    kind: RelationKind,
    primary: &'static EntityType,
    secondary: &'static EntityType,
    foreign_key: Option<String>,
    pivot: Option<Pivot>,
    inverse: Option<DescriptorId>,
    id: DescriptorId,
}

impl RelationDescriptor {
    /// Describe a foreign-key or id-list relation.
    ///
    /// Fails with `InvalidDescriptor` for `ManyToMany` (use
    /// [`RelationDescriptor::many_to_many`]) or when `foreign_key` is not a
    /// declared, non-id column of the table that stores the link.
    pub fn new(
        kind: RelationKind,
        primary: &'static EntityType,
        secondary: &'static EntityType,
        foreign_key: impl Into<String>,
    ) -> Result<Self> {
        if kind == RelationKind::ManyToMany {
            return Err(Error::invalid_descriptor(format!(
                "{}->{}: a many-to-many relation requires a pivot",
                primary.name, secondary.name
            )));
        }
        let foreign_key = foreign_key.into();
        let id = DescriptorId(Arc::from(format!(
            "{}_{}_{}_{}",
            primary.name, kind, secondary.name, foreign_key
        )));
        let descriptor = Self {
            kind,
            primary,
            secondary,
            foreign_key: Some(foreign_key),
            pivot: None,
            inverse: None,
            id,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Describe a many-to-many relation through `pivot`.
    pub fn many_to_many(
        primary: &'static EntityType,
        secondary: &'static EntityType,
        pivot: &'static EntityType,
        primary_column: impl Into<String>,
        secondary_column: impl Into<String>,
    ) -> Result<Self> {
        let pivot = Pivot {
            entity: pivot,
            primary_column: primary_column.into(),
            secondary_column: secondary_column.into(),
        };
        let id = DescriptorId(Arc::from(format!(
            "{}_{}_{}_{}_{}_{}",
            primary.name,
            RelationKind::ManyToMany,
            secondary.name,
            pivot.entity.name,
            pivot.primary_column,
            pivot.secondary_column
        )));
        let descriptor = Self {
            kind: RelationKind::ManyToMany,
            primary,
            secondary,
            foreign_key: None,
            pivot: Some(pivot),
            inverse: None,
            id,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Record the inverse relation's identity. Only the id is stored, so
    /// two descriptors naming each other never form a reference cycle.
    pub fn with_inverse(mut self, inverse: &RelationDescriptor) -> Self {
        self.inverse = Some(inverse.id.clone());
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn primary(&self) -> &'static EntityType {
        self.primary
    }

    pub fn secondary(&self) -> &'static EntityType {
        self.secondary
    }

    /// Link column for non-pivot kinds.
    pub fn foreign_key(&self) -> Option<&str> {
        self.foreign_key.as_deref()
    }

    pub fn pivot(&self) -> Option<&Pivot> {
        self.pivot.as_ref()
    }

    pub fn id(&self) -> &DescriptorId {
        &self.id
    }

    pub fn inverse(&self) -> Option<&DescriptorId> {
        self.inverse.as_ref()
    }

    /// `"{Primary}_{Kind}_{Secondary}_{fk}"`, or for many-to-many
    /// `"{Primary}_{Kind}_{Secondary}_{Pivot}_{pcol}_{scol}"`.
    pub fn cache_key(&self) -> &str {
        self.id.as_str()
    }

    /// Table whose column stores the link, for non-pivot kinds.
    pub fn link_table(&self) -> &'static EntityType {
        match self.kind {
            RelationKind::OwnsOne | RelationKind::OwnsMany | RelationKind::SetContainedIn => {
                self.secondary
            }
            RelationKind::BelongsToOne | RelationKind::SetContains => self.primary,
            RelationKind::ManyToMany => self.pivot.as_ref().map_or(self.primary, |p| p.entity),
        }
    }

    pub(crate) fn fk(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        match (&self.foreign_key, &self.pivot) {
            (Some(fk), None) => self.check_column(self.link_table(), fk),
            (None, Some(pivot)) => {
                self.check_column(pivot.entity, &pivot.primary_column)?;
                self.check_column(pivot.entity, &pivot.secondary_column)?;
                if pivot.primary_column == pivot.secondary_column {
                    return Err(Error::invalid_descriptor(format!(
                        "{}: pivot columns must differ, both are '{}'",
                        self.id, pivot.primary_column
                    )));
                }
                Ok(())
            }
            _ => Err(Error::invalid_descriptor(format!(
                "{}: exactly one of foreign key or pivot must be configured",
                self.id
            ))),
        }
    }

    fn check_column(&self, table: &EntityType, column: &str) -> Result<()> {
        if !is_valid_identifier(column) {
            return Err(Error::invalid_descriptor(format!(
                "{}: '{}' is not a valid column name",
                self.id, column
            )));
        }
        if !table.has_column(column) {
            return Err(Error::invalid_descriptor(format!(
                "{}: column '{}' is not declared on {}",
                self.id, column, table.table
            )));
        }
        if column == table.id_column {
            return Err(Error::invalid_descriptor(format!(
                "{}: link column '{}' is the id column of {}",
                self.id, column, table.table
            )));
        }
        Ok(())
    }
}

impl PartialEq for RelationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RelationDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrel_core::RelationErrorKind;

    static OWNER: EntityType = EntityType::new("Owner", "owners", &["id", "name"]);
    static OWNED: EntityType = EntityType::new("Owned", "owned", &["id", "owner_id", "owner_ids"]);
    static USER: EntityType = EntityType::new("User", "users", &["id"]);
    static ROLE: EntityType = EntityType::new("Role", "roles", &["id"]);
    static USER_ROLE: EntityType =
        EntityType::new("UserRole", "user_roles", &["id", "user_id", "role_id"]);

    fn kind_of(err: Error) -> Option<RelationErrorKind> {
        err.relation_kind()
    }

    #[test]
    fn cache_keys_name_every_part() {
        let d = RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap();
        assert_eq!(d.cache_key(), "Owner_OwnsMany_Owned_owner_id");
        assert_eq!(d.link_table().table, "owned");

        let m = RelationDescriptor::many_to_many(&USER, &ROLE, &USER_ROLE, "user_id", "role_id")
            .unwrap();
        assert_eq!(m.cache_key(), "User_ManyToMany_Role_UserRole_user_id_role_id");
        assert_eq!(m.foreign_key(), None);
    }

    #[test]
    fn link_column_must_live_on_the_link_table() {
        // owner_id is on owned, not owners
        let err = RelationDescriptor::new(RelationKind::BelongsToOne, &OWNER, &OWNED, "owner_id")
            .unwrap_err();
        assert_eq!(kind_of(err), Some(RelationErrorKind::InvalidDescriptor));

        let ok = RelationDescriptor::new(RelationKind::BelongsToOne, &OWNED, &OWNER, "owner_id");
        assert!(ok.is_ok());
    }

    #[test]
    fn malformed_columns_are_rejected() {
        for fk in ["", "owner id", "id", "missing"] {
            let err = RelationDescriptor::new(RelationKind::OwnsOne, &OWNER, &OWNED, fk).unwrap_err();
            assert_eq!(kind_of(err), Some(RelationErrorKind::InvalidDescriptor), "fk {fk:?}");
        }
        let err = RelationDescriptor::new(RelationKind::ManyToMany, &USER, &ROLE, "user_id").unwrap_err();
        assert_eq!(kind_of(err), Some(RelationErrorKind::InvalidDescriptor));

        let err = RelationDescriptor::many_to_many(&USER, &ROLE, &USER_ROLE, "user_id", "user_id")
            .unwrap_err();
        assert_eq!(kind_of(err), Some(RelationErrorKind::InvalidDescriptor));
    }

    #[test]
    fn pivot_keeps_its_table_and_columns() {
        let m = RelationDescriptor::many_to_many(&USER, &ROLE, &USER_ROLE, "user_id", "role_id")
            .unwrap();
        let pivot = m.pivot().cloned().expect("many-to-many has a pivot");
        assert!(pivot.entity.is(&USER_ROLE));
        assert_eq!(pivot.primary_column, "user_id");
        assert_eq!(pivot.secondary_column, "role_id");

        let plain = RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap();
        assert!(plain.pivot().is_none());
    }

    #[test]
    fn inverse_is_stored_by_id() {
        let owned = RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap();
        let owner = RelationDescriptor::new(RelationKind::BelongsToOne, &OWNED, &OWNER, "owner_id")
            .unwrap()
            .with_inverse(&owned);
        assert_eq!(owner.inverse(), Some(owned.id()));
        assert_ne!(owner, owned);
    }

    #[test]
    fn kind_classification() {
        assert!(RelationKind::OwnsMany.is_owner_kind());
        assert!(!RelationKind::BelongsToOne.is_collection());
        assert!(RelationKind::SetContainedIn.is_collection());
        assert!(RelationKind::SetContains.is_set_kind());
    }
}
