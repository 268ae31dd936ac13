//! Static entity metadata.
//!
//! An [`EntityType`] describes how one kind of record is stored: the table
//! it lives in, its id column, its ordered column list, and the hook used to
//! mint ids for records inserted without one. Entity types are declared as
//! `static`s and referenced everywhere by `&'static EntityType`.

use std::fmt;

use rand::RngCore;

use crate::Value;

/// Metadata for one stored entity type.
///
/// # Example
///
/// ```
/// use sqlrel_core::EntityType;
///
/// static OWNER: EntityType = EntityType::new("Owner", "owners", &["id", "name"]);
///
/// assert_eq!(OWNER.table, "owners");
/// assert_eq!(OWNER.id_column, "id");
/// assert!(OWNER.has_column("name"));
/// ```
#[derive(Clone, Copy)]
pub struct EntityType {
    /// Type name, e.g. `"UserRole"`. Default column names derive from it.
    pub name: &'static str,
    /// Table name.
    pub table: &'static str,
    /// Primary key column.
    pub id_column: &'static str,
    /// All columns, id column included, in storage order.
    pub columns: &'static [&'static str],
    /// Id-generation hook used when a record is inserted without an id.
    pub generate_id: fn() -> Value,
}

impl EntityType {
    /// Create metadata with id column `"id"` and random hex ids.
    pub const fn new(
        name: &'static str,
        table: &'static str,
        columns: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            table,
            id_column: "id",
            columns,
            generate_id: random_hex_id,
        }
    }

    /// Use a different primary key column.
    pub const fn id_column(mut self, column: &'static str) -> Self {
        self.id_column = column;
        self
    }

    /// Use a custom id-generation hook.
    pub const fn id_generator(mut self, generate: fn() -> Value) -> Self {
        self.generate_id = generate;
        self
    }

    /// Whether `column` is declared for this entity.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Mint a fresh id through the entity's hook.
    pub fn new_id(&self) -> Value {
        (self.generate_id)()
    }

    /// Whether two metadata values describe the same entity type.
    pub fn is(&self, other: &EntityType) -> bool {
        self.name == other.name && self.table == other.table
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Default id hook: 16 random bytes rendered as 32 lowercase hex chars.
pub fn random_hex_id() -> Value {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(32);
    for byte in bytes {
        id.push_str(&format!("{byte:02x}"));
    }
    Value::Text(id)
}
