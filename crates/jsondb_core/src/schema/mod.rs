//! Schema definitions and the schema registry.
//!
//! A model is a named list of typed fields plus declared relationships.
//! The [`SchemaRegistry`] checks definitions at registration, validates
//! candidate records, and resolves relationships to join keys on demand.

mod descriptor;
mod field;
mod model;
mod registry;
mod validate;

pub use descriptor::{FieldDescriptor, ModelDescriptor, OrderedMap, RelationshipDescriptor};
pub use field::{DefaultFactory, FieldDef, FieldKind, OnDelete};
pub use model::{ModelDef, ModelSchema, RelationshipDef, RelationshipKind, SchemaChange};
pub use registry::{ForeignKeyLink, JoinPath, ResolvedJoin, SchemaRegistry};

pub(crate) use validate::decode_stored;

/// Returns true for non-empty `[A-Za-z_][A-Za-z0-9_]*` names.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
