//! Model and relationship definitions.

use super::descriptor::{ModelDescriptor, RelationshipDescriptor};
use super::field::FieldDef;
use crate::error::{CoreError, CoreResult};

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// One source record to at most one target record.
    OneToOne,
    /// One source record to many target records.
    OneToMany,
    /// Many source records to one target record.
    ManyToOne,
    /// Many to many through a junction model.
    ManyToMany,
}

impl RelationshipKind {
    /// Descriptor name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToOne => "many_to_one",
            Self::ManyToMany => "many_to_many",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "one_to_one" => Some(Self::OneToOne),
            "one_to_many" => Some(Self::OneToMany),
            "many_to_one" => Some(Self::ManyToOne),
            "many_to_many" => Some(Self::ManyToMany),
            _ => None,
        }
    }
}

/// A declared edge from one model to another.
///
/// Relationships are not stored in records; they are resolved to join keys
/// when a query uses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    /// Relationship name, unique within the owning model.
    pub name: String,
    /// Cardinality.
    pub kind: RelationshipKind,
    /// Target model name.
    pub target: String,
    /// Name of the inverse relationship on the target.
    pub back_populates: Option<String>,
    /// Junction model, required for many-to-many.
    pub through: Option<String>,
    /// Field carrying the link, when more than one candidate exists.
    pub foreign_key: Option<String>,
}

impl RelationshipDef {
    /// Creates a relationship of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RelationshipKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            back_populates: None,
            through: None,
            foreign_key: None,
        }
    }

    /// One-to-one relationship.
    #[must_use]
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::OneToOne, target)
    }

    /// One-to-many relationship.
    #[must_use]
    pub fn one_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::OneToMany, target)
    }

    /// Many-to-one relationship.
    #[must_use]
    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::ManyToOne, target)
    }

    /// Many-to-many relationship through a junction model.
    #[must_use]
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        through: impl Into<String>,
    ) -> Self {
        let mut rel = Self::new(name, RelationshipKind::ManyToMany, target);
        rel.through = Some(through.into());
        rel
    }

    /// Names the inverse relationship.
    #[must_use]
    pub fn back_populates(mut self, name: impl Into<String>) -> Self {
        self.back_populates = Some(name.into());
        self
    }

    /// Names the field that carries the link.
    #[must_use]
    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// Converts to the persisted descriptor.
    #[must_use]
    pub fn to_descriptor(&self) -> RelationshipDescriptor {
        RelationshipDescriptor {
            kind: self.kind.name().to_string(),
            model: self.target.clone(),
            back_populates: self.back_populates.clone(),
            through: self.through.clone(),
            foreign_key: self.foreign_key.clone(),
        }
    }

    /// Rebuilds a definition from its persisted descriptor.
    pub fn from_descriptor(name: &str, desc: &RelationshipDescriptor) -> CoreResult<Self> {
        let kind = RelationshipKind::parse(&desc.kind).ok_or_else(|| {
            CoreError::invalid_format(format!(
                "relationship {name}: unknown type {:?}",
                desc.kind
            ))
        })?;
        Ok(Self {
            name: name.to_string(),
            kind,
            target: desc.model.clone(),
            back_populates: desc.back_populates.clone(),
            through: desc.through.clone(),
            foreign_key: desc.foreign_key.clone(),
        })
    }
}

/// Definition of a model: ordered fields plus relationships.
///
/// ```rust
/// use jsondb_core::{FieldDef, ModelDef, RelationshipDef};
///
/// let post = ModelDef::new("Post")
///     .field(FieldDef::integer("id").primary_key())
///     .field(FieldDef::string("title").not_null())
///     .field(FieldDef::integer("author_id").foreign_key("User.id"))
///     .relationship(RelationshipDef::many_to_one("author", "User"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    /// Model name.
    pub name: String,
    /// Fields in definition order.
    pub fields: Vec<FieldDef>,
    /// Relationships in definition order.
    pub relationships: Vec<RelationshipDef>,
}

impl ModelDef {
    /// Creates an empty model definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// A registered model: a checked definition plus its schema version.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    def: ModelDef,
    version: u32,
    pk: usize,
}

impl ModelSchema {
    /// Checks model-local invariants and wraps the definition.
    ///
    /// Foreign key targets are checked by the registry.
    pub(crate) fn build(mut def: ModelDef, version: u32) -> CoreResult<Self> {
        if !super::is_valid_name(&def.name) {
            return Err(CoreError::schema(format!("invalid model name {:?}", def.name)));
        }

        let model = def.name.clone();
        let mut seen = std::collections::HashSet::new();
        for field in &mut def.fields {
            field.check(&model)?;
            if !seen.insert(field.name.clone()) {
                return Err(CoreError::schema(format!(
                    "duplicate field {} in model {model}",
                    field.name
                )));
            }
        }
        for rel in &def.relationships {
            if !super::is_valid_name(&rel.name) || !seen.insert(rel.name.clone()) {
                return Err(CoreError::schema(format!(
                    "invalid or duplicate relationship name {:?} in model {model}",
                    rel.name
                )));
            }
            match (rel.kind, &rel.through) {
                (RelationshipKind::ManyToMany, None) => {
                    return Err(CoreError::schema(format!(
                        "{model}.{}: many_to_many requires a junction model",
                        rel.name
                    )))
                }
                (RelationshipKind::ManyToMany, Some(_)) | (_, None) => {}
                (_, Some(_)) => {
                    return Err(CoreError::schema(format!(
                        "{model}.{}: only many_to_many takes a junction model",
                        rel.name
                    )))
                }
            }
        }

        let pks: Vec<usize> = def
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
            .collect();
        let pk = match pks.as_slice() {
            [pk] => *pk,
            [] => {
                return Err(CoreError::schema(format!(
                    "model {model} has no primary key"
                )))
            }
            _ => {
                return Err(CoreError::schema(format!(
                    "model {model} has more than one primary key"
                )))
            }
        };

        Ok(Self { def, version, pk })
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Schema version, starting at 1.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// The underlying definition.
    #[must_use]
    pub const fn def(&self) -> &ModelDef {
        &self.def
    }

    /// Fields in definition order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.def.fields
    }

    /// Relationships in definition order.
    #[must_use]
    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.def.relationships
    }

    /// The primary key field.
    #[must_use]
    pub fn primary_key(&self) -> &FieldDef {
        &self.def.fields[self.pk]
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.def.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.def.relationships.iter().find(|r| r.name == name)
    }

    /// Fields kept in secondary indexes.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.def.fields.iter().filter(|f| f.is_indexed() && !f.primary_key)
    }

    /// Converts to the persisted descriptor.
    #[must_use]
    pub fn to_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            version: self.version,
            fields: self
                .def
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.to_descriptor()))
                .collect(),
            relationships: self
                .def
                .relationships
                .iter()
                .map(|r| (r.name.clone(), r.to_descriptor()))
                .collect(),
        }
    }

    /// Rebuilds a definition and version from a persisted descriptor.
    pub fn def_from_descriptor(name: &str, desc: &ModelDescriptor) -> CoreResult<(ModelDef, u32)> {
        let fields = desc
            .fields
            .iter()
            .map(|(n, d)| FieldDef::from_descriptor(n, d))
            .collect::<CoreResult<Vec<_>>>()?;
        let relationships = desc
            .relationships
            .iter()
            .map(|(n, d)| RelationshipDef::from_descriptor(n, d))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((
            ModelDef {
                name: name.to_string(),
                fields,
                relationships,
            },
            desc.version,
        ))
    }
}

/// One schema alteration.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// Appends a field. It must be nullable or carry a default.
    AddField(FieldDef),
    /// Removes a field that is neither the primary key nor referenced.
    RemoveField(String),
}
