//! The schema registry.

use super::field::{FieldDef, OnDelete};
use super::model::{ModelDef, ModelSchema, RelationshipDef, RelationshipKind, SchemaChange};
use super::validate;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A foreign key in some model that points at another model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyLink {
    /// Model holding the foreign key field.
    pub model: String,
    /// The foreign key field.
    pub field: String,
    /// Referenced field on the target model.
    pub target_field: String,
    /// Delete policy.
    pub on_delete: OnDelete,
}

/// Concrete key path of a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPath {
    /// `source.source_field == target.target_field`.
    Direct {
        /// Field on the source model.
        source_field: String,
        /// Field on the target model.
        target_field: String,
    },
    /// Source and target linked through rows of a junction model.
    Junction {
        /// Junction model name.
        junction: String,
        /// Field on the source referenced by the junction.
        source_field: String,
        /// Junction field pointing at the source.
        junction_source: String,
        /// Junction field pointing at the target.
        junction_target: String,
        /// Field on the target referenced by the junction.
        target_field: String,
    },
}

/// A relationship resolved against the current registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJoin {
    /// Model owning the relationship.
    pub source: String,
    /// Target model.
    pub target: String,
    /// Relationship cardinality.
    pub kind: RelationshipKind,
    /// How rows are matched.
    pub path: JoinPath,
}

/// Holds the registered models in registration order.
///
/// Registration order matters: a foreign key may only point at a model that
/// is already registered (or at its own model), so exporting in this order
/// always lists targets before their referrers.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: Vec<Arc<ModelSchema>>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from persisted definitions.
    ///
    /// Foreign keys are checked against the full set, since alterations may
    /// have added references to models registered later.
    pub fn restore(entries: Vec<(ModelDef, u32)>) -> CoreResult<Self> {
        let mut registry = Self::new();
        for (def, version) in entries {
            let schema = ModelSchema::build(def, version)?;
            registry.insert(schema)?;
        }
        for schema in &registry.models {
            registry.check_foreign_keys(schema)?;
        }
        Ok(registry)
    }

    /// Registers a new model.
    pub fn register(&mut self, def: ModelDef) -> CoreResult<Arc<ModelSchema>> {
        let schema = ModelSchema::build(def, 1)?;
        if self.by_name.contains_key(schema.name()) {
            return Err(CoreError::schema(format!(
                "model {} is already registered",
                schema.name()
            )));
        }
        self.check_foreign_keys(&schema)?;
        self.insert(schema)
    }

    /// Registers a model unless an identical definition already exists.
    ///
    /// Returns the schema and whether it was newly registered.
    pub fn ensure(&mut self, def: ModelDef) -> CoreResult<(Arc<ModelSchema>, bool)> {
        let Some(existing) = self.model(&def.name).cloned() else {
            return self.register(def).map(|schema| (schema, true));
        };
        let candidate = ModelSchema::build(def, existing.version())?;
        if candidate.def() == existing.def() {
            Ok((existing, false))
        } else {
            Err(CoreError::schema(format!(
                "model {} is registered with a different definition",
                existing.name()
            )))
        }
    }

    fn insert(&mut self, schema: ModelSchema) -> CoreResult<Arc<ModelSchema>> {
        if self.by_name.contains_key(schema.name()) {
            return Err(CoreError::schema(format!(
                "duplicate model {}",
                schema.name()
            )));
        }
        let schema = Arc::new(schema);
        self.by_name.insert(schema.name().to_string(), self.models.len());
        self.models.push(Arc::clone(&schema));
        Ok(schema)
    }

    fn check_foreign_keys(&self, schema: &ModelSchema) -> CoreResult<()> {
        for field in schema.fields() {
            let Some((target_model, target_field)) = field.foreign_key_target() else {
                continue;
            };
            let target = if target_model == schema.name() {
                schema
            } else {
                self.model(target_model).map(|s| &**s).ok_or_else(|| {
                    CoreError::schema(format!(
                        "{}.{} references unknown model {target_model}",
                        schema.name(),
                        field.name
                    ))
                })?
            };
            let referenced = target.field(target_field).ok_or_else(|| {
                CoreError::schema(format!(
                    "{}.{} references unknown field {target_model}.{target_field}",
                    schema.name(),
                    field.name
                ))
            })?;
            if !field.can_reference(referenced) {
                return Err(CoreError::schema(format!(
                    "{}.{} cannot reference {target_model}.{target_field}: target must be a \
                     primary key or unique field of the same kind",
                    schema.name(),
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Looks up a model.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&Arc<ModelSchema>> {
        self.by_name.get(name).map(|&i| &self.models[i])
    }

    /// Looks up a model, failing with a schema error.
    pub fn get(&self, name: &str) -> CoreResult<&Arc<ModelSchema>> {
        self.model(name)
            .ok_or_else(|| CoreError::schema(format!("unknown model {name}")))
    }

    /// Registered models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.iter()
    }

    /// Number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Validates and normalizes a full candidate record.
    pub fn validate(
        &self,
        model: &str,
        candidate: BTreeMap<String, Value>,
        clock: &dyn Clock,
    ) -> CoreResult<BTreeMap<String, Value>> {
        validate::validate_record(self.get(model)?, candidate, clock)
    }

    /// Validates the supplied fields of an update.
    pub fn validate_partial(
        &self,
        model: &str,
        changes: BTreeMap<String, Value>,
    ) -> CoreResult<BTreeMap<String, Value>> {
        validate::validate_changes(self.get(model)?, changes)
    }

    /// Looks up a relationship declared on a model.
    pub fn resolve_relationship(&self, model: &str, name: &str) -> CoreResult<&RelationshipDef> {
        self.get(model)?.relationship(name).ok_or_else(|| {
            CoreError::schema(format!("model {model} has no relationship {name}"))
        })
    }

    /// Resolves a relationship to its concrete key path.
    pub fn resolve_join(&self, model: &str, name: &str) -> CoreResult<ResolvedJoin> {
        let rel = self.resolve_relationship(model, name)?;
        let source = self.get(model)?;
        let target = self.get(&rel.target)?;
        let explicit = rel.foreign_key.as_deref();
        let context = format!("{model}.{name}");

        let path = match rel.kind {
            RelationshipKind::ManyToOne => {
                let fk = pick(fk_candidates(source, target.name(), explicit, None), &context)?;
                forward(fk)
            }
            RelationshipKind::OneToMany => {
                let fk = pick(fk_candidates(target, source.name(), explicit, None), &context)?;
                backward(fk)
            }
            RelationshipKind::OneToOne => {
                let own = fk_candidates(source, target.name(), explicit, None);
                if own.is_empty() {
                    let fk = pick(fk_candidates(target, source.name(), explicit, None), &context)?;
                    backward(fk)
                } else {
                    forward(pick(own, &context)?)
                }
            }
            RelationshipKind::ManyToMany => {
                let junction_name = rel.through.as_deref().ok_or_else(|| {
                    CoreError::schema(format!("{context}: many_to_many requires a junction model"))
                })?;
                let junction = self.get(junction_name)?;
                let to_source = pick(
                    fk_candidates(junction, source.name(), explicit, None),
                    &context,
                )?;
                let to_target = pick(
                    fk_candidates(junction, target.name(), None, Some(&to_source.name)),
                    &context,
                )?;
                JoinPath::Junction {
                    junction: junction.name().to_string(),
                    source_field: referenced_field(to_source),
                    junction_source: to_source.name.clone(),
                    junction_target: to_target.name.clone(),
                    target_field: referenced_field(to_target),
                }
            }
        };

        Ok(ResolvedJoin {
            source: source.name().to_string(),
            target: target.name().to_string(),
            kind: rel.kind,
            path,
        })
    }

    /// Foreign keys anywhere in the registry that point at `model`.
    #[must_use]
    pub fn referencing(&self, model: &str) -> Vec<ForeignKeyLink> {
        self.models
            .iter()
            .flat_map(|schema| {
                schema.fields().iter().filter_map(move |field| {
                    let (target_model, target_field) = field.foreign_key_target()?;
                    (target_model == model).then(|| ForeignKeyLink {
                        model: schema.name().to_string(),
                        field: field.name.clone(),
                        target_field: target_field.to_string(),
                        on_delete: field.on_delete,
                    })
                })
            })
            .collect()
    }

    /// Applies one alteration and bumps the model's schema version.
    ///
    /// `has_records` tells whether the model currently stores any record;
    /// unique fields can only be added to empty models.
    pub fn alter_model(
        &mut self,
        model: &str,
        change: SchemaChange,
        has_records: bool,
    ) -> CoreResult<Arc<ModelSchema>> {
        let existing = Arc::clone(self.get(model)?);
        let mut def = existing.def().clone();

        match change {
            SchemaChange::AddField(field) => {
                if field.primary_key {
                    return Err(CoreError::schema(format!(
                        "cannot add primary key {} to {model}",
                        field.name
                    )));
                }
                if !field.nullable && field.default.is_none() {
                    return Err(CoreError::schema(format!(
                        "added field {model}.{} must be nullable or have a default",
                        field.name
                    )));
                }
                if field.unique && has_records {
                    return Err(CoreError::schema(format!(
                        "unique field {model}.{} can only be added to an empty model",
                        field.name
                    )));
                }
                def.fields.push(field);
            }
            SchemaChange::RemoveField(name) => {
                let field = existing.field(&name).ok_or_else(|| {
                    CoreError::schema(format!("model {model} has no field {name}"))
                })?;
                if field.primary_key {
                    return Err(CoreError::schema(format!(
                        "cannot remove primary key {model}.{name}"
                    )));
                }
                if let Some(link) = self
                    .referencing(model)
                    .into_iter()
                    .find(|link| link.target_field == name)
                {
                    return Err(CoreError::schema(format!(
                        "{model}.{name} is referenced by {}.{}",
                        link.model, link.field
                    )));
                }
                if self.relationship_uses(model, &name) {
                    return Err(CoreError::schema(format!(
                        "{model}.{name} is named as a relationship foreign key"
                    )));
                }
                def.fields.retain(|f| f.name != name);
            }
        }

        let schema = ModelSchema::build(def, existing.version() + 1)?;
        self.check_foreign_keys(&schema)?;
        let schema = Arc::new(schema);
        if let Some(&index) = self.by_name.get(model) {
            self.models[index] = Arc::clone(&schema);
        }
        Ok(schema)
    }

    fn relationship_uses(&self, model: &str, field: &str) -> bool {
        self.models.iter().any(|schema| {
            schema.relationships().iter().any(|rel| {
                rel.foreign_key.as_deref() == Some(field)
                    && (schema.name() == model
                        || rel.target == model
                        || rel.through.as_deref() == Some(model))
            })
        })
    }
}

fn fk_candidates<'a>(
    holder: &'a ModelSchema,
    points_at: &str,
    explicit: Option<&str>,
    exclude: Option<&str>,
) -> Vec<&'a FieldDef> {
    holder
        .fields()
        .iter()
        .filter(|f| f.foreign_key_target().is_some_and(|(m, _)| m == points_at))
        .filter(|f| explicit.map_or(true, |name| f.name == name))
        .filter(|f| exclude.map_or(true, |name| f.name != name))
        .collect()
}

fn pick<'a>(candidates: Vec<&'a FieldDef>, context: &str) -> CoreResult<&'a FieldDef> {
    match candidates.as_slice() {
        [one] => Ok(*one),
        [] => Err(CoreError::schema(format!(
            "{context}: no foreign key links the related models"
        ))),
        _ => Err(CoreError::schema(format!(
            "{context}: more than one foreign key links the related models; set foreign_key"
        ))),
    }
}

fn referenced_field(fk: &FieldDef) -> String {
    fk.foreign_key_target()
        .map(|(_, field)| field.to_string())
        .unwrap_or_default()
}

/// The source holds the foreign key.
fn forward(fk: &FieldDef) -> JoinPath {
    JoinPath::Direct {
        source_field: fk.name.clone(),
        target_field: referenced_field(fk),
    }
}

/// The target holds the foreign key.
fn backward(fk: &FieldDef) -> JoinPath {
    JoinPath::Direct {
        source_field: referenced_field(fk),
        target_field: fk.name.clone(),
    }
}
