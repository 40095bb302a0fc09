//! Export interface for migration tooling.
//!
//! A migration collaborator reads the schema with
//! [`Database::export_schema`] and then streams each model's committed
//! records with [`Database::export_records`]. Foreign key targets come before
//! the models referencing them, even for keys added by schema alteration.

use crate::database::Database;
use crate::error::CoreResult;
use crate::record::Record;
use crate::schema::{FieldDef, ModelDescriptor, ModelSchema, RelationshipDef};
use crate::types::{ChunkId, View};
use std::fmt;

/// Exported definition of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelExport {
    /// Model name.
    pub model: String,
    /// Schema version.
    pub version: u32,
    /// Fields in definition order.
    pub fields: Vec<FieldDef>,
    /// Relationships in definition order.
    pub relationships: Vec<RelationshipDef>,
}

impl ModelExport {
    pub(crate) fn from_schema(schema: &ModelSchema) -> Self {
        Self {
            model: schema.name().to_string(),
            version: schema.version(),
            fields: schema.fields().to_vec(),
            relationships: schema.relationships().to_vec(),
        }
    }

    /// The definition in its catalog form.
    #[must_use]
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            version: self.version,
            fields: self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.to_descriptor()))
                .collect(),
            relationships: self
                .relationships
                .iter()
                .map(|r| (r.name.clone(), r.to_descriptor()))
                .collect(),
        }
    }
}

/// Orders exported models so every foreign key target precedes the models
/// referencing it, keeping registration order otherwise. Self references
/// are ignored. Models caught in a reference cycle keep registration order.
pub(crate) fn dependency_order(mut pending: Vec<ModelExport>) -> Vec<ModelExport> {
    let mut ordered: Vec<ModelExport> = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|m| {
                m.fields
                    .iter()
                    .filter_map(FieldDef::foreign_key_target)
                    .all(|(target, _)| {
                        target == m.model || !pending.iter().any(|p| p.model == target)
                    })
            })
            .unwrap_or(0);
        ordered.push(pending.remove(ready));
    }
    ordered
}

/// Lazy iterator over a model's committed records.
///
/// Records are read one chunk at a time, taking the database read lock only
/// while a chunk is loaded. The set of chunks is fixed when the iterator is
/// created; [`RecordExport::restart`] starts over from the first chunk of
/// the current committed state.
pub struct RecordExport<'db> {
    db: &'db Database,
    model: String,
    chunks: Vec<ChunkId>,
    next_chunk: usize,
    buffer: std::vec::IntoIter<Record>,
}

impl fmt::Debug for RecordExport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordExport")
            .field("model", &self.model)
            .field("chunks", &self.chunks.len())
            .field("next_chunk", &self.next_chunk)
            .finish_non_exhaustive()
    }
}

impl<'db> RecordExport<'db> {
    pub(crate) fn new(db: &'db Database, model: &str) -> CoreResult<Self> {
        let chunks = db.with_store(|store| {
            store.schema(model)?;
            Ok(store.chunks().chunk_ids(model, View::Committed))
        })?;
        Ok(Self {
            db,
            model: model.to_string(),
            chunks,
            next_chunk: 0,
            buffer: Vec::new().into_iter(),
        })
    }

    /// The exported model.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Starts over from the first committed chunk.
    pub fn restart(&mut self) -> CoreResult<()> {
        let model = self.model.as_str();
        self.chunks = self
            .db
            .with_store(|store| Ok(store.chunks().chunk_ids(model, View::Committed)))?;
        self.next_chunk = 0;
        self.buffer = Vec::new().into_iter();
        Ok(())
    }

    fn load_next(&mut self) -> Option<CoreResult<()>> {
        let id = *self.chunks.get(self.next_chunk)?;
        self.next_chunk += 1;
        let model = self.model.as_str();
        let loaded = self.db.with_store(|store| {
            let schema = store.schema(model)?;
            let chunk = store.chunks().load(&schema, id, View::Committed)?;
            Ok(chunk
                .records
                .iter()
                .map(|(id, fields)| Record::new(*id, fields.clone()))
                .collect::<Vec<_>>())
        });
        Some(loaded.map(|records| self.buffer = records.into_iter()))
    }
}

impl Iterator for RecordExport<'_> {
    type Item = CoreResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.next() {
                return Some(Ok(record));
            }
            match self.load_next()? {
                Ok(()) => {}
                Err(e) => {
                    self.next_chunk = self.chunks.len();
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{field, Query};
    use crate::schema::{FieldDef, ModelDef, RelationshipDef, SchemaChange};
    use crate::{Config, Database};
    use jsondb_storage::InMemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn db() -> Database {
        let db = Database::open_with_backend(
            Arc::new(InMemoryBackend::new()),
            Config::new().chunk_size(2),
        )
        .unwrap();
        db.register(
            ModelDef::new("User")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::string("name"))
                .relationship(RelationshipDef::one_to_many("posts", "Post")),
        )
        .unwrap();
        db.register(
            ModelDef::new("Post")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::integer("author_id").foreign_key("User.id")),
        )
        .unwrap();
        db
    }

    #[test]
    fn schema_in_registration_order() {
        let db = db();
        let exported = db.export_schema();

        let names: Vec<_> = exported.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(names, ["User", "Post"]);
        assert_eq!(exported[0].relationships[0].name, "posts");
        assert_eq!(exported[1].fields[1].foreign_key.as_deref(), Some("User.id"));
        assert_eq!(exported[0].descriptor().fields.len(), 2);
    }

    #[test]
    fn altered_foreign_keys_reorder_the_schema() {
        let db = Database::open_in_memory().unwrap();
        for name in ["Invoice", "Customer", "Region"] {
            db.register(ModelDef::new(name).field(FieldDef::integer("id").primary_key()))
                .unwrap();
        }
        db.alter_model(
            "Invoice",
            SchemaChange::AddField(FieldDef::integer("customer_id").foreign_key("Customer.id")),
        )
        .unwrap();
        db.alter_model(
            "Customer",
            SchemaChange::AddField(FieldDef::integer("region_id").foreign_key("Region.id")),
        )
        .unwrap();
        db.alter_model(
            "Region",
            SchemaChange::AddField(FieldDef::integer("parent_id").foreign_key("Region.id")),
        )
        .unwrap();

        let names: Vec<_> = db.export_schema().into_iter().map(|m| m.model).collect();
        assert_eq!(names, ["Region", "Customer", "Invoice"]);
    }

    #[test]
    fn records_stream_across_chunks() {
        let db = db();
        for name in ["a", "b", "c", "d", "e"] {
            db.create("User", json!({ "name": name })).unwrap();
        }

        let ids: Vec<u64> = db
            .export_records("User")
            .unwrap()
            .map(|r| r.unwrap().id.as_u64())
            .collect();
        assert_eq!(ids, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn only_committed_records_are_exported() {
        let db = db();
        db.create("User", json!({ "name": "a" })).unwrap();
        let txn = db.begin().unwrap();
        txn.create("User", json!({ "name": "b" })).unwrap();

        assert_eq!(db.export_records("User").unwrap().count(), 1);
        txn.rollback().unwrap();
    }

    #[test]
    fn restart_sees_new_chunks() {
        let db = db();
        db.create("User", json!({ "name": "a" })).unwrap();
        let mut export = db.export_records("User").unwrap();
        assert_eq!(export.by_ref().count(), 1);

        db.create("User", json!({ "name": "b" })).unwrap();
        db.create("User", json!({ "name": "c" })).unwrap();
        export.restart().unwrap();
        assert_eq!(export.count(), 3);
    }

    #[test]
    fn exported_records_follow_altered_schema() {
        let db = db();
        db.create("User", json!({ "name": "a" })).unwrap();
        db.alter_model(
            "User",
            SchemaChange::AddField(FieldDef::integer("age").default(7)),
        )
        .unwrap();

        let record = db.export_records("User").unwrap().next().unwrap().unwrap();
        assert_eq!(record.get("age"), Some(&crate::Value::Int(7)));
        let adults = Query::from("User").filter(field("age").ge(7));
        assert_eq!(db.query_count(&adults).unwrap(), 1);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let db = db();
        assert!(db.export_records("Nope").is_err());
    }
}
