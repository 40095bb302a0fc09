//! Secondary indexes.
//!
//! Every `unique`, `index`, or foreign key field gets an in-memory equality
//! index. Indexes are not persisted; they are rebuilt from the chunks when a
//! database is opened.
//!
//! Writes inside a transaction go to a staged delta per index, so the
//! committed indexes keep serving readers outside the transaction until
//! the commit succeeds.

mod secondary;

pub use secondary::SecondaryIndex;

use crate::chunk::Fields;
use crate::schema::ModelSchema;
use crate::types::{RecordId, View};
use crate::value::{IndexKey, Value};
use std::collections::{BTreeSet, HashMap};

type IndexName = (String, String);

#[derive(Debug, Default)]
struct IndexDelta {
    added: HashMap<IndexKey, BTreeSet<RecordId>>,
    removed: HashMap<IndexKey, BTreeSet<RecordId>>,
}

impl IndexDelta {
    fn insert(&mut self, key: IndexKey, id: RecordId) {
        let unremoved = self
            .removed
            .get_mut(&key)
            .is_some_and(|ids| ids.remove(&id));
        if !unremoved {
            self.added.entry(key).or_default().insert(id);
        }
    }

    fn remove(&mut self, key: IndexKey, id: RecordId) {
        let unadded = self
            .added
            .get_mut(&key)
            .is_some_and(|ids| ids.remove(&id));
        if !unadded {
            self.removed.entry(key).or_default().insert(id);
        }
    }
}

/// All secondary indexes of a database.
#[derive(Debug, Default)]
pub struct IndexSet {
    committed: HashMap<IndexName, SecondaryIndex>,
    staged: HashMap<IndexName, IndexDelta>,
}

fn name(model: &str, field: &str) -> IndexName {
    (model.to_string(), field.to_string())
}

impl IndexSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)creates empty committed indexes for a model's indexed fields,
    /// dropping any index the model no longer declares.
    pub fn define(&mut self, schema: &ModelSchema) {
        self.committed.retain(|(model, _), _| model != schema.name());
        self.staged.retain(|(model, _), _| model != schema.name());
        for field in schema.indexed_fields() {
            self.committed
                .insert(name(schema.name(), &field.name), SecondaryIndex::new());
        }
    }

    /// Returns true if `model.field` is indexed.
    #[must_use]
    pub fn has_index(&self, model: &str, field: &str) -> bool {
        self.committed.contains_key(&name(model, field))
    }

    /// Returns the committed index of a field.
    #[must_use]
    pub fn get(&self, model: &str, field: &str) -> Option<&SecondaryIndex> {
        self.committed.get(&name(model, field))
    }

    /// Adds a committed record to the committed indexes. Used when
    /// rebuilding indexes from storage.
    pub fn load(&mut self, schema: &ModelSchema, id: RecordId, fields: &Fields) {
        for field in schema.indexed_fields() {
            if let (Some(index), Some(value)) = (
                self.committed.get_mut(&name(schema.name(), &field.name)),
                fields.get(&field.name),
            ) {
                index.insert(IndexKey::from(value), id);
            }
        }
    }

    /// Stages index entries for a new or updated record.
    pub fn stage_insert(&mut self, schema: &ModelSchema, id: RecordId, fields: &Fields) {
        for field in schema.indexed_fields() {
            let Some(value) = fields.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            self.staged
                .entry(name(schema.name(), &field.name))
                .or_default()
                .insert(IndexKey::from(value), id);
        }
    }

    /// Stages removal of a record's index entries.
    pub fn stage_remove(&mut self, schema: &ModelSchema, id: RecordId, fields: &Fields) {
        for field in schema.indexed_fields() {
            let Some(value) = fields.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            self.staged
                .entry(name(schema.name(), &field.name))
                .or_default()
                .remove(IndexKey::from(value), id);
        }
    }

    /// Record ids whose `field` equals `value`, ascending.
    ///
    /// Returns `None` if the field is not indexed. Null never matches.
    #[must_use]
    pub fn lookup(&self, model: &str, field: &str, value: &Value, view: View) -> Option<Vec<RecordId>> {
        let index_name = name(model, field);
        let index = self.committed.get(&index_name)?;
        if value.is_null() {
            return Some(Vec::new());
        }
        let key = IndexKey::from(value);
        let mut ids: BTreeSet<RecordId> = index.lookup(&key).cloned().unwrap_or_default();
        if view == View::Staged {
            if let Some(delta) = self.staged.get(&index_name) {
                if let Some(removed) = delta.removed.get(&key) {
                    ids.retain(|id| !removed.contains(id));
                }
                if let Some(added) = delta.added.get(&key) {
                    ids.extend(added.iter().copied());
                }
            }
        }
        Some(ids.into_iter().collect())
    }

    /// Applies staged deltas to the committed indexes.
    pub fn commit_staged(&mut self) {
        for (index_name, delta) in self.staged.drain() {
            let Some(index) = self.committed.get_mut(&index_name) else {
                continue;
            };
            for (key, ids) in delta.removed {
                for id in ids {
                    index.remove(&key, id);
                }
            }
            for (key, ids) in delta.added {
                for id in ids {
                    index.insert(key.clone(), id);
                }
            }
        }
    }

    /// Drops staged deltas.
    pub fn discard_staged(&mut self) {
        self.staged.clear();
    }
}
