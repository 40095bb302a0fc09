//! The record store.
//!
//! [`RecordStore`] ties the schema registry, the chunk manager and the
//! secondary indexes together. Every mutation is staged: it changes dirty
//! chunks, index deltas and counter overlays only. Nothing reaches storage
//! until the transaction manager commits the staged state.
//!
//! Reads take a [`View`]: [`View::Committed`] sees the last commit only,
//! [`View::Staged`] also sees the active transaction's writes.

mod scan;
mod write;

pub use scan::Scan;

use crate::catalog::{Catalog, ModelCounters};
use crate::chunk::{ChunkManager, Fields};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexSet;
use crate::record::Record;
use crate::schema::{ModelDef, ModelSchema, SchemaChange, SchemaRegistry};
use crate::types::{ChunkId, RecordId, View};
use crate::value::{format_datetime, IndexKey, Value};
use jsondb_storage::StorageBackend;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One staged mutation, kept so constraints can be re-checked at commit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StagedOp {
    Created { model: String, id: RecordId },
    Updated { model: String, id: RecordId },
    Deleted { model: String, id: RecordId, fields: Fields },
}

/// Schema-validated record storage over chunks.
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
    registry: SchemaRegistry,
    chunks: ChunkManager,
    indexes: IndexSet,
    next_ids: HashMap<String, u64>,
    staged_next_ids: HashMap<String, u64>,
    journal: Vec<StagedOp>,
    poisoned: bool,
    clock: Arc<dyn Clock>,
    created_at: String,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("models", &self.registry.len())
            .field("chunks", &self.chunks)
            .field("staged_ops", &self.journal.len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Opens the store persisted in `backend`, or initializes an empty one.
    ///
    /// Every committed chunk is read once to rebuild record locations and
    /// secondary indexes. Counters that disagree with the chunks are
    /// repaired and logged.
    pub fn open(
        backend: Arc<dyn StorageBackend>,
        chunk_size: usize,
        max_cached_chunks: usize,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let chunks = ChunkManager::new(Arc::clone(&backend), chunk_size, max_cached_chunks);
        let now = format_datetime(clock.now());
        let mut store = Self {
            backend,
            registry: SchemaRegistry::new(),
            chunks,
            indexes: IndexSet::new(),
            next_ids: HashMap::new(),
            staged_next_ids: HashMap::new(),
            journal: Vec::new(),
            poisoned: false,
            clock,
            created_at: now,
        };

        match Catalog::load(store.backend.as_ref())? {
            Some(catalog) => store.restore(&catalog)?,
            None => {
                store.save_catalog(View::Committed)?;
                info!("initialized empty catalog");
            }
        }
        Ok(store)
    }

    fn restore(&mut self, catalog: &Catalog) -> CoreResult<()> {
        if catalog.meta.chunk_size != self.chunks.chunk_size() {
            info!(
                stored = catalog.meta.chunk_size,
                configured = self.chunks.chunk_size(),
                "chunk_size changed; new chunks use the configured size"
            );
        }
        let defs = catalog
            .schema
            .iter()
            .map(|(name, desc)| ModelSchema::def_from_descriptor(name, desc))
            .collect::<CoreResult<Vec<_>>>()?;
        self.registry = SchemaRegistry::restore(defs)?;
        self.created_at = catalog.meta.created_at.clone();

        for (name, _) in catalog.chunks.iter() {
            if self.registry.model(name).is_none() {
                return Err(CoreError::invalid_format(format!(
                    "catalog lists chunks for unknown model {name}"
                )));
            }
        }

        let schemas: Vec<Arc<ModelSchema>> = self.registry.models().cloned().collect();
        let mut total = 0;
        for schema in &schemas {
            let name = schema.name();
            match catalog.chunks.get(name) {
                Some(directory) => self.chunks.restore_model(name, directory),
                None => self.chunks.add_model(name),
            }
            self.indexes.define(schema);
            let max_id = self.warm_up(schema)?;

            let stored = catalog.counters.get(name).copied().unwrap_or_default();
            let records = self.chunks.total_records(name, View::Committed);
            let next_id = stored.next_id.max(max_id.map_or(1, |id| id + 1)).max(1);
            if stored.next_id != 0 && next_id != stored.next_id {
                warn!(model = name, stored = stored.next_id, repaired = next_id, "repaired next_id counter");
            }
            if stored.total_records != records {
                warn!(
                    model = name,
                    stored = stored.total_records,
                    actual = records,
                    "record count in catalog does not match chunks"
                );
            }
            self.next_ids.insert(name.to_string(), next_id);
            total += records;
        }
        if catalog.meta.total_records != total {
            warn!(stored = catalog.meta.total_records, actual = total, "catalog total_records is stale");
        }
        info!(models = schemas.len(), records = total, "restored catalog");
        Ok(())
    }

    /// Reads every committed chunk of a model to rebuild locations and
    /// indexes. Returns the highest record id seen.
    fn warm_up(&mut self, schema: &ModelSchema) -> CoreResult<Option<u64>> {
        let mut max_id = None;
        for chunk_id in self.chunks.chunk_ids(schema.name(), View::Committed) {
            let chunk = self.chunks.load(schema, chunk_id, View::Committed)?;
            self.chunks.index_chunk(&chunk)?;
            for (id, fields) in &chunk.records {
                self.indexes.load(schema, *id, fields);
                max_id = max_id.max(Some(id.as_u64()));
            }
        }
        Ok(max_id)
    }

    /// The schema registry.
    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The chunk manager.
    #[must_use]
    pub const fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    /// The secondary indexes.
    #[must_use]
    pub const fn indexes(&self) -> &IndexSet {
        &self.indexes
    }

    /// The injected clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Looks up a model, failing with a schema error.
    pub fn schema(&self, model: &str) -> CoreResult<Arc<ModelSchema>> {
        self.registry.get(model).map(Arc::clone)
    }

    // ------------------------------------------------------------------
    // Schema changes. These persist the catalog immediately and must not
    // run while a transaction is active.
    // ------------------------------------------------------------------

    /// Registers a model and persists the catalog.
    pub fn register(&mut self, def: ModelDef) -> CoreResult<Arc<ModelSchema>> {
        let mut registry = self.registry.clone();
        let schema = registry.register(def)?;
        self.install_model(registry, &schema)?;
        info!(model = schema.name(), "registered model");
        Ok(schema)
    }

    /// Registers a model unless an identical definition already exists.
    ///
    /// Returns the schema and whether it was newly registered.
    pub fn ensure(&mut self, def: ModelDef) -> CoreResult<(Arc<ModelSchema>, bool)> {
        let mut registry = self.registry.clone();
        let (schema, created) = registry.ensure(def)?;
        if created {
            self.install_model(registry, &schema)?;
            info!(model = schema.name(), "registered model");
        }
        Ok((schema, created))
    }

    fn install_model(&mut self, registry: SchemaRegistry, schema: &ModelSchema) -> CoreResult<()> {
        let name = schema.name().to_string();
        self.catalog_for(&registry, View::Committed)
            .save(self.backend.as_ref())?;
        self.registry = registry;
        self.chunks.add_model(&name);
        self.indexes.define(schema);
        self.next_ids.insert(name, 1);
        Ok(())
    }

    /// Applies a schema alteration, rebuilds the model's indexes and
    /// persists the catalog.
    ///
    /// Stored records are normalized lazily: chunks are decoded against the
    /// new definition the next time they are read.
    pub fn alter_model(&mut self, model: &str, change: SchemaChange) -> CoreResult<Arc<ModelSchema>> {
        let has_records = self.chunks.total_records(model, View::Committed) > 0;
        let mut registry = self.registry.clone();
        let schema = registry.alter_model(model, change, has_records)?;

        self.chunks.forget_model_cache(model);
        let entries = match self.collect_index_entries(&schema) {
            Ok(entries) => entries,
            Err(e) => {
                self.chunks.forget_model_cache(model);
                return Err(e);
            }
        };
        if let Err(e) = self
            .catalog_for(&registry, View::Committed)
            .save(self.backend.as_ref())
        {
            self.chunks.forget_model_cache(model);
            return Err(e);
        }

        self.registry = registry;
        self.indexes.define(&schema);
        for (id, fields) in &entries {
            self.indexes.load(&schema, *id, fields);
        }
        info!(model, version = schema.version(), "altered model");
        Ok(schema)
    }

    fn collect_index_entries(&self, schema: &ModelSchema) -> CoreResult<Vec<(RecordId, Fields)>> {
        let mut entries = Vec::new();
        for chunk_id in self.chunks.chunk_ids(schema.name(), View::Committed) {
            let chunk = self.chunks.load(schema, chunk_id, View::Committed)?;
            entries.extend(chunk.records.iter().map(|(id, f)| (*id, f.clone())));
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns a record, or `None` if it does not exist.
    pub fn find(&self, model: &str, id: RecordId, view: View) -> CoreResult<Option<Record>> {
        let schema = self.registry.get(model)?;
        let Some(chunk_id) = self.chunks.locate(model, id, view) else {
            return Ok(None);
        };
        Ok(self.chunks.load(schema, chunk_id, view)?.record(id))
    }

    /// Returns a record or a not-found error.
    pub fn get(&self, model: &str, id: RecordId, view: View) -> CoreResult<Record> {
        self.find(model, id, view)?
            .ok_or_else(|| CoreError::not_found(model, id.as_u64()))
    }

    /// Returns true if the record exists.
    pub fn exists(&self, model: &str, id: RecordId, view: View) -> CoreResult<bool> {
        self.registry.get(model)?;
        Ok(self.chunks.locate(model, id, view).is_some())
    }

    /// Number of records stored for a model.
    pub fn count(&self, model: &str, view: View) -> CoreResult<u64> {
        self.registry.get(model)?;
        Ok(self.chunks.total_records(model, view))
    }

    /// Iterates over a model's records in chunk order, loading one chunk at
    /// a time.
    pub fn scan(&self, model: &str, view: View) -> CoreResult<Scan<'_>> {
        let schema = self.schema(model)?;
        Ok(Scan::new(self, schema, view))
    }

    /// Ids of the records whose `field` equals `value`, ascending.
    ///
    /// Uses the record location map for primary keys and the secondary
    /// index for indexed fields; other fields are scanned. Null never
    /// matches.
    pub fn ids_matching(&self, model: &str, field: &str, value: &Value, view: View) -> CoreResult<Vec<RecordId>> {
        let schema = self.schema(model)?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        if schema.primary_key().name == field {
            let id = match value {
                Value::Int(i) => u64::try_from(*i).ok(),
                Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Some(*f as u64),
                _ => None,
            };
            return Ok(id
                .map(RecordId::new)
                .filter(|id| self.chunks.locate(model, *id, view).is_some())
                .into_iter()
                .collect());
        }
        if let Some(ids) = self.indexes.lookup(model, field, value, view) {
            return Ok(ids);
        }
        let key = IndexKey::from(value);
        let mut ids = Vec::new();
        for record in self.scan(model, view)? {
            let record = record?;
            if record.get(field).is_some_and(|v| IndexKey::from(v) == key) {
                ids.push(record.id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub(crate) fn next_id(&self, model: &str, view: View) -> u64 {
        if view == View::Staged {
            if let Some(next) = self.staged_next_ids.get(model) {
                return *next;
            }
        }
        self.next_ids.get(model).copied().unwrap_or(1)
    }

    // ------------------------------------------------------------------
    // Staged state
    // ------------------------------------------------------------------

    /// Returns true if the next commit has anything to write.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.chunks.has_staged_changes()
            || self.chunks.has_stale_chunks()
            || !self.staged_next_ids.is_empty()
    }

    /// Returns true if a failed multi-record operation left partial staged
    /// changes behind. Such a transaction can only be rolled back.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of staged operations.
    #[must_use]
    pub fn staged_ops(&self) -> usize {
        self.journal.len()
    }

    /// Builds the catalog describing `view`.
    #[must_use]
    pub fn catalog(&self, view: View) -> Catalog {
        self.catalog_for(&self.registry, view)
    }

    fn catalog_for(&self, registry: &SchemaRegistry, view: View) -> Catalog {
        let mut catalog = Catalog::new(self.chunks.chunk_size(), &self.created_at);
        catalog.meta.last_updated = format_datetime(self.clock.now());
        for schema in registry.models() {
            let name = schema.name();
            let total_records = self.chunks.total_records(name, view);
            catalog.schema.insert(name, schema.to_descriptor());
            catalog.chunks.insert(name, self.chunks.directory(name, view));
            catalog.counters.insert(
                name,
                ModelCounters {
                    next_id: self.next_id(name, view),
                    total_records,
                },
            );
            catalog.meta.total_records += total_records;
        }
        catalog
    }

    /// Atomically writes the catalog describing `view`.
    pub fn save_catalog(&self, view: View) -> CoreResult<()> {
        self.catalog(view).save(self.backend.as_ref())?;
        debug!(?view, "saved catalog");
        Ok(())
    }

    /// Makes every staged change committed. Call after the dirty chunks and
    /// the catalog have been written.
    pub fn commit_staged(&mut self) {
        self.chunks.commit_staged();
        self.indexes.commit_staged();
        for (model, next) in self.staged_next_ids.drain() {
            self.next_ids.insert(model, next);
        }
        self.journal.clear();
        self.poisoned = false;
    }

    /// Drops every staged change. `written` lists chunk files a failed
    /// commit already replaced.
    pub fn discard_staged(&mut self, written: &[(String, ChunkId)]) {
        self.chunks.discard_staged(written);
        self.indexes.discard_staged();
        self.staged_next_ids.clear();
        self.journal.clear();
        self.poisoned = false;
    }

    /// Re-checks uniqueness and foreign keys for every staged operation in
    /// the order they were applied.
    pub fn verify_staged(&self) -> CoreResult<()> {
        let mut checked = HashSet::new();
        for op in &self.journal {
            match op {
                StagedOp::Created { model, id } | StagedOp::Updated { model, id } => {
                    if !checked.insert((model.as_str(), *id)) {
                        continue;
                    }
                    let Some(record) = self.find(model, *id, View::Staged)? else {
                        continue;
                    };
                    let schema = self.schema(model)?;
                    self.check_unique(&schema, *id, &record.values, None)?;
                    self.check_foreign_keys(&schema, &record.values, None)?;
                }
                StagedOp::Deleted { model, fields, .. } => {
                    self.check_unreferenced(model, fields)?;
                }
            }
        }
        Ok(())
    }
}
