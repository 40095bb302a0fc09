//! The chunk manager.

use super::cache::ChunkCache;
use super::file::{Chunk, Fields};
use crate::catalog::{chunk_key, ChunkDirectory};
use crate::error::{CoreError, CoreResult};
use crate::schema::ModelSchema;
use crate::types::{ChunkId, RecordId, View};
use jsondb_storage::StorageBackend;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct ChunkSlot {
    records: usize,
    key: String,
}

/// Allocated chunks of one model with their record counts.
#[derive(Debug, Clone, Default)]
struct ModelLayout {
    chunks: BTreeMap<ChunkId, ChunkSlot>,
}

impl ModelLayout {
    fn current(&self) -> Option<ChunkId> {
        self.chunks.keys().next_back().copied()
    }

    fn total_records(&self) -> u64 {
        self.chunks.values().map(|slot| slot.records as u64).sum()
    }
}

/// A chunk with staged changes.
#[derive(Debug)]
struct DirtyChunk {
    chunk: Arc<Chunk>,
    /// Committed content, absent for chunks allocated by the transaction.
    base: Option<Arc<Chunk>>,
}

/// Maps records to chunks, loads chunks lazily and flushes dirty ones.
///
/// Two layers of state are kept:
///
/// - **Committed**: chunk layouts, record locations and a bounded cache of
///   clean chunks, reflecting the last successful commit.
/// - **Staged**: copy-on-write overlays for layouts and locations plus the
///   dirty chunk set, holding the active transaction's changes.
///
/// Readers asking for [`View::Committed`] never see staged state.
///
/// When a commit fails after some chunks were written, those files hold
/// content the catalog does not describe. The committed copies of such
/// chunks are kept as *stale* and rewritten by the next commit.
pub struct ChunkManager {
    backend: Arc<dyn StorageBackend>,
    chunk_size: usize,
    layouts: HashMap<String, ModelLayout>,
    staged_layouts: HashMap<String, ModelLayout>,
    locations: HashMap<String, HashMap<RecordId, ChunkId>>,
    staged_locations: HashMap<String, HashMap<RecordId, Option<ChunkId>>>,
    dirty: BTreeMap<(String, ChunkId), DirtyChunk>,
    stale: BTreeMap<(String, ChunkId), Arc<Chunk>>,
    cache: Mutex<ChunkCache>,
}

impl fmt::Debug for ChunkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkManager")
            .field("chunk_size", &self.chunk_size)
            .field("models", &self.layouts.len())
            .field("dirty", &self.dirty.len())
            .field("stale", &self.stale.len())
            .field("cache", &*self.cache.lock())
            .finish_non_exhaustive()
    }
}

impl ChunkManager {
    /// Creates a manager over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, chunk_size: usize, max_cached_chunks: usize) -> Self {
        Self {
            backend,
            chunk_size,
            layouts: HashMap::new(),
            staged_layouts: HashMap::new(),
            locations: HashMap::new(),
            staged_locations: HashMap::new(),
            dirty: BTreeMap::new(),
            stale: BTreeMap::new(),
            cache: Mutex::new(ChunkCache::new(max_cached_chunks)),
        }
    }

    /// Records per chunk.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Registers a model with no chunks.
    pub fn add_model(&mut self, model: &str) {
        self.layouts.entry(model.to_string()).or_default();
        self.locations.entry(model.to_string()).or_default();
    }

    /// Restores a model's committed chunk directory from the catalog.
    ///
    /// Record counts and locations are filled in by [`ChunkManager::index_chunk`].
    pub fn restore_model(&mut self, model: &str, directory: &ChunkDirectory) {
        let layout = ModelLayout {
            chunks: directory
                .chunks
                .iter()
                .map(|(id, key)| {
                    (
                        ChunkId::new(*id),
                        ChunkSlot {
                            records: 0,
                            key: key.clone(),
                        },
                    )
                })
                .collect(),
        };
        self.layouts.insert(model.to_string(), layout);
        self.locations.entry(model.to_string()).or_default();
    }

    /// Records where each record of a committed chunk lives.
    pub fn index_chunk(&mut self, chunk: &Chunk) -> CoreResult<()> {
        let locations = self.locations.entry(chunk.model.clone()).or_default();
        for id in chunk.records.keys() {
            if let Some(other) = locations.insert(*id, chunk.id) {
                return Err(CoreError::invalid_format(format!(
                    "record {id} of {} is stored in both {other} and {}",
                    chunk.model, chunk.id
                )));
            }
        }
        if let Some(slot) = self
            .layouts
            .get_mut(&chunk.model)
            .and_then(|layout| layout.chunks.get_mut(&chunk.id))
        {
            slot.records = chunk.len();
        }
        Ok(())
    }

    fn layout(&self, model: &str, view: View) -> Option<&ModelLayout> {
        if view == View::Staged {
            if let Some(layout) = self.staged_layouts.get(model) {
                return Some(layout);
            }
        }
        self.layouts.get(model)
    }

    fn staged_layout_mut(&mut self, model: &str) -> &mut ModelLayout {
        if !self.staged_layouts.contains_key(model) {
            let base = self.layouts.get(model).cloned().unwrap_or_default();
            self.staged_layouts.insert(model.to_string(), base);
        }
        self.staged_layouts.entry(model.to_string()).or_default()
    }

    /// Chunk ids of a model in ascending order.
    #[must_use]
    pub fn chunk_ids(&self, model: &str, view: View) -> Vec<ChunkId> {
        self.layout(model, view)
            .map(|layout| layout.chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Records stored for a model.
    #[must_use]
    pub fn total_records(&self, model: &str, view: View) -> u64 {
        self.layout(model, view)
            .map_or(0, ModelLayout::total_records)
    }

    /// Record count of each chunk of a model.
    #[must_use]
    pub fn chunk_counts(&self, model: &str, view: View) -> Vec<(ChunkId, usize)> {
        self.layout(model, view)
            .map(|layout| {
                layout
                    .chunks
                    .iter()
                    .map(|(id, slot)| (*id, slot.records))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The chunk directory of a model, as written to the catalog.
    #[must_use]
    pub fn directory(&self, model: &str, view: View) -> ChunkDirectory {
        let Some(layout) = self.layout(model, view) else {
            return ChunkDirectory::default();
        };
        ChunkDirectory {
            current_chunk: layout.current().map_or(0, ChunkId::as_u64),
            total_chunks: layout.chunks.len() as u64,
            chunks: layout
                .chunks
                .iter()
                .map(|(id, slot)| (id.as_u64(), slot.key.clone()))
                .collect(),
        }
    }

    /// Finds the chunk holding a record.
    #[must_use]
    pub fn locate(&self, model: &str, id: RecordId, view: View) -> Option<ChunkId> {
        if view == View::Staged {
            if let Some(staged) = self.staged_locations.get(model).and_then(|m| m.get(&id)) {
                return *staged;
            }
        }
        self.locations.get(model)?.get(&id).copied()
    }

    /// Returns a chunk, reading it from storage if it is not resident.
    ///
    /// Only the requested chunk is read.
    pub fn load(
        &self,
        schema: &ModelSchema,
        id: ChunkId,
        view: View,
    ) -> CoreResult<Arc<Chunk>> {
        let model = schema.name();
        let key = (model.to_string(), id);
        if view == View::Staged {
            if let Some(dirty) = self.dirty.get(&key) {
                return Ok(Arc::clone(&dirty.chunk));
            }
        }
        if let Some(chunk) = self.stale.get(&key) {
            return Ok(Arc::clone(chunk));
        }
        if let Some(chunk) = self.cache.lock().get(model, id) {
            return Ok(chunk);
        }

        let path = self
            .layout(model, View::Committed)
            .and_then(|layout| layout.chunks.get(&id))
            .map(|slot| slot.key.clone())
            .ok_or_else(|| {
                CoreError::invalid_format(format!("{model} has no committed chunk {id}"))
            })?;
        let data = self.backend.read(&path)?.ok_or_else(|| {
            CoreError::invalid_format(format!("chunk file {path} is missing"))
        })?;
        let chunk = Arc::new(Chunk::decode(&data, schema, id)?);
        debug!(model, chunk = id.as_u64(), records = chunk.len(), "loaded chunk");

        let mut cache = self.cache.lock();
        cache.set_digest(model, id, Sha256::digest(&data).into());
        cache.insert(model, id, Arc::clone(&chunk));
        for (model, id) in cache.shrink() {
            debug!(model, chunk = id.as_u64(), "evicted chunk");
        }
        Ok(chunk)
    }

    /// Picks the chunk that must hold a new record.
    ///
    /// Records go to the current (highest) chunk. When it already holds
    /// `chunk_size` records, a new chunk is allocated, becomes current, and
    /// the previous chunk's `next_chunk` link is pointed at it.
    pub fn place(&mut self, schema: &ModelSchema, record: RecordId) -> CoreResult<ChunkId> {
        let model = schema.name();
        let chunk_size = self.chunk_size;
        let layout = self.staged_layout_mut(model);
        let (previous, new_id) = match layout.current() {
            Some(current) => {
                let full = layout
                    .chunks
                    .get(&current)
                    .is_some_and(|slot| slot.records >= chunk_size);
                if !full {
                    return Ok(current);
                }
                (Some(current), current.next())
            }
            None => (None, ChunkId::FIRST),
        };

        if let Some(previous) = previous {
            Arc::make_mut(self.make_dirty(schema, previous)?).next_chunk = Some(new_id);
        }
        self.staged_layout_mut(model).chunks.insert(
            new_id,
            ChunkSlot {
                records: 0,
                key: chunk_key(model, new_id),
            },
        );
        self.dirty.insert(
            (model.to_string(), new_id),
            DirtyChunk {
                chunk: Arc::new(Chunk::new(model, new_id)),
                base: None,
            },
        );
        debug!(model, chunk = new_id.as_u64(), record = record.as_u64(), "allocated chunk");
        Ok(new_id)
    }

    fn make_dirty(&mut self, schema: &ModelSchema, id: ChunkId) -> CoreResult<&mut Arc<Chunk>> {
        let key = (schema.name().to_string(), id);
        if !self.dirty.contains_key(&key) {
            let base = self.load(schema, id, View::Committed)?;
            self.dirty.insert(
                key.clone(),
                DirtyChunk {
                    chunk: Arc::clone(&base),
                    base: Some(base),
                },
            );
        }
        self.dirty
            .get_mut(&key)
            .map(|dirty| &mut dirty.chunk)
            .ok_or_else(|| CoreError::invalid_format(format!("chunk {id} vanished")))
    }

    fn set_count(&mut self, model: &str, id: ChunkId, records: usize) {
        if let Some(slot) = self.staged_layout_mut(model).chunks.get_mut(&id) {
            slot.records = records;
        }
    }

    /// Stages a new record in the chunk chosen by [`ChunkManager::place`].
    pub fn insert(&mut self, schema: &ModelSchema, id: RecordId, fields: Fields) -> CoreResult<ChunkId> {
        let chunk_id = self.place(schema, id)?;
        let chunk = Arc::make_mut(self.make_dirty(schema, chunk_id)?);
        chunk.records.insert(id, fields);
        let count = chunk.len();
        self.set_count(schema.name(), chunk_id, count);
        self.staged_locations
            .entry(schema.name().to_string())
            .or_default()
            .insert(id, Some(chunk_id));
        debug!(model = schema.name(), record = id.as_u64(), chunk = chunk_id.as_u64(), "staged insert");
        Ok(chunk_id)
    }

    /// Stages new field values for an existing record.
    pub fn replace(&mut self, schema: &ModelSchema, id: RecordId, fields: Fields) -> CoreResult<()> {
        let chunk_id = self
            .locate(schema.name(), id, View::Staged)
            .ok_or_else(|| CoreError::not_found(schema.name(), id.as_u64()))?;
        Arc::make_mut(self.make_dirty(schema, chunk_id)?)
            .records
            .insert(id, fields);
        Ok(())
    }

    /// Stages the removal of a record, returning its last field values.
    pub fn remove(&mut self, schema: &ModelSchema, id: RecordId) -> CoreResult<Fields> {
        let chunk_id = self
            .locate(schema.name(), id, View::Staged)
            .ok_or_else(|| CoreError::not_found(schema.name(), id.as_u64()))?;
        let chunk = Arc::make_mut(self.make_dirty(schema, chunk_id)?);
        let fields = chunk
            .records
            .remove(&id)
            .ok_or_else(|| CoreError::not_found(schema.name(), id.as_u64()))?;
        let count = chunk.len();
        self.set_count(schema.name(), chunk_id, count);
        self.staged_locations
            .entry(schema.name().to_string())
            .or_default()
            .insert(id, None);
        Ok(fields)
    }

    /// Returns true if the chunk has staged changes.
    #[must_use]
    pub fn is_dirty(&self, model: &str, id: ChunkId) -> bool {
        self.dirty.contains_key(&(model.to_string(), id))
    }

    /// Returns true if anything is staged.
    #[must_use]
    pub fn has_staged_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.staged_locations.is_empty()
    }

    /// Returns true if chunks from a failed commit await rewriting.
    #[must_use]
    pub fn has_stale_chunks(&self) -> bool {
        !self.stale.is_empty()
    }

    /// Chunks the next commit must write, in ascending (model, chunk id)
    /// order: every dirty chunk plus every stale one.
    #[must_use]
    pub fn pending_flushes(&self) -> Vec<(String, ChunkId, Arc<Chunk>)> {
        let mut pending: BTreeMap<(String, ChunkId), Arc<Chunk>> = self
            .stale
            .iter()
            .map(|(key, chunk)| (key.clone(), Arc::clone(chunk)))
            .collect();
        for (key, dirty) in &self.dirty {
            pending.insert(key.clone(), Arc::clone(&dirty.chunk));
        }
        pending
            .into_iter()
            .map(|((model, id), chunk)| (model, id, chunk))
            .collect()
    }

    /// Atomically replaces a chunk's persisted content.
    ///
    /// Returns `false` without writing when the encoded bytes match the
    /// last persisted bytes.
    pub fn flush(&self, model: &str, id: ChunkId, chunk: &Chunk) -> CoreResult<bool> {
        let path = self
            .layout(model, View::Staged)
            .and_then(|layout| layout.chunks.get(&id))
            .map_or_else(|| chunk_key(model, id), |slot| slot.key.clone());
        let data = chunk.encode()?;
        let digest: [u8; 32] = Sha256::digest(&data).into();

        if self.cache.lock().digest(model, id) == Some(digest) {
            debug!(model, chunk = id.as_u64(), "chunk unchanged, skipping write");
            return Ok(false);
        }
        self.backend.write_atomic(&path, &data)?;
        self.cache.lock().set_digest(model, id, digest);
        debug!(model, chunk = id.as_u64(), bytes = data.len(), "flushed chunk");
        Ok(true)
    }

    /// Drops the resident copy of a chunk.
    ///
    /// Returns `false` and does nothing if the chunk is dirty or not
    /// resident.
    pub fn evict(&self, model: &str, id: ChunkId) -> bool {
        if self.is_dirty(model, id) {
            return false;
        }
        let evicted = self.cache.lock().remove(model, id);
        if evicted {
            debug!(model, chunk = id.as_u64(), "evicted chunk");
        }
        evicted
    }

    /// Returns true if a clean copy of the chunk is resident.
    #[must_use]
    pub fn is_cached(&self, model: &str, id: ChunkId) -> bool {
        self.cache.lock().contains(model, id)
    }

    /// Number of resident clean chunks.
    #[must_use]
    pub fn cached_chunks(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drops every resident chunk of a model so it is decoded again against
    /// a changed schema.
    pub fn forget_model_cache(&self, model: &str) {
        self.cache.lock().remove_model(model);
    }

    /// Makes staged state the committed state.
    ///
    /// Call only after every chunk from [`ChunkManager::pending_flushes`]
    /// has been written.
    pub fn commit_staged(&mut self) {
        for (model, layout) in self.staged_layouts.drain() {
            self.layouts.insert(model, layout);
        }
        for (model, changes) in self.staged_locations.drain() {
            let locations = self.locations.entry(model).or_default();
            for (id, chunk) in changes {
                match chunk {
                    Some(chunk) => locations.insert(id, chunk),
                    None => locations.remove(&id),
                };
            }
        }
        let mut cache = self.cache.lock();
        for ((model, id), chunk) in std::mem::take(&mut self.stale) {
            cache.insert(&model, id, chunk);
        }
        for ((model, id), dirty) in std::mem::take(&mut self.dirty) {
            cache.insert(&model, id, dirty.chunk);
        }
        for (model, id) in cache.shrink() {
            debug!(model, chunk = id.as_u64(), "evicted chunk");
        }
    }

    /// Drops all staged state.
    ///
    /// `written` lists chunks whose files were already replaced by a commit
    /// that then failed. Their committed copies become stale and are
    /// rewritten by the next commit.
    pub fn discard_staged(&mut self, written: &[(String, ChunkId)]) {
        for key in written {
            let base = self
                .dirty
                .get(key)
                .and_then(|dirty| dirty.base.clone())
                .or_else(|| self.stale.get(key).cloned());
            if let Some(base) = base {
                self.cache.lock().remove(&key.0, key.1);
                self.stale.insert(key.clone(), base);
            }
        }
        self.staged_layouts.clear();
        self.staged_locations.clear();
        self.dirty.clear();
    }
}
