//! The persisted catalog.
//!
//! The catalog is the root of a database: schema, chunk directory and
//! counters for every model. It is written last during a commit, so a
//! restart always starts from the last fully committed catalog.

use crate::error::{CoreError, CoreResult};
use crate::schema::{ModelDescriptor, OrderedMap};
use crate::types::ChunkId;
use jsondb_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage key of the catalog.
pub const CATALOG_KEY: &str = "catalog.json";

/// Format version written to new catalogs.
pub const FORMAT_VERSION: &str = "1.0";

/// Storage key of a chunk file.
#[must_use]
pub fn chunk_key(model: &str, chunk: ChunkId) -> String {
    format!("data/{model}/chunk_{}.json", chunk.as_u64())
}

/// Top-level catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMeta {
    /// Format version, `major.minor`.
    pub version: String,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Time of the last successful commit, RFC 3339.
    pub last_updated: String,
    /// Records per chunk used when the chunks were allocated.
    pub chunk_size: usize,
    /// Records across all models.
    pub total_records: u64,
}

/// Chunk directory of one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDirectory {
    /// Highest allocated chunk id.
    pub current_chunk: u64,
    /// Number of allocated chunks.
    pub total_chunks: u64,
    /// Chunk id to storage key.
    pub chunks: BTreeMap<u64, String>,
}

/// Per-model counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCounters {
    /// Next auto-assigned record id.
    pub next_id: u64,
    /// Records currently stored.
    pub total_records: u64,
}

/// The catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Database-wide metadata.
    pub meta: CatalogMeta,
    /// Model descriptors in registration order.
    pub schema: OrderedMap<ModelDescriptor>,
    /// Chunk directories per model.
    #[serde(default)]
    pub chunks: OrderedMap<ChunkDirectory>,
    /// Counters per model.
    #[serde(default)]
    pub counters: OrderedMap<ModelCounters>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new(chunk_size: usize, now: &str) -> Self {
        Self {
            meta: CatalogMeta {
                version: FORMAT_VERSION.to_string(),
                created_at: now.to_string(),
                last_updated: now.to_string(),
                chunk_size,
                total_records: 0,
            },
            schema: OrderedMap::new(),
            chunks: OrderedMap::new(),
            counters: OrderedMap::new(),
        }
    }

    /// Encodes the catalog as pretty-printed JSON.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes and checks a catalog.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let catalog: Self = serde_json::from_slice(data)
            .map_err(|e| CoreError::invalid_format(format!("unreadable catalog: {e}")))?;

        let major = catalog.meta.version.split('.').next().unwrap_or_default();
        let supported = FORMAT_VERSION.split('.').next().unwrap_or_default();
        if major != supported {
            return Err(CoreError::invalid_format(format!(
                "unsupported catalog version: {}",
                catalog.meta.version
            )));
        }
        if catalog.meta.chunk_size == 0 {
            return Err(CoreError::invalid_format("catalog chunk_size is zero"));
        }
        Ok(catalog)
    }

    /// Reads the catalog, if one exists.
    pub fn load(backend: &dyn StorageBackend) -> CoreResult<Option<Self>> {
        backend
            .read(CATALOG_KEY)?
            .map(|data| Self::decode(&data))
            .transpose()
    }

    /// Atomically replaces the persisted catalog.
    pub fn save(&self, backend: &dyn StorageBackend) -> CoreResult<()> {
        backend.write_atomic(CATALOG_KEY, &self.encode()?)?;
        Ok(())
    }
}
