//! Chunk contents and their JSON file encoding.

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::schema::{decode_stored, ModelSchema};
use crate::types::{ChunkId, RecordId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Field values of one stored record.
pub type Fields = BTreeMap<String, Value>;

/// A bounded, ordered collection of one model's records.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Owning model.
    pub model: String,
    /// Chunk id within the model.
    pub id: ChunkId,
    /// The chunk allocated after this one.
    pub next_chunk: Option<ChunkId>,
    /// Records keyed by id.
    pub records: BTreeMap<RecordId, Fields>,
}

#[derive(Serialize, Deserialize)]
struct ChunkMeta {
    model: String,
    chunk_id: u64,
    records: usize,
    next_chunk: Option<u64>,
}

#[derive(Serialize)]
struct ChunkFileRef<'a> {
    meta: ChunkMeta,
    records: BTreeMap<u64, &'a Fields>,
}

#[derive(Deserialize)]
struct ChunkFile {
    meta: ChunkMeta,
    #[serde(default)]
    records: BTreeMap<u64, serde_json::Map<String, serde_json::Value>>,
}

impl Chunk {
    /// Creates an empty chunk.
    #[must_use]
    pub fn new(model: impl Into<String>, id: ChunkId) -> Self {
        Self {
            model: model.into(),
            id,
            next_chunk: None,
            records: BTreeMap::new(),
        }
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the chunk holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns a copy of one record.
    #[must_use]
    pub fn record(&self, id: RecordId) -> Option<Record> {
        self.records
            .get(&id)
            .map(|values| Record::new(id, values.clone()))
    }

    /// Encodes the chunk as pretty-printed JSON.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let file = ChunkFileRef {
            meta: ChunkMeta {
                model: self.model.clone(),
                chunk_id: self.id.as_u64(),
                records: self.records.len(),
                next_chunk: self.next_chunk.map(ChunkId::as_u64),
            },
            records: self
                .records
                .iter()
                .map(|(id, fields)| (id.as_u64(), fields))
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    /// Decodes a chunk file, normalizing every record against `schema`.
    pub fn decode(data: &[u8], schema: &ModelSchema, expected: ChunkId) -> CoreResult<Self> {
        let file: ChunkFile = serde_json::from_slice(data).map_err(|e| {
            CoreError::invalid_format(format!(
                "unreadable chunk {} of {}: {e}",
                expected.as_u64(),
                schema.name()
            ))
        })?;

        if file.meta.model != schema.name() || file.meta.chunk_id != expected.as_u64() {
            return Err(CoreError::invalid_format(format!(
                "chunk file holds {}/{} but {}/{} was expected",
                file.meta.model,
                file.meta.chunk_id,
                schema.name(),
                expected.as_u64()
            )));
        }
        if file.meta.records != file.records.len() {
            warn!(
                model = schema.name(),
                chunk = expected.as_u64(),
                meta = file.meta.records,
                actual = file.records.len(),
                "chunk record count does not match its metadata"
            );
        }

        let pk = &schema.primary_key().name;
        let mut records = BTreeMap::new();
        for (id, raw) in &file.records {
            let fields = decode_stored(schema, raw)?;
            let stored_id = fields.get(pk).and_then(Value::as_i64);
            if stored_id.and_then(|v| u64::try_from(v).ok()) != Some(*id) {
                return Err(CoreError::invalid_format(format!(
                    "record key {id} in {} chunk {} does not match its primary key",
                    schema.name(),
                    expected.as_u64()
                )));
            }
            records.insert(RecordId::new(*id), fields);
        }

        Ok(Self {
            model: file.meta.model,
            id: expected,
            next_chunk: file.meta.next_chunk.map(ChunkId::new),
            records,
        })
    }
}
