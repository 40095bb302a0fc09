//! Lazy model scans.

use super::RecordStore;
use crate::chunk::Chunk;
use crate::error::CoreResult;
use crate::record::Record;
use crate::schema::ModelSchema;
use crate::types::{ChunkId, RecordId, View};
use std::ops::Bound;
use std::sync::Arc;

/// Iterator over a model's records in chunk order.
///
/// Chunks are loaded one at a time, when the scan reaches them.
#[derive(Debug)]
pub struct Scan<'a> {
    store: &'a RecordStore,
    schema: Arc<ModelSchema>,
    view: View,
    chunk_ids: std::vec::IntoIter<ChunkId>,
    current: Option<Arc<Chunk>>,
    after: Option<RecordId>,
}

impl<'a> Scan<'a> {
    pub(super) fn new(store: &'a RecordStore, schema: Arc<ModelSchema>, view: View) -> Self {
        let chunk_ids = store.chunks().chunk_ids(schema.name(), view).into_iter();
        Self {
            store,
            schema,
            view,
            chunk_ids,
            current: None,
            after: None,
        }
    }
}

impl Iterator for Scan<'_> {
    type Item = CoreResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = &self.current {
                let lower = self.after.map_or(Bound::Unbounded, Bound::Excluded);
                if let Some((id, fields)) = chunk.records.range((lower, Bound::Unbounded)).next() {
                    self.after = Some(*id);
                    return Some(Ok(Record::new(*id, fields.clone())));
                }
            }
            let chunk_id = self.chunk_ids.next()?;
            match self.store.chunks().load(&self.schema, chunk_id, self.view) {
                Ok(chunk) => {
                    self.current = Some(chunk);
                    self.after = None;
                }
                Err(e) => {
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
