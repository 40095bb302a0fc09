//! Bounded cache of clean chunks.

use super::file::Chunk;
use crate::types::ChunkId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct Entry {
    chunk: Arc<Chunk>,
    last_used: u64,
}

/// Least-recently-used cache of committed chunks, plus the digest of each
/// chunk's last persisted bytes.
pub(crate) struct ChunkCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, HashMap<ChunkId, Entry>>,
    len: usize,
    digests: HashMap<String, HashMap<ChunkId, [u8; 32]>>,
}

impl fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl ChunkCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::new(),
            len: 0,
            digests: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, model: &str, id: ChunkId) -> Option<Arc<Chunk>> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(model)?.get_mut(&id)?;
        entry.last_used = tick;
        Some(Arc::clone(&entry.chunk))
    }

    pub(crate) fn contains(&self, model: &str, id: ChunkId) -> bool {
        self.entries
            .get(model)
            .is_some_and(|chunks| chunks.contains_key(&id))
    }

    pub(crate) fn insert(&mut self, model: &str, id: ChunkId, chunk: Arc<Chunk>) {
        self.tick += 1;
        let entry = Entry {
            chunk,
            last_used: self.tick,
        };
        if self
            .entries
            .entry(model.to_string())
            .or_default()
            .insert(id, entry)
            .is_none()
        {
            self.len += 1;
        }
    }

    pub(crate) fn remove(&mut self, model: &str, id: ChunkId) -> bool {
        let removed = self
            .entries
            .get_mut(model)
            .and_then(|chunks| chunks.remove(&id))
            .is_some();
        if removed {
            self.len -= 1;
        }
        removed
    }

    pub(crate) fn remove_model(&mut self, model: &str) {
        if let Some(chunks) = self.entries.remove(model) {
            self.len -= chunks.len();
        }
    }

    /// Drops least recently used entries until the cache fits its capacity.
    pub(crate) fn shrink(&mut self) -> Vec<(String, ChunkId)> {
        let mut evicted = Vec::new();
        while self.len > self.capacity {
            let victim = self
                .entries
                .iter()
                .flat_map(|(model, chunks)| {
                    chunks
                        .iter()
                        .map(move |(id, entry)| (model.as_str(), *id, entry.last_used))
                })
                .min_by_key(|(_, _, last_used)| *last_used)
                .map(|(model, id, _)| (model.to_string(), id));
            let Some((model, id)) = victim else {
                break;
            };
            self.remove(&model, id);
            evicted.push((model, id));
        }
        evicted
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn digest(&self, model: &str, id: ChunkId) -> Option<[u8; 32]> {
        self.digests.get(model)?.get(&id).copied()
    }

    pub(crate) fn set_digest(&mut self, model: &str, id: ChunkId, digest: [u8; 32]) {
        self.digests
            .entry(model.to_string())
            .or_default()
            .insert(id, digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64) -> Arc<Chunk> {
        Arc::new(Chunk::new("M", ChunkId::new(id)))
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ChunkCache::new(2);
        cache.insert("M", ChunkId::new(0), chunk(0));
        cache.insert("M", ChunkId::new(1), chunk(1));
        cache.get("M", ChunkId::new(0));
        cache.insert("M", ChunkId::new(2), chunk(2));

        let evicted = cache.shrink();
        assert_eq!(evicted, vec![("M".to_string(), ChunkId::new(1))]);
        assert!(cache.contains("M", ChunkId::new(0)));
        assert!(cache.contains("M", ChunkId::new(2)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn digests_outlive_entries() {
        let mut cache = ChunkCache::new(1);
        cache.insert("M", ChunkId::new(0), chunk(0));
        cache.set_digest("M", ChunkId::new(0), [7; 32]);
        cache.insert("M", ChunkId::new(1), chunk(1));
        cache.shrink();

        assert!(!cache.contains("M", ChunkId::new(0)));
        assert_eq!(cache.digest("M", ChunkId::new(0)), Some([7; 32]));
    }

    #[test]
    fn remove_model_adjusts_len() {
        let mut cache = ChunkCache::new(8);
        cache.insert("A", ChunkId::new(0), chunk(0));
        cache.insert("A", ChunkId::new(1), chunk(1));
        cache.insert("B", ChunkId::new(0), chunk(0));
        cache.remove_model("A");
        assert_eq!(cache.len(), 1);
        assert!(!cache.remove("A", ChunkId::new(0)));
    }
}
