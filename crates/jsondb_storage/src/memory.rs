//! In-memory storage backend for testing.

use crate::backend::{validate_key, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel meaning "no fault armed".
const NO_FAULT: usize = usize::MAX;

/// An in-memory storage backend.
///
/// This backend stores all blobs in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// It can also simulate write failures with [`InMemoryBackend::fail_writes_after`],
/// which is how commit-failure paths are tested.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use jsondb_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write_atomic("a.json", b"test data").unwrap();
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryBackend {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    writes_until_fault: AtomicUsize,
    write_count: AtomicUsize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            writes_until_fault: AtomicUsize::new(NO_FAULT),
            write_count: AtomicUsize::new(0),
        }
    }
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing blobs.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_blobs(blobs: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            blobs: RwLock::new(blobs),
            ..Self::default()
        }
    }

    /// Returns a copy of all blobs in the backend.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.blobs.read().clone()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if no blobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Returns the number of successful `write_atomic` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Lets the next `n` writes succeed, then fails every write after them.
    pub fn fail_writes_after(&self, n: usize) {
        self.writes_until_fault.store(n, Ordering::SeqCst);
    }

    /// Disarms write-fault injection.
    pub fn clear_faults(&self) {
        self.writes_until_fault.store(NO_FAULT, Ordering::SeqCst);
    }

    /// Clears all blobs from the backend.
    pub fn clear(&self) {
        self.blobs.write().clear();
    }

    fn check_fault(&self, key: &str) -> StorageResult<()> {
        let remaining = self.writes_until_fault.load(Ordering::SeqCst);
        if remaining == NO_FAULT {
            return Ok(());
        }
        if remaining == 0 {
            return Err(StorageError::InjectedFault {
                key: key.to_string(),
            });
        }
        self.writes_until_fault.store(remaining - 1, Ordering::SeqCst);
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.read().get(key).cloned())
    }

    fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.check_fault(key)?;
        self.blobs.write().insert(key.to_string(), data.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.blobs.write().remove(key).is_some())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.blobs.read().contains_key(key))
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.read("a.json").unwrap(), None);
    }

    #[test]
    fn write_replaces_content() {
        let backend = InMemoryBackend::new();
        backend.write_atomic("a.json", b"one").unwrap();
        backend.write_atomic("a.json", b"two").unwrap();

        assert_eq!(backend.read("a.json").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.write_count(), 2);
    }

    #[test]
    fn with_blobs_preloads() {
        let mut blobs = BTreeMap::new();
        blobs.insert("catalog.json".to_string(), b"{}".to_vec());

        let backend = InMemoryBackend::with_blobs(blobs);
        assert!(backend.exists("catalog.json").unwrap());
    }

    #[test]
    fn list_is_sorted_and_prefixed() {
        let backend = InMemoryBackend::new();
        backend.write_atomic("data/B/chunk_0.json", b"").unwrap();
        backend.write_atomic("data/A/chunk_1.json", b"").unwrap();
        backend.write_atomic("data/A/chunk_0.json", b"").unwrap();

        assert_eq!(
            backend.list("data/A/").unwrap(),
            vec!["data/A/chunk_0.json", "data/A/chunk_1.json"]
        );
    }

    #[test]
    fn injected_fault_keeps_old_content() {
        let backend = InMemoryBackend::new();
        backend.write_atomic("a.json", b"good").unwrap();

        backend.fail_writes_after(1);
        backend.write_atomic("b.json", b"ok").unwrap();
        let result = backend.write_atomic("a.json", b"bad");

        assert!(matches!(result, Err(StorageError::InjectedFault { .. })));
        assert_eq!(backend.read("a.json").unwrap(), Some(b"good".to_vec()));

        backend.clear_faults();
        backend.write_atomic("a.json", b"new").unwrap();
        assert_eq!(backend.read("a.json").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn remove_blob() {
        let backend = InMemoryBackend::new();
        backend.write_atomic("a.json", b"x").unwrap();
        assert!(backend.remove("a.json").unwrap());
        assert!(!backend.remove("a.json").unwrap());
        assert!(backend.is_empty());
    }
}
