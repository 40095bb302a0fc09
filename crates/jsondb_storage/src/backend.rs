//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A low-level storage backend for JsonDB.
///
/// Storage backends are **opaque keyed blob stores**. Keys are relative,
/// `/`-separated paths such as `data/User/chunk_0.json`. JsonDB owns all
/// format interpretation - backends do not understand catalogs or chunks.
///
/// # Invariants
///
/// - `write_atomic` replaces the whole blob; a failed write leaves the
///   previous content intact
/// - `read` returns exactly the bytes of the last successful `write_atomic`
/// - Backends must be `Send + Sync` and use interior locking
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the blob stored under `key`.
    ///
    /// Returns `None` if no blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the blob stored under `key`.
    ///
    /// After this returns successfully the new content is durable. If it
    /// fails, a subsequent `read` returns the previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob stored under `key`.
    ///
    /// Returns `true` if a blob was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Returns whether a blob exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Lists all keys that start with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Checks that `key` is a relative path without `.`/`..` segments.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] for empty, absolute, or
/// path-escaping keys.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_relative_keys() {
        assert!(validate_key("catalog.json").is_ok());
        assert!(validate_key("data/User/chunk_0.json").is_ok());
    }

    #[test]
    fn rejects_escaping_keys() {
        for key in ["", "/etc/passwd", "data/../x", "./x", "a//b", "a\\b"] {
            assert!(
                matches!(validate_key(key), Err(StorageError::InvalidKey { .. })),
                "{key:?} should be rejected"
            );
        }
    }
}
