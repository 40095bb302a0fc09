//! Equality index over one field.

use crate::types::RecordId;
use crate::value::IndexKey;
use std::collections::{BTreeSet, HashMap};

/// Hash-based equality index mapping field values to record ids.
///
/// Null values are never indexed, so a unique field admits any number of
/// nulls.
#[derive(Debug, Clone, Default)]
pub struct SecondaryIndex {
    entries: HashMap<IndexKey, BTreeSet<RecordId>>,
    count: usize,
}

impl SecondaryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Null keys are ignored.
    pub fn insert(&mut self, key: IndexKey, id: RecordId) {
        if key.is_null() {
            return;
        }
        if self.entries.entry(key).or_default().insert(id) {
            self.count += 1;
        }
    }

    /// Removes an entry, returning whether it was present.
    pub fn remove(&mut self, key: &IndexKey, id: RecordId) -> bool {
        let Some(set) = self.entries.get_mut(key) else {
            return false;
        };
        if !set.remove(&id) {
            return false;
        }
        self.count -= 1;
        if set.is_empty() {
            self.entries.remove(key);
        }
        true
    }

    /// Record ids holding `key`, in ascending order.
    #[must_use]
    pub fn lookup(&self, key: &IndexKey) -> Option<&BTreeSet<RecordId>> {
        self.entries.get(key)
    }

    /// Number of indexed (non-null) entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}
