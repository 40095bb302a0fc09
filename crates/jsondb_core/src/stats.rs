//! Database statistics.
//!
//! Operation counters are atomic and updated by the [`Database`] facade as
//! calls complete. [`DatabaseStats`] is a point-in-time snapshot that adds
//! per-model storage figures and transaction counts.
//!
//! [`Database`]: crate::Database

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live operation counters.
#[derive(Debug, Default)]
pub(crate) struct OperationCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
    scans: AtomicU64,
    index_lookups: AtomicU64,
}

impl OperationCounters {
    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writes(&self, records: u64) {
        self.writes.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_deletes(&self, records: u64) {
        self.deletes.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self, uses_index: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if uses_index {
            self.index_lookups.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> OperationStats {
        OperationStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            index_lookups: self.index_lookups.load(Ordering::Relaxed),
        }
    }
}

/// Operation counts since the database was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OperationStats {
    /// Single-record reads by id.
    pub reads: u64,
    /// Records created or updated.
    pub writes: u64,
    /// Records deleted, cascades included.
    pub deletes: u64,
    /// Queries executed.
    pub queries: u64,
    /// Queries that scanned their driving model.
    ///
    /// A high count relative to `index_lookups` may indicate a missing index.
    pub scans: u64,
    /// Queries answered through a primary key or secondary index lookup.
    pub index_lookups: u64,
}

/// Committed storage figures of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    /// Model name.
    pub name: String,
    /// Schema version.
    pub version: u32,
    /// Committed records.
    pub records: u64,
    /// Allocated chunks.
    pub chunks: usize,
    /// Next auto-assigned id.
    pub next_id: u64,
}

/// A point-in-time snapshot of database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Models in registration order.
    pub models: Vec<ModelStats>,
    /// Committed records across all models.
    pub total_records: u64,
    /// Configured records per chunk.
    pub chunk_size: usize,
    /// Clean chunks currently resident in the cache.
    pub cached_chunks: usize,
    /// Successful commits.
    pub transactions_committed: u64,
    /// Rolled back transactions.
    pub transactions_rolled_back: u64,
    /// Commits that failed and discarded their changes.
    pub failed_commits: u64,
    /// Operation counters.
    pub operations: OperationStats,
}

impl DatabaseStats {
    /// Looks up one model's figures.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelStats> {
        self.models.iter().find(|m| m.name == name)
    }
}
