//! Transaction state.

use crate::types::TransactionId;
use std::fmt;

/// State of the single write transaction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No transaction is running.
    #[default]
    Idle,
    /// A transaction is accepting operations.
    Active(TransactionId),
    /// A transaction is writing chunks and the catalog.
    Committing(TransactionId),
}

impl TransactionState {
    /// Returns true if no transaction is running.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The running transaction, if any.
    #[must_use]
    pub const fn current(self) -> Option<TransactionId> {
        match self {
            Self::Idle => None,
            Self::Active(id) | Self::Committing(id) => Some(id),
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active(id) => write!(f, "active ({id})"),
            Self::Committing(id) => write!(f, "committing ({id})"),
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    /// The committed transaction.
    pub txn: TransactionId,
    /// Staged operations in the transaction.
    pub operations: usize,
    /// Chunk files rewritten.
    pub chunks_written: usize,
    /// Dirty chunks whose bytes were unchanged, so no write was issued.
    pub chunks_skipped: usize,
}
