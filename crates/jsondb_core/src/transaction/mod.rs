//! Transaction management.
//!
//! One write transaction at a time moves through
//! `idle → active → committing → idle`. Operations stage their effects in
//! the record store; commit re-verifies constraints, writes each dirty
//! chunk once, then replaces the catalog. A failed commit discards the
//! staged state and leaves the catalog untouched.

mod handle;
mod manager;
mod state;

pub use handle::Transaction;
pub use manager::TransactionManager;
pub use state::{CommitSummary, TransactionState};
