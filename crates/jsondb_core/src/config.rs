//! Database configuration.

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Maximum number of records per chunk.
    pub chunk_size: usize,

    /// Maximum number of clean chunks kept resident in the chunk cache.
    pub max_cached_chunks: usize,

    /// Time source for `now` default factories and catalog timestamps.
    pub clock: Arc<dyn Clock>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            chunk_size: 1000,
            max_cached_chunks: 64,
            clock: Arc::new(SystemClock),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the maximum number of records per chunk.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets how many clean chunks the cache keeps resident.
    #[must_use]
    pub const fn max_cached_chunks(mut self, count: usize) -> Self {
        self.max_cached_chunks = count;
        self
    }

    /// Injects the clock used by `now` default factories.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.chunk_size == 0 {
            return Err(CoreError::invalid_config("chunk_size must be positive"));
        }
        if self.max_cached_chunks == 0 {
            return Err(CoreError::invalid_config(
                "max_cached_chunks must be positive",
            ));
        }
        Ok(())
    }
}
