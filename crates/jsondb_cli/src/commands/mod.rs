//! CLI command implementations.

pub mod export;
pub mod inspect;
pub mod verify;

use jsondb_core::{Config, CoreResult, Database};
use std::path::Path;

/// Opens an existing database directory without creating it.
pub fn open_existing(path: &Path) -> CoreResult<Database> {
    Database::open_with_config(path, Config::new().create_if_missing(false))
}
