//! # JsonDB Core
//!
//! Core database engine for JsonDB, an embedded store of schema-validated
//! JSON records.
//!
//! This crate provides:
//! - A schema registry for models, fields and relationships
//! - Chunked record storage with a bounded chunk cache
//! - Secondary indexes for unique, indexed and foreign key fields
//! - A query builder and engine with joins, grouping and aggregates
//! - Single-writer transactions with all-or-nothing commits
//! - Export, statistics and offline verification
//!
//! ## Example
//!
//! ```rust
//! use jsondb_core::{Database, FieldDef, ModelDef, RelationshipDef};
//! use jsondb_core::query::{field, Query};
//! use serde_json::json;
//!
//! let db = Database::open_in_memory()?;
//! db.register(
//!     ModelDef::new("User")
//!         .field(FieldDef::integer("id").primary_key())
//!         .field(FieldDef::string("name").not_null())
//!         .relationship(RelationshipDef::one_to_many("posts", "Post")),
//! )?;
//! db.register(
//!     ModelDef::new("Post")
//!         .field(FieldDef::integer("id").primary_key())
//!         .field(FieldDef::integer("author_id").foreign_key("User.id"))
//!         .field(FieldDef::string("title")),
//! )?;
//!
//! let ann = db.create("User", json!({"name": "ann"}))?;
//! db.create("Post", json!({"author_id": ann.id.as_u64(), "title": "hello"}))?;
//!
//! let rows = db.query(
//!     &Query::from("User")
//!         .join("Post", "posts")
//!         .filter(field("title").like("hel%")),
//! )?;
//! assert_eq!(rows.len(), 1);
//! # Ok::<(), jsondb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod chunk;
mod clock;
mod config;
mod database;
mod dir;
mod error;
mod export;
pub mod index;
pub mod query;
mod record;
pub mod schema;
mod stats;
pub mod store;
pub mod transaction;
mod types;
mod value;
mod verify;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use database::Database;
pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult};
pub use export::{ModelExport, RecordExport};
pub use record::{IntoFields, Record};
pub use schema::{
    DefaultFactory, FieldDef, FieldKind, ModelDef, OnDelete, RelationshipDef, RelationshipKind,
    SchemaChange,
};
pub use stats::{DatabaseStats, ModelStats, OperationStats};
pub use transaction::{CommitSummary, Transaction};
pub use types::{ChunkId, RecordId, TransactionId, View};
pub use value::{IndexKey, Value};
pub use verify::{verify_backend, verify_path, VerifyReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
