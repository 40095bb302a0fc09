//! # JsonDB Storage
//!
//! Storage backend trait and implementations for JsonDB.
//!
//! This crate provides the lowest-level storage abstraction for JsonDB.
//! Storage backends are **opaque keyed blob stores** - they do not interpret
//! the data they store.
//!
//! ## Design Principles
//!
//! - Backends store whole blobs under relative, `/`-separated keys
//! - Replacing a blob is atomic: a reader sees the old or the new bytes, never a mix
//! - No knowledge of catalog or chunk formats
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use jsondb_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write_atomic("data/User/chunk_0.json", b"{}").unwrap();
//! let data = backend.read("data/User/chunk_0.json").unwrap();
//! assert_eq!(data.as_deref(), Some(&b"{}"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
