//! Chunked record storage.
//!
//! Each model's records are partitioned into chunks of at most
//! `chunk_size` records. A chunk is the unit of load and flush: reading one
//! record reads only its chunk, and a commit rewrites only dirty chunks.

mod cache;
mod file;
mod manager;

pub use file::{Chunk, Fields};
pub use manager::ChunkManager;
