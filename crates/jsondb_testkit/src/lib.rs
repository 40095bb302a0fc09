//! # JsonDB Testkit
//!
//! Test utilities for JsonDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - A small blog schema shared by integration tests and benchmarks
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use jsondb_testkit::prelude::*;
//!
//! with_blog_db(|db| {
//!     let ann = db.create("User", user("ann", 30)).unwrap();
//!     assert_eq!(ann.id.as_u64(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
