//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random blog data and write
//! sequences against the schema in [`crate::fixtures`].

use proptest::prelude::*;
use serde_json::json;

/// Strategy for generating valid user names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating ages, sometimes absent.
pub fn age_strategy() -> impl Strategy<Value = Option<i64>> {
    prop::option::weighted(0.9, 0..100_i64)
}

/// Strategy for generating user data without an email.
///
/// Emails are unique in the blog schema; callers that need one derive it
/// from a counter.
pub fn user_data_strategy() -> impl Strategy<Value = serde_json::Value> {
    (name_strategy(), age_strategy()).prop_map(|(name, age)| json!({ "name": name, "age": age }))
}

/// One step of a generated write sequence.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create a user.
    Create(serde_json::Value),
    /// Update the age of the `n`-th live user, modulo the live count.
    Update(usize, Option<i64>),
    /// Delete the `n`-th live user, modulo the live count.
    Delete(usize),
}

/// Strategy for generating a single write operation.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => user_data_strategy().prop_map(WriteOp::Create),
        1 => (any::<usize>(), age_strategy()).prop_map(|(n, age)| WriteOp::Update(n, age)),
        1 => any::<usize>().prop_map(WriteOp::Delete),
    ]
}

/// Strategy for generating a sequence of write operations.
pub fn write_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), 1..max_len)
}

/// Strategy for generating a valid chunk size.
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    1..8_usize
}
