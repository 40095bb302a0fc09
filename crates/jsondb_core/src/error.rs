//! Error types for JsonDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in JsonDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or conflicting model, field, or relationship definition.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// A field value violates its type or constraints.
    #[error("validation failed for {model}.{field}: {reason}")]
    Validation {
        /// Model being validated.
        model: String,
        /// Offending field.
        field: String,
        /// Violated constraint.
        reason: String,
    },

    /// A unique field value is already taken.
    #[error("duplicate value {value} for unique field {model}.{field}")]
    Uniqueness {
        /// Model owning the field.
        model: String,
        /// The unique field.
        field: String,
        /// The colliding value, rendered as JSON.
        value: String,
    },

    /// A foreign key target is missing, or a delete/update is restricted.
    #[error("foreign key violation on {model}.{field}: {message}")]
    ForeignKey {
        /// Model owning the foreign key field.
        model: String,
        /// The foreign key field.
        field: String,
        /// Description of the violation.
        message: String,
    },

    /// No record with this id exists.
    #[error("record {id} not found in model {model}")]
    NotFound {
        /// Model searched.
        model: String,
        /// The missing record id.
        id: u64,
    },

    /// The query references unknown names or is malformed.
    #[error("query error: {message}")]
    Query {
        /// Description of the problem.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] jsondb_storage::StorageError),

    /// Misuse of the begin/commit/rollback state machine.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the misuse.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or incompatible catalog or chunk file.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Database is already open in another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(
        model: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            model: model.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a uniqueness error.
    pub fn uniqueness(
        model: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Uniqueness {
            model: model.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a foreign key error.
    pub fn foreign_key(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ForeignKey {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(model: impl Into<String>, id: u64) -> Self {
        Self::NotFound {
            model: model.into(),
            id,
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the storage layer.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}
