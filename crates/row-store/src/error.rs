use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the row store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write named a version that is no longer current.
    #[error(
        "Concurrency conflict on {table}/{key}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        table: String,
        key: String,
        expected: Version,
        actual: Version,
    },

    /// An insert targeted a row that already exists.
    #[error("Row already exists: {table}/{key}")]
    AlreadyExists { table: String, key: String },

    /// An update or delete targeted a row that does not exist.
    #[error("Row not found: {table}/{key}")]
    NotFound { table: String, key: String },

    /// A transaction was rejected before touching any row.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error means another writer got there first and
    /// the operation can be retried against fresh state.
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. } | StoreError::AlreadyExists { .. }
        )
    }
}

/// Result type for row store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
