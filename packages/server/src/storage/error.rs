//! Storage error taxonomy.

use thiserror::Error;

/// Errors surfaced by a [`LogStore`](super::LogStore) implementation.
///
/// Write failures are retryable from the caller's point of view: the buffer
/// re-enqueues the batch when capacity allows. Read failures surface to the
/// HTTP layer as 5xx.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the storage layer.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
