//! Durable storage of log records behind the [`LogStore`] trait.
//!
//! Two implementations: [`SqliteStore`] for persistence and [`MemoryStore`]
//! for tests and ephemeral runs. The store owns the optional search-index
//! attachment: a successful batch write hands the same batch to the index,
//! and index failures are counted and logged but never propagated, so the
//! index lags storage at worst (never the other way around).

pub mod error;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loghive_core::{LogLevel, LogQuery, LogRecord, QueryPage, ServiceDescriptor};
use serde::Serialize;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StorageConfig};

/// Health probe outcome for a storage or index component.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// True when the component answered its probe.
    pub healthy: bool,
    /// Component-specific details (row counts, paths, error text).
    pub details: BTreeMap<String, String>,
}

impl ProbeReport {
    /// A healthy report with the given detail pairs.
    #[must_use]
    pub fn healthy(details: BTreeMap<String, String>) -> Self {
        Self {
            healthy: true,
            details,
        }
    }

    /// An unhealthy report carrying the probe error.
    #[must_use]
    pub fn unhealthy(error: impl Into<String>) -> Self {
        let mut details = BTreeMap::new();
        details.insert("error".to_string(), error.into());
        Self {
            healthy: false,
            details,
        }
    }
}

/// Durable write and query of log records.
///
/// Implementations must be `Send + Sync`; they are shared across the HTTP
/// handlers, the buffer flusher, the retention engine, and the MCP tools.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Writes the batch transactionally: either all records persist or none.
    ///
    /// On success, implementations with an attached index hand the batch to
    /// it; index failures are logged and counted, never returned.
    ///
    /// # Errors
    ///
    /// Returns a retryable [`StorageError`] when the transaction fails; the
    /// caller may re-buffer the batch.
    async fn store(&self, batch: &[LogRecord]) -> StorageResult<()>;

    /// Filtered, paginated query ordered newest first (ties by id).
    async fn query(&self, query: &LogQuery) -> StorageResult<QueryPage>;

    /// Loads records by exact id. Unknown ids are silently absent.
    async fn get_by_ids(&self, ids: &[String]) -> StorageResult<Vec<LogRecord>>;

    /// Deletes records by id, returning how many rows went away.
    ///
    /// Cascades to the attached search index on a best-effort basis.
    async fn delete_by_ids(&self, ids: &[String]) -> StorageResult<u64>;

    /// Rollup per `(service_name, agent_id, platform)`, sorted by last-seen
    /// descending.
    async fn services(&self) -> StorageResult<Vec<ServiceDescriptor>>;

    /// Total number of stored records.
    async fn count(&self) -> StorageResult<u64>;

    /// Oldest-first ids of records with `timestamp < cutoff`, optionally
    /// restricted to one level. Used by the retention time pass.
    async fn ids_older_than(
        &self,
        level: Option<LogLevel>,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<String>>;

    /// Globally oldest ids, used by the total-count retention cap.
    async fn oldest_ids(&self, limit: usize) -> StorageResult<Vec<String>>;

    /// Oldest ids for one `(service_name, agent_id)` pair, used by the
    /// per-service retention cap.
    async fn oldest_ids_for_service(
        &self,
        service_name: &str,
        agent_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<String>>;

    /// Lightweight probe answering "can I reach the backend right now".
    async fn health(&self) -> ProbeReport;
}
