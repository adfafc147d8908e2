//! SQLite-backed [`LogStore`] using sqlx.
//!
//! The database file is created on first open; WAL journal mode and a busy
//! timeout keep concurrent readers cheap while the flusher writes. Schema
//! changes are applied by a versioned migration runner that records applied
//! versions in a `migrations` table, so re-running them is a no-op.
//!
//! Query routing: when the query carries a `message_contains` term and a
//! search index is attached, the index supplies candidate ids, the rows are
//! loaded here, the remaining filters refine them in memory, and the refined
//! set is re-sorted `(timestamp DESC, id DESC)` before pagination -- the same
//! order and pagination the SQL path applies directly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use loghive_core::{
    sort_newest_first, LogLevel, LogQuery, LogRecord, QueryPage, ServiceDescriptor,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, warn};

use super::error::{StorageError, StorageResult};
use super::{LogStore, ProbeReport};
use crate::index::SearchIndex;
use crate::metrics::IngestMetrics;

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    /// Connection pool size.
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("loghive.db"),
            max_connections: 5,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// Applied in ascending version order; each entry runs at most once.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS log_entries (
            id              TEXT PRIMARY KEY,
            timestamp       INTEGER NOT NULL,
            level           TEXT NOT NULL CHECK (level IN ('DEBUG','INFO','WARN','ERROR','FATAL')),
            message         TEXT NOT NULL,
            service_name    TEXT NOT NULL,
            agent_id        TEXT NOT NULL,
            platform        TEXT NOT NULL CHECK (platform IN ('go','swift','express','react','react-native','kotlin')),
            metadata        TEXT,
            device_info     TEXT,
            stack_trace     TEXT,
            source_location TEXT,
            created_at      INTEGER NOT NULL
        )",
    ),
    (
        2,
        "CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp ON log_entries (timestamp);
         CREATE INDEX IF NOT EXISTS idx_log_entries_level ON log_entries (level);
         CREATE INDEX IF NOT EXISTS idx_log_entries_service_name ON log_entries (service_name);
         CREATE INDEX IF NOT EXISTS idx_log_entries_agent_id ON log_entries (agent_id);
         CREATE INDEX IF NOT EXISTS idx_log_entries_platform ON log_entries (platform);
         CREATE INDEX IF NOT EXISTS idx_log_entries_service_agent ON log_entries (service_name, agent_id)",
    ),
];

/// Upper bound on ids fetched from the index before in-memory refinement.
const FULL_TEXT_CANDIDATE_CAP: usize = 10_000;

/// Ids per SQL statement when batching `IN (...)` clauses.
const ID_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = "id, timestamp, level, message, service_name, agent_id, platform, \
                              metadata, device_info, stack_trace, source_location";

/// SQLite-backed log store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    path: PathBuf,
    index: Option<Arc<SearchIndex>>,
    metrics: Arc<IngestMetrics>,
}

impl SqliteStore {
    /// Opens the database, creating the file and schema when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] when the pool cannot be built
    /// and [`StorageError::Migration`] when a migration fails.
    pub async fn open(
        config: &StorageConfig,
        metrics: Arc<IngestMetrics>,
    ) -> StorageResult<Self> {
        info!(path = %config.path.display(), "opening sqlite store");

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            path: config.path.clone(),
            index: None,
            metrics,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Attaches the search index that successful writes feed.
    pub fn attach_index(&mut self, index: Arc<SearchIndex>) {
        self.index = Some(index);
    }

    /// Shared reference to the attached index, if any.
    #[must_use]
    pub fn index(&self) -> Option<Arc<SearchIndex>> {
        self.index.clone()
    }

    async fn migrate(&self) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS migrations (
                version    INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        let applied = applied.unwrap_or(0);

        for (version, sql) in MIGRATIONS {
            if *version <= applied {
                continue;
            }
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
            for statement in sql.split(';') {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StorageError::Migration(format!("v{version}: {e}")))?;
            }
            sqlx::query("INSERT INTO migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().timestamp_millis())
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
            tx.commit()
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
            info!(version, "applied storage migration");
        }
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> StorageResult<LogRecord> {
        let level: String = row.try_get("level")?;
        let platform: String = row.try_get("platform")?;
        let timestamp: i64 = row.try_get("timestamp")?;

        let metadata: Option<String> = row.try_get("metadata")?;
        let device_info: Option<String> = row.try_get("device_info")?;
        let source_location: Option<String> = row.try_get("source_location")?;

        Ok(LogRecord {
            id: row.try_get("id")?,
            timestamp: Utc
                .timestamp_millis_opt(timestamp)
                .single()
                .ok_or_else(|| StorageError::Serialization(format!("bad timestamp {timestamp}")))?,
            level: level.parse().map_err(StorageError::Serialization)?,
            message: row.try_get("message")?,
            service_name: row.try_get("service_name")?,
            agent_id: row.try_get("agent_id")?,
            platform: platform.parse().map_err(StorageError::Serialization)?,
            metadata: metadata
                .map(|json| serde_json::from_str(&json))
                .transpose()?
                .unwrap_or_default(),
            device_info: device_info
                .map(|json| serde_json::from_str(&json))
                .transpose()?,
            stack_trace: row.try_get("stack_trace")?,
            source_location: source_location
                .map(|json| serde_json::from_str(&json))
                .transpose()?,
        })
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &LogQuery) {
        let mut first = true;
        let mut push_clause = |builder: &mut QueryBuilder<'_, Sqlite>| {
            builder.push(if first { " WHERE " } else { " AND " });
            first = false;
        };

        if let Some(service) = &query.service_name {
            push_clause(builder);
            builder.push("service_name = ").push_bind(service.clone());
        }
        if let Some(agent) = &query.agent_id {
            push_clause(builder);
            builder.push("agent_id = ").push_bind(agent.clone());
        }
        if let Some(level) = query.level {
            push_clause(builder);
            builder.push("level = ").push_bind(level.as_str());
        }
        if let Some(platform) = query.platform {
            push_clause(builder);
            builder.push("platform = ").push_bind(platform.as_str());
        }
        if let Some(term) = &query.message_contains {
            // SQL fallback when no index is attached: substring match.
            push_clause(builder);
            builder
                .push("message LIKE ")
                .push_bind(format!("%{}%", term.trim()));
        }
        if let Some(start) = query.start_time {
            push_clause(builder);
            builder
                .push("timestamp >= ")
                .push_bind(start.timestamp_millis());
        }
        if let Some(end) = query.end_time {
            push_clause(builder);
            builder
                .push("timestamp <= ")
                .push_bind(end.timestamp_millis());
        }
    }

    async fn query_sql(&self, query: &LogQuery) -> StorageResult<QueryPage> {
        let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM log_entries");
        Self::push_filters(&mut count_builder, query);
        let total_count: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let limit = query.effective_limit();
        let offset = query.effective_offset();

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {SELECT_COLUMNS} FROM log_entries"));
        Self::push_filters(&mut builder, query);
        builder
            .push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<StorageResult<Vec<_>>>()?;

        let total = u64::try_from(total_count).unwrap_or(0);
        let has_more = offset.saturating_add(records.len()) < usize::try_from(total).unwrap_or(0);
        Ok(QueryPage {
            records,
            total_count: total,
            has_more,
        })
    }

    async fn query_full_text(
        &self,
        index: &SearchIndex,
        term: &str,
        query: &LogQuery,
    ) -> StorageResult<QueryPage> {
        let candidate_ids = index
            .search(term, query, FULL_TEXT_CANDIDATE_CAP)
            .map_err(|e| StorageError::Query(format!("index search: {e}")))?;

        let mut records = self.get_by_ids(&candidate_ids).await?;
        records.retain(|r| query.matches_structured(r));
        sort_newest_first(&mut records);

        let total_count = records.len() as u64;
        let offset = query.effective_offset();
        let limit = query.effective_limit();

        let page: Vec<LogRecord> = records.into_iter().skip(offset).take(limit).collect();
        let has_more = offset.saturating_add(page.len()) < usize::try_from(total_count).unwrap_or(0);

        Ok(QueryPage {
            records: page,
            total_count,
            has_more,
        })
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn store(&self, batch: &[LogRecord]) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let created_at = Utc::now().timestamp_millis();

        for record in batch {
            let metadata = if record.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&record.metadata)?)
            };
            let device_info = record
                .device_info
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let source_location = record
                .source_location
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            sqlx::query(
                "INSERT INTO log_entries (
                    id, timestamp, level, message, service_name, agent_id, platform,
                    metadata, device_info, stack_trace, source_location, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    level = excluded.level,
                    message = excluded.message,
                    service_name = excluded.service_name,
                    agent_id = excluded.agent_id,
                    platform = excluded.platform,
                    metadata = excluded.metadata,
                    device_info = excluded.device_info,
                    stack_trace = excluded.stack_trace,
                    source_location = excluded.source_location",
            )
            .bind(&record.id)
            .bind(record.timestamp.timestamp_millis())
            .bind(record.level.as_str())
            .bind(&record.message)
            .bind(&record.service_name)
            .bind(&record.agent_id)
            .bind(record.platform.as_str())
            .bind(metadata)
            .bind(device_info)
            .bind(&record.stack_trace)
            .bind(source_location)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(count = batch.len(), "stored batch");

        if let Some(index) = &self.index {
            if let Err(e) = index.index_batch(batch) {
                // Index failures never fail the write; storage stays the
                // source of truth and the drift is visible via metrics.
                warn!(error = %e, count = batch.len(), "index update failed");
                self.metrics.incr_index_errors();
            }
        }
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> StorageResult<QueryPage> {
        if let (Some(index), true) = (&self.index, query.wants_full_text()) {
            let term = query
                .message_contains
                .clone()
                .unwrap_or_default();
            return self.query_full_text(index, &term, query).await;
        }
        self.query_sql(query).await
    }

    async fn get_by_ids(&self, ids: &[String]) -> StorageResult<Vec<LogRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new(format!("SELECT {SELECT_COLUMNS} FROM log_entries WHERE id IN ("));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.clone());
            }
            builder.push(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in &rows {
                records.push(Self::row_to_record(row)?);
            }
        }
        Ok(records)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0_u64;
        for chunk in ids.chunks(ID_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM log_entries WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.clone());
            }
            builder.push(")");
            deleted += builder.build().execute(&self.pool).await?.rows_affected();
        }

        if let Some(index) = &self.index {
            if let Err(e) = index.delete(ids) {
                warn!(error = %e, "index delete failed");
                self.metrics.incr_index_errors();
            }
        }
        Ok(deleted)
    }

    async fn services(&self) -> StorageResult<Vec<ServiceDescriptor>> {
        let rows = sqlx::query(
            "SELECT service_name, agent_id, platform,
                    MAX(timestamp) AS last_seen, COUNT(*) AS log_count
             FROM log_entries
             GROUP BY service_name, agent_id, platform
             ORDER BY last_seen DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let platform: String = row.try_get("platform")?;
                let last_seen: i64 = row.try_get("last_seen")?;
                let log_count: i64 = row.try_get("log_count")?;
                Ok(ServiceDescriptor {
                    service_name: row.try_get("service_name")?,
                    agent_id: row.try_get("agent_id")?,
                    platform: platform.parse().map_err(StorageError::Serialization)?,
                    last_seen: Utc
                        .timestamp_millis_opt(last_seen)
                        .single()
                        .ok_or_else(|| {
                            StorageError::Serialization(format!("bad timestamp {last_seen}"))
                        })?,
                    log_count: u64::try_from(log_count).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn count(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn ids_older_than(
        &self,
        level: Option<LogLevel>,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT id FROM log_entries WHERE timestamp < ");
        builder.push_bind(cutoff.timestamp_millis());
        if let Some(level) = level {
            builder.push(" AND level = ").push_bind(level.as_str());
        }
        builder
            .push(" ORDER BY timestamp ASC, id ASC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let ids = builder.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(ids)
    }

    async fn oldest_ids(&self, limit: usize) -> StorageResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM log_entries ORDER BY timestamp ASC, id ASC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn oldest_ids_for_service(
        &self,
        service_name: &str,
        agent_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM log_entries
             WHERE service_name = ? AND agent_id = ?
             ORDER BY timestamp ASC, id ASC LIMIT ?",
        )
        .bind(service_name)
        .bind(agent_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn health(&self) -> ProbeReport {
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM log_entries")
            .fetch_one(&self.pool)
            .await
        {
            Ok(count) => {
                let mut details = BTreeMap::new();
                details.insert("backend".to_string(), "sqlite".to_string());
                details.insert("path".to_string(), self.path.display().to_string());
                details.insert("records".to_string(), count.to_string());
                ProbeReport::healthy(details)
            }
            Err(e) => ProbeReport::unhealthy(e.to_string()),
        }
    }
}
