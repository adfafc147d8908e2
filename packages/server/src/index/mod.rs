//! Full-text search index over log records, backed by tantivy.
//!
//! The index is authoritative for `message_contains` searches only: every
//! indexed record also lives in storage (the store writes SQL first, then
//! hands the batch here), and storage deletes cascade best-effort. Structured
//! fields are indexed raw for term equality; `message` and `stack_trace` are
//! analyzed for full-text matching; the timestamp is an i64 fast field used
//! for range narrowing and newest-first ordering.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use loghive_core::{LogQuery, LogRecord};
use parking_lot::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, RangeQuery, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, Value, FAST, INDEXED, STORED, STRING, TEXT,
};
use tantivy::{Index, IndexReader, IndexWriter, Order, ReloadPolicy, TantivyDocument, Term};
use thiserror::Error;
use tracing::debug;

use crate::storage::ProbeReport;

/// Errors surfaced by the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("index directory error: {0}")]
    Directory(String),
}

/// Convenience alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Point-in-time index statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    /// Number of live documents.
    pub docs: u64,
}

/// Resolved field handles, looked up once at open time.
struct IndexFields {
    id: Field,
    level: Field,
    service_name: Field,
    agent_id: Field,
    platform: Field,
    device_platform: Field,
    device_model: Field,
    source_file: Field,
    source_function: Field,
    message: Field,
    stack_trace: Field,
    timestamp_millis: Field,
}

/// Full-text index over message/stack plus term filters for structured
/// fields.
///
/// The writer sits behind a mutex (tantivy allows one writer); the reader is
/// internally thread-safe. Batches are committed whole and the reader is
/// reloaded after each commit so a flushed batch is immediately searchable.
pub struct SearchIndex {
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: IndexFields,
}

/// Writer heap budget. Tantivy requires at least 15 MB.
const WRITER_MEMORY_BYTES: usize = 50 * 1024 * 1024;

impl SearchIndex {
    /// Opens (or creates) the index in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the existing
    /// index is incompatible with the current schema.
    pub fn open_in_dir(dir: impl AsRef<Path>) -> IndexResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| IndexError::Directory(format!("{}: {e}", dir.display())))?;
        let directory = MmapDirectory::open(dir)
            .map_err(|e| IndexError::Directory(format!("{}: {e}", dir.display())))?;
        let index = Index::open_or_create(directory, Self::schema())?;
        Self::from_index(&index)
    }

    /// Opens an ephemeral in-memory index. Used by tests and by runs that
    /// want full-text search without an index directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the writer cannot allocate its heap.
    pub fn open_in_ram() -> IndexResult<Self> {
        let index = Index::create_in_ram(Self::schema());
        Self::from_index(&index)
    }

    fn from_index(index: &Index) -> IndexResult<Self> {
        let schema = index.schema();
        let field = |name: &str| {
            schema
                .get_field(name)
                .expect("schema field registered at build time")
        };
        let fields = IndexFields {
            id: field("id"),
            level: field("level"),
            service_name: field("service_name"),
            agent_id: field("agent_id"),
            platform: field("platform"),
            device_platform: field("device_platform"),
            device_model: field("device_model"),
            source_file: field("source_file"),
            source_function: field("source_function"),
            message: field("message"),
            stack_trace: field("stack_trace"),
            timestamp_millis: field("timestamp_millis"),
        };

        let writer: IndexWriter = index.writer(WRITER_MEMORY_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader,
            fields,
        })
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("level", STRING);
        builder.add_text_field("service_name", STRING);
        builder.add_text_field("agent_id", STRING);
        builder.add_text_field("platform", STRING);
        builder.add_text_field("device_platform", STRING);
        builder.add_text_field("device_model", STRING);
        builder.add_text_field("source_file", STRING);
        builder.add_text_field("source_function", STRING);
        builder.add_text_field("message", TEXT);
        builder.add_text_field("stack_trace", TEXT);
        builder.add_i64_field("timestamp_millis", INDEXED | FAST);
        builder.build()
    }

    fn to_document(&self, record: &LogRecord) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.id, &record.id);
        doc.add_text(self.fields.level, record.level.as_str());
        doc.add_text(self.fields.service_name, &record.service_name);
        doc.add_text(self.fields.agent_id, &record.agent_id);
        doc.add_text(self.fields.platform, record.platform.as_str());
        doc.add_text(self.fields.message, &record.message);
        doc.add_i64(
            self.fields.timestamp_millis,
            record.timestamp.timestamp_millis(),
        );
        if let Some(stack) = &record.stack_trace {
            doc.add_text(self.fields.stack_trace, stack);
        }
        if let Some(device) = &record.device_info {
            if let Some(platform) = &device.platform {
                doc.add_text(self.fields.device_platform, platform);
            }
            if let Some(model) = &device.model {
                doc.add_text(self.fields.device_model, model);
            }
        }
        if let Some(source) = &record.source_location {
            if let Some(file) = &source.file {
                doc.add_text(self.fields.source_file, file);
            }
            if let Some(function) = &source.function {
                doc.add_text(self.fields.source_function, function);
            }
        }
        doc
    }

    /// Indexes a single record.
    ///
    /// # Errors
    ///
    /// Returns an error when the write or commit fails.
    pub fn index(&self, record: &LogRecord) -> IndexResult<()> {
        self.index_batch(std::slice::from_ref(record))
    }

    /// Indexes a batch with a single commit.
    ///
    /// Re-indexing an id replaces the previous document, matching the
    /// store's upsert semantics.
    ///
    /// # Errors
    ///
    /// Returns an error when the write or commit fails.
    pub fn index_batch(&self, records: &[LogRecord]) -> IndexResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut writer = self.writer.lock();
            for record in records {
                writer.delete_term(Term::from_field_text(self.fields.id, &record.id));
                writer.add_document(self.to_document(record))?;
            }
            writer.commit()?;
        }
        self.reader.reload()?;
        debug!(count = records.len(), "indexed batch");
        Ok(())
    }

    /// Removes documents by record id.
    ///
    /// # Errors
    ///
    /// Returns an error when the commit fails.
    pub fn delete(&self, ids: &[String]) -> IndexResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        {
            let mut writer = self.writer.lock();
            for id in ids {
                writer.delete_term(Term::from_field_text(self.fields.id, id));
            }
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Full-text candidate lookup: returns up to `cap` record ids matching
    /// the free-text term and the query's structured filters, newest first.
    ///
    /// Every whitespace-separated token must match `message` or
    /// `stack_trace`; structured filters and the time range are conjunctive.
    ///
    /// # Errors
    ///
    /// Returns an error when the search cannot execute.
    pub fn search(&self, text: &str, query: &LogQuery, cap: usize) -> IndexResult<Vec<String>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let text_match = BooleanQuery::new(vec![
                (
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.fields.message, token),
                        IndexRecordOption::Basic,
                    )) as Box<dyn Query>,
                ),
                (
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.fields.stack_trace, token),
                        IndexRecordOption::Basic,
                    )) as Box<dyn Query>,
                ),
            ]);
            clauses.push((Occur::Must, Box::new(text_match)));
        }

        for (field, value) in [
            (self.fields.service_name, query.service_name.as_deref()),
            (self.fields.agent_id, query.agent_id.as_deref()),
            (self.fields.level, query.level.map(|l| l.as_str())),
            (self.fields.platform, query.platform.map(|p| p.as_str())),
        ] {
            if let Some(value) = value {
                clauses.push((
                    Occur::Must,
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, value),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
        }

        if query.start_time.is_some() || query.end_time.is_some() {
            // Omitted bounds fall back to epoch / far-future sentinels.
            let lower = query.start_time.map_or(0, |t| t.timestamp_millis());
            let upper = query.end_time.map_or(i64::MAX, |t| t.timestamp_millis());
            let range = RangeQuery::new_i64_bounds(
                "timestamp_millis".to_string(),
                Bound::Included(lower),
                Bound::Included(upper),
            );
            clauses.push((Occur::Must, Box::new(range)));
        }

        let combined = BooleanQuery::new(clauses);
        let searcher = self.reader.searcher();
        let collector = TopDocs::with_limit(cap.max(1))
            .order_by_fast_field::<i64>("timestamp_millis", Order::Desc);
        let hits = searcher.search(&combined, &collector)?;

        let mut ids = Vec::with_capacity(hits.len());
        for (_ts, addr) in hits {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Current document count.
    ///
    /// # Errors
    ///
    /// Returns an error when the reader cannot be consulted.
    pub fn stats(&self) -> IndexResult<IndexStats> {
        let searcher = self.reader.searcher();
        Ok(IndexStats {
            docs: searcher.num_docs(),
        })
    }

    /// Probe used by the composite health endpoint.
    #[must_use]
    pub fn health(&self) -> ProbeReport {
        let searcher = self.reader.searcher();
        let count = searcher.search(&tantivy::query::AllQuery, &Count);
        match count {
            Ok(docs) => {
                let mut details = BTreeMap::new();
                details.insert("docs".to_string(), docs.to_string());
                ProbeReport::healthy(details)
            }
            Err(e) => ProbeReport::unhealthy(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use loghive_core::{LogLevel, Metadata, Platform};

    use super::*;

    fn record(id: &str, message: &str, service: &str, ts_millis: i64) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            timestamp: Utc.timestamp_millis_opt(ts_millis).single().unwrap(),
            level: LogLevel::Info,
            message: message.to_string(),
            service_name: service.to_string(),
            agent_id: "a1".to_string(),
            platform: Platform::Go,
            metadata: Metadata::new(),
            device_info: None,
            stack_trace: None,
            source_location: None,
        }
    }

    #[test]
    fn indexes_and_finds_by_message_token() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[
                record("id-1", "connection timeout while dialing", "svc", 100),
                record("id-2", "user logged in", "svc", 200),
            ])
            .unwrap();

        let ids = index.search("timeout", &LogQuery::default(), 10).unwrap();
        assert_eq!(ids, ["id-1"]);
    }

    #[test]
    fn all_tokens_must_match() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[
                record("id-1", "connection timeout", "svc", 100),
                record("id-2", "connection refused", "svc", 200),
            ])
            .unwrap();

        let ids = index
            .search("connection timeout", &LogQuery::default(), 10)
            .unwrap();
        assert_eq!(ids, ["id-1"]);
    }

    #[test]
    fn matches_stack_trace_tokens_too() {
        let index = SearchIndex::open_in_ram().unwrap();
        let mut r = record("id-1", "request failed", "svc", 100);
        r.stack_trace = Some("at deadlock_detector.go:42".to_string());
        index.index_batch(&[r]).unwrap();

        let ids = index.search("deadlock", &LogQuery::default(), 10).unwrap();
        assert_eq!(ids, ["id-1"]);
    }

    #[test]
    fn structured_filters_are_conjunctive() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[
                record("id-1", "timeout", "svc-a", 100),
                record("id-2", "timeout", "svc-b", 200),
            ])
            .unwrap();

        let query = LogQuery {
            service_name: Some("svc-b".to_string()),
            ..LogQuery::default()
        };
        let ids = index.search("timeout", &query, 10).unwrap();
        assert_eq!(ids, ["id-2"]);
    }

    #[test]
    fn level_filter_matches_exact_term() {
        let index = SearchIndex::open_in_ram().unwrap();
        let mut error = record("id-err", "boom", "svc", 100);
        error.level = LogLevel::Error;
        index
            .index_batch(&[error, record("id-info", "boom", "svc", 200)])
            .unwrap();

        let query = LogQuery {
            level: Some(LogLevel::Error),
            ..LogQuery::default()
        };
        assert_eq!(index.search("boom", &query, 10).unwrap(), ["id-err"]);
    }

    #[test]
    fn time_range_narrows_results() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[
                record("id-old", "timeout", "svc", 100),
                record("id-new", "timeout", "svc", 5_000),
            ])
            .unwrap();

        let query = LogQuery {
            start_time: Some(Utc.timestamp_millis_opt(1_000).single().unwrap()),
            ..LogQuery::default()
        };
        assert_eq!(index.search("timeout", &query, 10).unwrap(), ["id-new"]);
    }

    #[test]
    fn results_are_newest_first() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[
                record("id-1", "timeout", "svc", 100),
                record("id-3", "timeout", "svc", 300),
                record("id-2", "timeout", "svc", 200),
            ])
            .unwrap();

        let ids = index.search("timeout", &LogQuery::default(), 10).unwrap();
        assert_eq!(ids, ["id-3", "id-2", "id-1"]);
    }

    #[test]
    fn delete_removes_documents() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[
                record("id-1", "timeout", "svc", 100),
                record("id-2", "timeout", "svc", 200),
            ])
            .unwrap();

        index.delete(&["id-1".to_string()]).unwrap();
        assert_eq!(index.search("timeout", &LogQuery::default(), 10).unwrap(), ["id-2"]);
        assert_eq!(index.stats().unwrap().docs, 1);
    }

    #[test]
    fn reindexing_an_id_replaces_the_document() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .index_batch(&[record("id-1", "first text", "svc", 100)])
            .unwrap();
        index
            .index_batch(&[record("id-1", "second text", "svc", 100)])
            .unwrap();

        assert!(index.search("first", &LogQuery::default(), 10).unwrap().is_empty());
        assert_eq!(index.search("second", &LogQuery::default(), 10).unwrap(), ["id-1"]);
        assert_eq!(index.stats().unwrap().docs, 1);
    }

    #[test]
    fn cap_limits_candidates() {
        let index = SearchIndex::open_in_ram().unwrap();
        let records: Vec<_> = (0..10)
            .map(|i| record(&format!("id-{i}"), "timeout", "svc", i * 100))
            .collect();
        index.index_batch(&records).unwrap();

        let ids = index.search("timeout", &LogQuery::default(), 3).unwrap();
        assert_eq!(ids.len(), 3);
        // Cap keeps the newest candidates.
        assert_eq!(ids[0], "id-9");
    }

    #[test]
    fn health_reports_doc_count() {
        let index = SearchIndex::open_in_ram().unwrap();
        index.index_batch(&[record("id-1", "m", "svc", 1)]).unwrap();
        let report = index.health();
        assert!(report.healthy);
        assert_eq!(report.details["docs"], "1");
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = SearchIndex::open_in_dir(dir.path()).unwrap();
            index
                .index_batch(&[record("id-1", "timeout", "svc", 100)])
                .unwrap();
        }
        let reopened = SearchIndex::open_in_dir(dir.path()).unwrap();
        assert_eq!(
            reopened.search("timeout", &LogQuery::default(), 10).unwrap(),
            ["id-1"]
        );
    }
}
