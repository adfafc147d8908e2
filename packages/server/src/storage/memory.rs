//! In-memory [`LogStore`] for tests and ephemeral runs.
//!
//! Mirrors the SQLite adapter's semantics (upsert by id, newest-first
//! ordering, inclusive time bounds) over a mutex-guarded map. The
//! `message_contains` filter degrades to a substring check, matching the
//! SQL `LIKE` fallback.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loghive_core::{
    sort_newest_first, LogLevel, LogQuery, LogRecord, QueryPage, ServiceDescriptor,
};
use parking_lot::Mutex;

use super::error::StorageResult;
use super::{LogStore, ProbeReport};

/// Map-backed store with the same observable behavior as the SQLite adapter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, LogRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_matching(&self, query: &LogQuery) -> Vec<LogRecord> {
        let records = self.records.lock();
        let mut matching: Vec<LogRecord> = records
            .values()
            .filter(|r| query.matches_structured(r))
            .filter(|r| {
                query.message_contains.as_deref().is_none_or(|term| {
                    r.message.contains(term.trim())
                })
            })
            .cloned()
            .collect();
        sort_newest_first(&mut matching);
        matching
    }

    fn oldest_first(&self, mut records: Vec<LogRecord>) -> Vec<String> {
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        records.into_iter().map(|r| r.id).collect()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn store(&self, batch: &[LogRecord]) -> StorageResult<()> {
        let mut records = self.records.lock();
        for record in batch {
            records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> StorageResult<QueryPage> {
        let matching = self.sorted_matching(query);
        let total_count = matching.len() as u64;
        let offset = query.effective_offset();
        let limit = query.effective_limit();

        let page: Vec<LogRecord> = matching.into_iter().skip(offset).take(limit).collect();
        let has_more =
            offset.saturating_add(page.len()) < usize::try_from(total_count).unwrap_or(0);
        Ok(QueryPage {
            records: page,
            total_count,
            has_more,
        })
    }

    async fn get_by_ids(&self, ids: &[String]) -> StorageResult<Vec<LogRecord>> {
        let records = self.records.lock();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> StorageResult<u64> {
        let mut records = self.records.lock();
        let mut deleted = 0;
        for id in ids {
            if records.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn services(&self) -> StorageResult<Vec<ServiceDescriptor>> {
        let records = self.records.lock();
        let mut rollup: HashMap<(String, String, String), ServiceDescriptor> = HashMap::new();
        for record in records.values() {
            let key = (
                record.service_name.clone(),
                record.agent_id.clone(),
                record.platform.as_str().to_string(),
            );
            rollup
                .entry(key)
                .and_modify(|d| {
                    d.log_count += 1;
                    if record.timestamp > d.last_seen {
                        d.last_seen = record.timestamp;
                    }
                })
                .or_insert_with(|| ServiceDescriptor {
                    service_name: record.service_name.clone(),
                    agent_id: record.agent_id.clone(),
                    platform: record.platform,
                    last_seen: record.timestamp,
                    log_count: 1,
                });
        }
        let mut services: Vec<ServiceDescriptor> = rollup.into_values().collect();
        services.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(services)
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(self.records.lock().len() as u64)
    }

    async fn ids_older_than(
        &self,
        level: Option<LogLevel>,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let matching: Vec<LogRecord> = {
            let records = self.records.lock();
            records
                .values()
                .filter(|r| r.timestamp < cutoff)
                .filter(|r| level.is_none_or(|l| r.level == l))
                .cloned()
                .collect()
        };
        let mut ids = self.oldest_first(matching);
        ids.truncate(limit);
        Ok(ids)
    }

    async fn oldest_ids(&self, limit: usize) -> StorageResult<Vec<String>> {
        let all: Vec<LogRecord> = self.records.lock().values().cloned().collect();
        let mut ids = self.oldest_first(all);
        ids.truncate(limit);
        Ok(ids)
    }

    async fn oldest_ids_for_service(
        &self,
        service_name: &str,
        agent_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let matching: Vec<LogRecord> = {
            let records = self.records.lock();
            records
                .values()
                .filter(|r| r.service_name == service_name && r.agent_id == agent_id)
                .cloned()
                .collect()
        };
        let mut ids = self.oldest_first(matching);
        ids.truncate(limit);
        Ok(ids)
    }

    async fn health(&self) -> ProbeReport {
        let mut details = BTreeMap::new();
        details.insert("backend".to_string(), "memory".to_string());
        details.insert("records".to_string(), self.records.lock().len().to_string());
        ProbeReport::healthy(details)
    }
}
