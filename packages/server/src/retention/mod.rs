//! Scheduled pruning of stored records by age and by count.
//!
//! The time pass computes a cutoff per level (per-level override, else the
//! default; 0 days means retain forever) and deletes strictly older records.
//! The count passes enforce optional caps on the total record count and on
//! each `(service_name, agent_id)` pair, deleting oldest first. All deletes
//! go through the store, so the search-index cascade applies.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use loghive_core::{ClockSource, LogLevel};
use serde::Serialize;
use tracing::{info, warn};

use crate::storage::LogStore;
use crate::worker::WorkerHandle;

/// Retention policy configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Default retention in days; 0 retains indefinitely.
    pub default_days: u32,
    /// Per-level overrides of `default_days`.
    pub per_level_days: BTreeMap<LogLevel, u32>,
    /// Optional cap on the total record count.
    pub max_total_logs: Option<u64>,
    /// Optional cap per `(service_name, agent_id)` pair.
    pub max_logs_per_service: Option<u64>,
    /// Scheduler interval.
    pub interval: Duration,
    /// Ids deleted per statement.
    pub delete_batch: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_days: 30,
            per_level_days: BTreeMap::new(),
            max_total_logs: None,
            max_logs_per_service: None,
            interval: Duration::from_secs(3600),
            delete_batch: 500,
        }
    }
}

/// What one retention pass removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub deleted_by_age: u64,
    pub deleted_by_total_cap: u64,
    pub deleted_by_service_cap: u64,
}

impl RetentionReport {
    #[must_use]
    pub fn total_deleted(&self) -> u64 {
        self.deleted_by_age + self.deleted_by_total_cap + self.deleted_by_service_cap
    }
}

/// Scheduled pruning engine.
pub struct RetentionEngine {
    store: Arc<dyn LogStore>,
    config: RetentionConfig,
    clock: Arc<dyn ClockSource>,
}

impl RetentionEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn LogStore>,
        config: RetentionConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Runs one full retention pass: age, then total cap, then service caps.
    pub async fn run_once(&self) -> RetentionReport {
        let mut report = RetentionReport::default();
        self.age_pass(&mut report).await;
        self.total_cap_pass(&mut report).await;
        self.service_cap_pass(&mut report).await;

        if report.total_deleted() > 0 {
            info!(
                by_age = report.deleted_by_age,
                by_total_cap = report.deleted_by_total_cap,
                by_service_cap = report.deleted_by_service_cap,
                "retention pass complete"
            );
        }
        report
    }

    async fn age_pass(&self, report: &mut RetentionReport) {
        let now = self.clock.now();
        for level in LogLevel::ALL {
            let days = self
                .config
                .per_level_days
                .get(&level)
                .copied()
                .unwrap_or(self.config.default_days);
            if days == 0 {
                continue;
            }
            let cutoff = now - chrono::Duration::days(i64::from(days));

            loop {
                let ids = match self
                    .store
                    .ids_older_than(Some(level), cutoff, self.config.delete_batch)
                    .await
                {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!(level = %level, error = %e, "retention scan failed");
                        break;
                    }
                };
                if ids.is_empty() {
                    break;
                }
                match self.store.delete_by_ids(&ids).await {
                    Ok(deleted) => report.deleted_by_age += deleted,
                    Err(e) => {
                        warn!(level = %level, error = %e, "retention delete failed");
                        break;
                    }
                }
            }
        }
    }

    async fn total_cap_pass(&self, report: &mut RetentionReport) {
        let Some(max_total) = self.config.max_total_logs else {
            return;
        };
        loop {
            let total = match self.store.count().await {
                Ok(total) => total,
                Err(e) => {
                    warn!(error = %e, "retention count failed");
                    return;
                }
            };
            if total <= max_total {
                return;
            }
            let excess = usize::try_from(total - max_total).unwrap_or(usize::MAX);
            let take = excess.min(self.config.delete_batch);
            let ids = match self.store.oldest_ids(take).await {
                Ok(ids) if !ids.is_empty() => ids,
                Ok(_) => return,
                Err(e) => {
                    warn!(error = %e, "retention oldest scan failed");
                    return;
                }
            };
            match self.store.delete_by_ids(&ids).await {
                Ok(deleted) => report.deleted_by_total_cap += deleted,
                Err(e) => {
                    warn!(error = %e, "retention delete failed");
                    return;
                }
            }
        }
    }

    async fn service_cap_pass(&self, report: &mut RetentionReport) {
        let Some(max_per_service) = self.config.max_logs_per_service else {
            return;
        };
        let services = match self.store.services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, "retention service scan failed");
                return;
            }
        };

        // The rollup is per (service, agent, platform); the cap applies per
        // (service, agent), so sum across platforms first.
        let mut counts: HashMap<(String, String), u64> = HashMap::new();
        for descriptor in services {
            *counts
                .entry((descriptor.service_name, descriptor.agent_id))
                .or_insert(0) += descriptor.log_count;
        }

        for ((service, agent), count) in counts {
            if count <= max_per_service {
                continue;
            }
            let mut excess = usize::try_from(count - max_per_service).unwrap_or(usize::MAX);
            while excess > 0 {
                let take = excess.min(self.config.delete_batch);
                let ids = match self
                    .store
                    .oldest_ids_for_service(&service, &agent, take)
                    .await
                {
                    Ok(ids) if !ids.is_empty() => ids,
                    Ok(_) => break,
                    Err(e) => {
                        warn!(service = %service, agent = %agent, error = %e, "retention service scan failed");
                        break;
                    }
                };
                let got = ids.len();
                match self.store.delete_by_ids(&ids).await {
                    Ok(deleted) => report.deleted_by_service_cap += deleted,
                    Err(e) => {
                        warn!(service = %service, agent = %agent, error = %e, "retention delete failed");
                        break;
                    }
                }
                excess = excess.saturating_sub(got);
            }
        }
    }

    /// Spawns the retention scheduler worker.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let interval = self.config.interval;
        WorkerHandle::spawn("retention-scheduler", move |mut stop_rx| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let _ = self.run_once().await;
                    }
                }
            }
        })
    }
}
