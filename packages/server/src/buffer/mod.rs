//! Bounded in-memory buffer between the HTTP accept path and storage.
//!
//! `add()` never rejects: when the queue would exceed capacity, the oldest
//! records are dropped and counted, so the accept path stays O(1) and a slow
//! store degrades visibly (overflow metric, degraded health) instead of
//! failing producers. A dedicated flusher drains the queue in order-preserving
//! batches on three triggers: a capacity-1 signal channel (sent when the
//! queued count reaches one batch), the periodic tick, and an explicit flush.
//!
//! On shutdown the buffer stops the flusher, spills whatever is still queued
//! to the recovery manager, and makes one final bounded storage attempt.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use loghive_core::LogRecord;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::metrics::IngestMetrics;
use crate::recovery::RecoveryManager;
use crate::storage::LogStore;
use crate::worker::WorkerHandle;

/// Buffer configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum queued records; the oldest are dropped past this.
    pub capacity: usize,
    /// Largest batch handed to one storage write.
    pub max_batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Bound on the final flush during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_batch_size: 100,
            flush_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Snapshot for the stats endpoint and the composite health check.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub size: usize,
    pub capacity: usize,
    pub max_batch_size: usize,
    pub overflow_count: u64,
    pub flush_errors: u64,
}

impl BufferStats {
    /// Queue occupancy as a fraction of capacity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size as f64 / self.capacity as f64
        }
    }
}

/// Bounded queue with a dedicated background flusher.
pub struct MessageBuffer {
    config: BufferConfig,
    queue: Mutex<VecDeque<LogRecord>>,
    store: Arc<dyn LogStore>,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: Arc<IngestMetrics>,
    flush_tx: mpsc::Sender<()>,
    flush_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl MessageBuffer {
    #[must_use]
    pub fn new(
        config: BufferConfig,
        store: Arc<dyn LogStore>,
        breaker: Option<Arc<CircuitBreaker>>,
        metrics: Arc<IngestMetrics>,
    ) -> Arc<Self> {
        let (flush_tx, flush_rx) = mpsc::channel(1);
        Arc::new(Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            store,
            breaker,
            metrics,
            flush_tx,
            flush_rx: Mutex::new(Some(flush_rx)),
        })
    }

    /// Appends records, dropping the oldest on overflow.
    ///
    /// Returns the number of records dropped. Order within one call is
    /// preserved into storage batches. When the queued count reaches one
    /// batch, a non-blocking flush signal is sent.
    pub fn add(&self, records: Vec<LogRecord>) -> usize {
        let added = records.len();
        let (dropped, size) = {
            let mut queue = self.queue.lock();
            queue.extend(records);
            let mut dropped = 0;
            while queue.len() > self.config.capacity {
                queue.pop_front();
                dropped += 1;
            }
            (dropped, queue.len())
        };

        self.metrics.add_buffered(added as u64);
        if dropped > 0 {
            self.metrics.add_overflow_dropped(dropped as u64);
            warn!(dropped, "buffer overflow, dropped oldest records");
        }
        if size >= self.config.max_batch_size {
            // Full channel means a flush is already pending.
            let _ = self.flush_tx.try_send(());
        }
        dropped
    }

    /// Current queue length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Snapshot for stats and health.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            size: self.len(),
            capacity: self.config.capacity,
            max_batch_size: self.config.max_batch_size,
            overflow_count: self.metrics.overflow_dropped(),
            flush_errors: self.metrics.flush_errors(),
        }
    }

    async fn write_batch(&self, batch: &[LogRecord]) -> bool {
        let result = match &self.breaker {
            Some(breaker) => breaker
                .call(|| self.store.store(batch))
                .await
                .map_err(|e| e.to_string()),
            None => self.store.store(batch).await.map_err(|e| e.to_string()),
        };
        match result {
            Ok(()) => {
                self.metrics.add_stored(batch.len() as u64);
                true
            }
            Err(error) => {
                warn!(error = %error, count = batch.len(), "batch write failed");
                false
            }
        }
    }

    /// Drains the queue into storage in batches of `max_batch_size`.
    ///
    /// On a failed batch the records are pushed back at the front of the
    /// queue -- preserving order -- when capacity allows; otherwise they are
    /// dropped and counted as flush errors. Draining stops at the first
    /// failure so a down store is not hammered in a tight loop.
    ///
    /// Returns the number of records successfully written.
    pub async fn flush(&self) -> usize {
        let mut written = 0;
        loop {
            let batch: Vec<LogRecord> = {
                let mut queue = self.queue.lock();
                let take = queue.len().min(self.config.max_batch_size);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                return written;
            }

            if self.write_batch(&batch).await {
                written += batch.len();
                continue;
            }

            self.metrics.incr_flush_errors();
            let mut queue = self.queue.lock();
            if queue.len() + batch.len() <= self.config.capacity {
                for record in batch.into_iter().rev() {
                    queue.push_front(record);
                }
            } else {
                // Re-buffering would overflow and oscillate; count the loss.
                self.metrics.add_overflow_dropped(batch.len() as u64);
                warn!(count = batch.len(), "dropped failed batch, no capacity to re-buffer");
            }
            return written;
        }
    }

    /// Spawns the flusher worker. Call at most once.
    pub fn spawn_flusher(self: &Arc<Self>) -> WorkerHandle {
        let buffer = Arc::clone(self);
        let mut flush_rx = self
            .flush_rx
            .lock()
            .take()
            .expect("spawn_flusher called once");
        let interval = self.config.flush_interval;

        WorkerHandle::spawn("buffer-flusher", move |mut stop_rx| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        buffer.flush().await;
                    }
                    Some(()) = flush_rx.recv() => {
                        buffer.flush().await;
                    }
                }
            }
            debug!("buffer flusher exiting");
        })
    }

    /// Stops the flusher, spills queued records to the recovery manager,
    /// and makes one final bounded storage attempt.
    pub async fn stop(&self, flusher: WorkerHandle, recovery: Option<&RecoveryManager>) {
        flusher.stop().await;

        let pending: Vec<LogRecord> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "draining buffer on shutdown");

        if let Some(recovery) = recovery {
            if let Err(e) = recovery.save_pending(&pending).await {
                warn!(error = %e, "failed to save pending records");
            }
        }

        let final_write = tokio::time::timeout(
            self.config.shutdown_timeout,
            self.write_batch(&pending),
        );
        match final_write.await {
            Ok(true) => info!(count = pending.len(), "final flush succeeded"),
            Ok(false) => warn!("final flush failed, records preserved in recovery file"),
            Err(_) => warn!("final flush timed out, records preserved in recovery file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use loghive_core::{
        LogLevel, LogQuery, Metadata, Platform, QueryPage, ServiceDescriptor,
    };

    use super::*;
    use crate::storage::{MemoryStore, ProbeReport, StorageError, StorageResult};

    fn record(id: &str) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            timestamp: Utc.timestamp_millis_opt(1_000).single().unwrap(),
            level: LogLevel::Info,
            message: format!("message {id}"),
            service_name: "svc".to_string(),
            agent_id: "a1".to_string(),
            platform: Platform::Go,
            metadata: Metadata::new(),
            device_info: None,
            stack_trace: None,
            source_location: None,
        }
    }

    fn config(capacity: usize, max_batch: usize) -> BufferConfig {
        BufferConfig {
            capacity,
            max_batch_size: max_batch,
            // Effectively disabled; tests drive flushes explicitly.
            flush_interval: Duration::from_secs(3_600),
            shutdown_timeout: Duration::from_millis(200),
        }
    }

    /// Store that always fails, simulating a blocked backend.
    struct FailingStore;

    #[async_trait]
    impl LogStore for FailingStore {
        async fn store(&self, _batch: &[LogRecord]) -> StorageResult<()> {
            Err(StorageError::Query("backend down".to_string()))
        }
        async fn query(&self, _query: &LogQuery) -> StorageResult<QueryPage> {
            Ok(QueryPage::empty())
        }
        async fn get_by_ids(&self, _ids: &[String]) -> StorageResult<Vec<LogRecord>> {
            Ok(Vec::new())
        }
        async fn delete_by_ids(&self, _ids: &[String]) -> StorageResult<u64> {
            Ok(0)
        }
        async fn services(&self) -> StorageResult<Vec<ServiceDescriptor>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> StorageResult<u64> {
            Ok(0)
        }
        async fn ids_older_than(
            &self,
            _level: Option<LogLevel>,
            _cutoff: chrono::DateTime<Utc>,
            _limit: usize,
        ) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn oldest_ids(&self, _limit: usize) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn oldest_ids_for_service(
            &self,
            _service: &str,
            _agent: &str,
            _limit: usize,
        ) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn health(&self) -> ProbeReport {
            ProbeReport::unhealthy("down")
        }
    }

    #[tokio::test]
    async fn add_then_flush_writes_in_order() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(config(100, 2), store.clone(), None, metrics);

        buffer.add(vec![record("r-1"), record("r-2"), record("r-3")]);
        assert_eq!(buffer.len(), 3);

        let written = buffer.flush().await;
        assert_eq!(written, 3);
        assert!(buffer.is_empty());
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        // S3: capacity 3, blocked storage, 5 records in.
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(
            config(3, 100),
            Arc::new(FailingStore),
            None,
            Arc::clone(&metrics),
        );

        for i in 1..=5 {
            buffer.add(vec![record(&format!("r-{i}"))]);
        }

        let stats = buffer.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.overflow_count, 2);

        // The two oldest were dropped; r-3..r-5 remain in order.
        let remaining: Vec<String> = buffer.queue.lock().iter().map(|r| r.id.clone()).collect();
        assert_eq!(remaining, ["r-3", "r-4", "r-5"]);
    }

    #[tokio::test]
    async fn capacity_is_never_exceeded() {
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(config(10, 100), Arc::new(FailingStore), None, metrics);

        for i in 0..50 {
            buffer.add(vec![record(&format!("r-{i}"))]);
            assert!(buffer.len() <= 10);
        }
    }

    #[tokio::test]
    async fn failed_batch_is_rebuffered_in_order() {
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(
            config(100, 10),
            Arc::new(FailingStore),
            None,
            Arc::clone(&metrics),
        );

        buffer.add(vec![record("r-1"), record("r-2")]);
        let written = buffer.flush().await;
        assert_eq!(written, 0);

        let stats = buffer.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.flush_errors, 1);

        let queued: Vec<String> = buffer.queue.lock().iter().map(|r| r.id.clone()).collect();
        assert_eq!(queued, ["r-1", "r-2"]);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_when_rebuffer_would_overflow() {
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(
            BufferConfig {
                capacity: 3,
                max_batch_size: 3,
                flush_interval: Duration::from_secs(3_600),
                shutdown_timeout: Duration::from_millis(200),
            },
            Arc::new(FailingStore),
            None,
            Arc::clone(&metrics),
        );

        buffer.add(vec![record("r-1"), record("r-2"), record("r-3")]);

        // While the batch is being written, new records fill the queue.
        let flush = buffer.flush();
        // flush drains first, then fails; re-buffering 3 into a queue that
        // meanwhile gained records would overflow.
        buffer.add(vec![record("r-4"), record("r-5")]);
        let _ = flush.await;

        let stats = buffer.stats();
        assert!(stats.size <= 3);
        assert!(stats.flush_errors >= 1);
    }

    #[tokio::test]
    async fn signal_triggers_background_flush() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(config(100, 3), store.clone(), None, metrics);
        let flusher = buffer.spawn_flusher();

        // Three records reach max_batch_size and fire the signal.
        buffer.add(vec![record("r-1"), record("r-2"), record("r-3")]);

        let mut waited = 0;
        while store.count().await.unwrap() < 3 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(store.count().await.unwrap(), 3);

        buffer.stop(flusher, None).await;
    }

    #[tokio::test]
    async fn periodic_tick_flushes() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(
            BufferConfig {
                capacity: 100,
                max_batch_size: 50,
                flush_interval: Duration::from_millis(20),
                shutdown_timeout: Duration::from_millis(200),
            },
            store.clone(),
            None,
            metrics,
        );
        let flusher = buffer.spawn_flusher();

        // One record: below the batch threshold, so only the tick flushes it.
        buffer.add(vec![record("r-1")]);

        let mut waited = 0;
        while store.count().await.unwrap() < 1 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(store.count().await.unwrap(), 1);

        buffer.stop(flusher, None).await;
    }

    #[tokio::test]
    async fn stop_spills_to_recovery_and_attempts_final_write() {
        let dir = tempfile::tempdir().unwrap();
        let recovery = RecoveryManager::new(
            crate::recovery::RecoveryConfig {
                dir: dir.path().to_path_buf(),
                ..crate::recovery::RecoveryConfig::default()
            },
            Arc::new(loghive_core::SystemClock),
        );

        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(
            config(100, 10),
            Arc::new(FailingStore),
            None,
            metrics,
        );
        let flusher = buffer.spawn_flusher();

        buffer.add(vec![record("r-1"), record("r-2")]);
        buffer.stop(flusher, Some(&recovery)).await;

        // The store was down, so the records survive in the recovery file.
        let recovered = recovery.recover_pending().await.unwrap();
        let ids: Vec<&str> = recovered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["r-1", "r-2"]);
    }

    #[tokio::test]
    async fn stop_with_healthy_store_persists_everything() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(IngestMetrics::new());
        let buffer = MessageBuffer::new(config(100, 10), store.clone(), None, metrics);
        let flusher = buffer.spawn_flusher();

        buffer.add(vec![record("r-1")]);
        buffer.stop(flusher, None).await;

        assert_eq!(store.count().await.unwrap(), 1);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// P2: the queue never exceeds capacity, whatever the add pattern.
            #[test]
            fn queue_bounded_by_capacity(
                capacity in 1_usize..50,
                adds in proptest::collection::vec(1_usize..20, 1..20),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let metrics = Arc::new(IngestMetrics::new());
                    let buffer = MessageBuffer::new(
                        config(capacity, usize::MAX),
                        Arc::new(FailingStore),
                        None,
                        metrics,
                    );
                    let mut sent = 0_u64;
                    for (batch_no, count) in adds.iter().enumerate() {
                        let records: Vec<LogRecord> = (0..*count)
                            .map(|i| record(&format!("b{batch_no}-r{i}")))
                            .collect();
                        sent += records.len() as u64;
                        buffer.add(records);
                        prop_assert!(buffer.len() <= capacity);
                    }
                    // P1 accounting: everything sent is queued or counted.
                    let stats = buffer.stats();
                    prop_assert_eq!(stats.size as u64 + stats.overflow_count, sent);
                    Ok(())
                })?;
            }
        }
    }
}
