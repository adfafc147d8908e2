//! Service-wide counters backing the `/metrics` snapshot endpoint.
//!
//! Counters are plain atomics manipulated from any thread without locking;
//! rates are derived at snapshot time from the process start instant.
//! Structured per-request telemetry stays in `tracing` spans.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Atomic counters shared by every component of the service.
#[derive(Debug)]
pub struct IngestMetrics {
    started_at: Instant,
    logs_received: AtomicU64,
    logs_buffered: AtomicU64,
    logs_stored: AtomicU64,
    logs_dropped_overflow: AtomicU64,
    flush_errors: AtomicU64,
    validation_failures: AtomicU64,
    rate_limited_requests: AtomicU64,
    index_errors: AtomicU64,
    panics_recovered: AtomicU64,
    mcp_requests: AtomicU64,
}

impl IngestMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            logs_received: AtomicU64::new(0),
            logs_buffered: AtomicU64::new(0),
            logs_stored: AtomicU64::new(0),
            logs_dropped_overflow: AtomicU64::new(0),
            flush_errors: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            rate_limited_requests: AtomicU64::new(0),
            index_errors: AtomicU64::new(0),
            panics_recovered: AtomicU64::new(0),
            mcp_requests: AtomicU64::new(0),
        }
    }

    pub fn add_received(&self, n: u64) {
        self.logs_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_buffered(&self, n: u64) {
        self.logs_buffered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_stored(&self, n: u64) {
        self.logs_stored.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_overflow_dropped(&self, n: u64) {
        self.logs_dropped_overflow.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_flush_errors(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_validation_failures(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_index_errors(&self) {
        self.index_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_panics(&self) {
        self.panics_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_mcp_requests(&self) {
        self.mcp_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Current overflow count, exposed separately for buffer stats.
    #[must_use]
    pub fn overflow_dropped(&self) -> u64 {
        self.logs_dropped_overflow.load(Ordering::Relaxed)
    }

    /// Current flush error count.
    #[must_use]
    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter plus derived rates.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime_secs = self.started_at.elapsed().as_secs();
        let received = self.logs_received.load(Ordering::Relaxed);
        let logs_per_second = if uptime_secs == 0 {
            0.0
        } else {
            received as f64 / uptime_secs as f64
        };

        MetricsSnapshot {
            uptime_secs,
            logs_received: received,
            logs_per_second,
            logs_buffered: self.logs_buffered.load(Ordering::Relaxed),
            logs_stored: self.logs_stored.load(Ordering::Relaxed),
            logs_dropped_overflow: self.logs_dropped_overflow.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited_requests.load(Ordering::Relaxed),
            index_errors: self.index_errors.load(Ordering::Relaxed),
            panics_recovered: self.panics_recovered.load(Ordering::Relaxed),
            mcp_requests: self.mcp_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot served by `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub logs_received: u64,
    pub logs_per_second: f64,
    pub logs_buffered: u64,
    pub logs_stored: u64,
    pub logs_dropped_overflow: u64,
    pub flush_errors: u64,
    pub validation_failures: u64,
    pub rate_limited_requests: u64,
    pub index_errors: u64,
    pub panics_recovered: u64,
    pub mcp_requests: u64,
}
