//! Injectable time source for deterministic tests.
//!
//! Every component whose behavior depends on wall-clock time (validation
//! windows, token refill, breaker timeouts, retention cutoffs) receives a
//! [`ClockSource`] instead of calling `Utc::now()` directly. Production code
//! uses [`SystemClock`]; tests use [`ManualClock`] to step time explicitly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a manually
/// advanced one. The default implementation ([`SystemClock`]) delegates to
/// `chrono::Utc::now()`.
pub trait ClockSource: Send + Sync {
    /// Returns the current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
///
/// Stores the current time as milliseconds since the Unix epoch in an atomic,
/// so a single `Arc<ManualClock>` can be shared between the component under
/// test and the test body.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at the given milliseconds since the Unix epoch.
    #[must_use]
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute instant in milliseconds since epoch.
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}
