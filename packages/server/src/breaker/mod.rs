//! Three-state circuit breaker guarding storage calls.
//!
//! State machine:
//!
//! - **Closed**: calls execute; `max_failures` consecutive failures open the
//!   breaker and stamp the failure time.
//! - **Open**: calls are rejected without executing until `reset_timeout`
//!   elapses, then the breaker admits exactly one half-open probe.
//! - **HalfOpen**: one probe may be in flight at a time; any failure reopens
//!   the breaker, three consecutive successes close it.
//!
//! `reset()` forces Closed from any state. All transitions happen under one
//! mutex; the guarded operation itself runs without the lock held.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loghive_core::ClockSource;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub max_failures: u32,
    /// How long the breaker stays open before admitting a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Consecutive half-open successes required to close the breaker.
const HALF_OPEN_SUCCESSES: u32 = 3;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Error wrapper for guarded calls.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without executing it.
    #[error("circuit breaker is open")]
    Open,
    /// The guarded operation executed and failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time statistics for the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Mutex-guarded three-state breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn ClockSource>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Runs `op` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without executing `op` while the
    /// breaker rejects calls; otherwise forwards `op`'s own error.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let Some(is_probe) = self.admit() else {
            return Err(BreakerError::Open);
        };
        let guard = ProbeGuard {
            breaker: self,
            armed: is_probe,
        };

        let result = op().await;
        guard.disarm();

        match result {
            Ok(value) => {
                self.on_success(is_probe);
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admission decision: `Some(is_probe)` when the call may execute,
    /// `None` when the breaker rejects it.
    fn admit(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Some(false),
            BreakerState::Open => {
                let elapsed_enough = inner.last_failure.is_some_and(|at| {
                    let elapsed = self.clock.now().signed_duration_since(at);
                    elapsed.to_std().unwrap_or(Duration::ZERO) >= self.config.reset_timeout
                });
                if elapsed_enough {
                    info!("circuit breaker half-open, admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    Some(true)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    fn on_success(&self, was_probe: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                if was_probe {
                    inner.probe_in_flight = false;
                    inner.success_count += 1;
                    if inner.success_count >= HALF_OPEN_SUCCESSES {
                        info!("circuit breaker closed after successful probes");
                        inner.state = BreakerState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                    }
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.max_failures {
                    warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.last_failure = Some(self.clock.now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.last_failure = Some(self.clock.now());
                inner.probe_in_flight = false;
                inner.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    fn clear_probe(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Forces the breaker closed, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!("circuit breaker reset to closed");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    /// Snapshot for the admin endpoint.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure,
        }
    }
}

/// Clears the half-open probe flag when a probe future is dropped before
/// completing, so a cancelled probe cannot wedge the breaker.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.clear_probe();
        }
    }
}

impl<E> BreakerError<E> {
    /// True when the breaker rejected the call without executing it.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}
