//! Server lifecycle controller with in-flight request tracking.
//!
//! State machine: Starting -> Serving -> Draining -> Stopped. The state sits
//! in an `ArcSwap` so probes read it lock-free; shutdown is broadcast over a
//! watch channel; in-flight work is tracked with an atomic counter and RAII
//! guards so draining can wait for MCP connections and admin operations that
//! axum's own graceful shutdown does not see.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle state, transitioned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Process is wiring components; listeners are not yet open.
    Starting,
    /// Both listeners are accepting traffic.
    Serving,
    /// Shutdown signalled; in-flight work is completing.
    Draining,
    /// All work finished.
    Stopped,
}

impl LifecycleState {
    /// Lowercase name used in health payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates startup and graceful shutdown across the two listeners and
/// the background workers.
#[derive(Debug)]
pub struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            shutdown_tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Starting)),
        }
    }

    /// Marks both listeners open.
    pub fn set_serving(&self) {
        self.state.store(Arc::new(LifecycleState::Serving));
    }

    /// Signals shutdown: moves to Draining and wakes every receiver.
    pub fn trigger_drain(&self) {
        self.state.store(Arc::new(LifecycleState::Draining));
        // Receivers may already be gone during teardown.
        let _ = self.shutdown_tx.send(true);
    }

    /// Marks the drain complete.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    /// Receiver resolved when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// RAII guard tracking one in-flight unit of work.
    ///
    /// The counter is decremented on drop, including during unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Number of in-flight units.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for in-flight work to finish, up to `timeout`.
    ///
    /// Returns true (and moves to Stopped) when everything drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.set_stopped();
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_starting_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[test]
    fn full_state_progression() {
        let lifecycle = Lifecycle::new();
        lifecycle.set_serving();
        assert_eq!(lifecycle.state(), LifecycleState::Serving);
        lifecycle.trigger_drain();
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        lifecycle.set_stopped();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn guards_track_in_flight_work() {
        let lifecycle = Lifecycle::new();
        let g1 = lifecycle.in_flight_guard();
        let g2 = lifecycle.in_flight_guard();
        assert_eq!(lifecycle.in_flight_count(), 2);
        drop(g1);
        assert_eq!(lifecycle.in_flight_count(), 1);
        drop(g2);
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_receiver_is_notified() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.shutdown_receiver();
        assert!(!*rx.borrow());

        lifecycle.trigger_drain();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn wait_idle_returns_when_drained() {
        let lifecycle = Lifecycle::new();
        lifecycle.trigger_drain();
        assert!(lifecycle.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn wait_idle_times_out_with_work_in_flight() {
        let lifecycle = Lifecycle::new();
        let _guard = lifecycle.in_flight_guard();
        lifecycle.trigger_drain();
        assert!(!lifecycle.wait_idle(Duration::from_millis(50)).await);
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
    }

    #[tokio::test]
    async fn guard_released_in_task_unblocks_wait() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.in_flight_guard();
        lifecycle.trigger_drain();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });

        assert!(lifecycle.wait_idle(Duration::from_secs(2)).await);
    }

    #[test]
    fn state_names_for_health_payloads() {
        assert_eq!(LifecycleState::Serving.as_str(), "serving");
        assert_eq!(LifecycleState::Draining.as_str(), "draining");
    }
}
