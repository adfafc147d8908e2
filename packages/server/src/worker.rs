//! Handle for the service's long-running background workers.
//!
//! Exactly four workers exist: the buffer flusher, the rate-limit cleaner,
//! the retention scheduler, and the recovery-file cleaner. Each owns a
//! watch-based stop signal and is joined on shutdown, so no background task
//! outlives the server.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A spawned background worker with an explicit stop signal.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns a worker task. The factory receives the stop receiver; the
    /// task must exit promptly once the receiver observes `true`.
    pub fn spawn<F, Fut>(name: &'static str, factory: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(factory(stop_rx));
        debug!(worker = name, "worker started");
        Self {
            name,
            stop_tx,
            handle,
        }
    }

    /// Signals the worker to stop and waits for it to exit.
    pub async fn stop(self) {
        // Ignore send errors -- the worker may already have exited.
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(worker = self.name, error = %e, "worker join failed");
        } else {
            debug!(worker = self.name, "worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn worker_runs_until_stopped() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let worker = WorkerHandle::spawn("test", move |mut stop_rx| async move {
            let mut interval = tokio::time::interval(Duration::from_millis(5));
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {}
                }
            }
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!finished.load(Ordering::SeqCst));

        worker.stop().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_after_worker_exit_is_harmless() {
        let worker = WorkerHandle::spawn("short-lived", |_stop_rx| async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.stop().await;
    }
}
