//! Disk spill and replay of in-flight records across restarts.
//!
//! On shutdown the buffer hands its still-queued records to
//! [`RecoveryManager::save_pending`], which writes one
//! `pending-<millis>.json` file: the JSON array is written to a temp file,
//! fsynced, and renamed into place, so a crash mid-write never leaves a
//! half-written pending file visible. On startup
//! [`RecoveryManager::recover_pending`] reads every pending file oldest
//! first, deletes them, and returns the aggregate for the app to push back
//! into the buffer. A background cleaner removes files past the age limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use loghive_core::{ClockSource, LogRecord};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::worker::WorkerHandle;

/// Recovery configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Directory holding `pending-*.json` files.
    pub dir: PathBuf,
    /// Files older than this are removed by the cleaner.
    pub max_file_age: Duration,
    /// Cleaner interval.
    pub cleanup_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("recovery"),
            max_file_age: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Recovery I/O errors. Callers treat these as best-effort: recovery never
/// blocks startup or shutdown.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("recovery io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recovery serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stats for the `/recovery/stats` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub pending_files: usize,
    pub total_bytes: u64,
}

/// Writes, replays, and expires pending-record files.
pub struct RecoveryManager {
    config: RecoveryConfig,
    clock: Arc<dyn ClockSource>,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(config: RecoveryConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self { config, clock }
    }

    fn file_timestamp_millis(path: &Path) -> Option<i64> {
        let name = path.file_name()?.to_str()?;
        let millis = name.strip_prefix("pending-")?.strip_suffix(".json")?;
        millis.parse().ok()
    }

    fn is_pending_file(path: &Path) -> bool {
        Self::file_timestamp_millis(path).is_some()
    }

    /// Persists `records` as one pending file. Returns the path, or `None`
    /// for an empty slice.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the file
    /// cannot be written, synced, or renamed.
    pub async fn save_pending(
        &self,
        records: &[LogRecord],
    ) -> Result<Option<PathBuf>, RecoveryError> {
        if records.is_empty() {
            return Ok(None);
        }
        tokio::fs::create_dir_all(&self.config.dir).await?;

        let millis = self.clock.now().timestamp_millis();
        let final_path = self.config.dir.join(format!("pending-{millis}.json"));
        let tmp_path = self.config.dir.join(format!(".pending-{millis}.json.tmp"));

        let json = serde_json::to_vec(records)?;
        tokio::fs::write(&tmp_path, &json).await?;
        let file = tokio::fs::File::open(&tmp_path).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &final_path).await?;

        info!(
            count = records.len(),
            path = %final_path.display(),
            "saved pending records"
        );
        Ok(Some(final_path))
    }

    /// Reads every pending file oldest first, deletes them, and returns the
    /// concatenated records.
    ///
    /// Unreadable files are logged, removed, and skipped so one corrupt file
    /// cannot wedge startup in a crash loop.
    ///
    /// # Errors
    ///
    /// Returns an error only when the recovery directory itself cannot be
    /// listed; a missing directory yields an empty result.
    pub async fn recover_pending(&self) -> Result<Vec<LogRecord>, RecoveryError> {
        let mut entries = match tokio::fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<(i64, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(millis) = Self::file_timestamp_millis(&path) {
                files.push((millis, path));
            }
        }
        files.sort_by_key(|(millis, _)| *millis);

        let mut recovered = Vec::new();
        for (_, path) in files {
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Vec<LogRecord>>(&bytes) {
                    Ok(mut records) => {
                        recovered.append(&mut records);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping corrupt pending file");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read pending file");
                }
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove pending file");
            }
        }

        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered pending records");
        }
        Ok(recovered)
    }

    /// Removes pending files older than the configured age.
    ///
    /// # Errors
    ///
    /// Returns an error only when the directory listing fails.
    pub async fn cleanup_old(&self) -> Result<usize, RecoveryError> {
        let mut entries = match tokio::fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let cutoff = self.clock.now().timestamp_millis()
            - i64::try_from(self.config.max_file_age.as_millis()).unwrap_or(i64::MAX);

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(millis) = Self::file_timestamp_millis(&path) else {
                continue;
            };
            if millis < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        removed += 1;
                        info!(path = %path.display(), "removed expired pending file");
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
                }
            }
        }
        Ok(removed)
    }

    /// Spawns the periodic cleaner worker.
    pub fn spawn_cleaner(self: &Arc<Self>) -> WorkerHandle {
        let manager = Arc::clone(self);
        let interval = self.config.cleanup_interval;
        WorkerHandle::spawn("recovery-cleaner", move |mut stop_rx| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.cleanup_old().await {
                            warn!(error = %e, "recovery cleanup pass failed");
                        }
                    }
                }
            }
        })
    }

    /// Counts pending files for the stats endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory listing fails.
    pub async fn stats(&self) -> Result<RecoveryStats, RecoveryError> {
        let mut entries = match tokio::fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RecoveryStats {
                    pending_files: 0,
                    total_bytes: 0,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut pending_files = 0;
        let mut total_bytes = 0;
        while let Some(entry) = entries.next_entry().await? {
            if Self::is_pending_file(&entry.path()) {
                pending_files += 1;
                total_bytes += entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(RecoveryStats {
            pending_files,
            total_bytes,
        })
    }
}
