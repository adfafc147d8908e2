//! Full service assembly: storage, index, buffer, workers, both listeners.
//!
//! `App::build` wires every component from a [`ServerConfig`], replays any
//! recovery files into the buffer, and binds both listeners (reporting the
//! actual ports, which matters for port-0 test setups). `App::run` starts
//! the four background workers and serves until the supplied shutdown future
//! resolves, then drains in order: listeners close, workers stop, the buffer
//! spills to recovery and makes its final write, in-flight work finishes.

use std::sync::Arc;

use anyhow::Context;
use loghive_core::{ClockSource, Validator};
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::buffer::MessageBuffer;
use crate::config::ServerConfig;
use crate::index::SearchIndex;
use crate::limiter::RateLimiter;
use crate::mcp::{McpModule, ToolRouter};
use crate::metrics::IngestMetrics;
use crate::network::auth::ApiKeyRegistry;
use crate::network::handlers::AppState;
use crate::network::lifecycle::Lifecycle;
use crate::network::protection::{DataProtection, MetadataScrubber, NoopProtection};
use crate::network::HttpModule;
use crate::recovery::RecoveryManager;
use crate::retention::RetentionEngine;
use crate::storage::{LogStore, SqliteStore};

/// A fully-wired service with both listeners bound.
pub struct App {
    state: AppState,
    http: HttpModule,
    mcp: McpModule,
    retention: Arc<RetentionEngine>,
    http_port: u16,
    mcp_port: u16,
}

impl App {
    /// Builds every component and binds both listeners.
    ///
    /// # Errors
    ///
    /// Returns an error when storage cannot open, the index directory is
    /// unusable, or a listener cannot bind.
    pub async fn build(config: ServerConfig, clock: Arc<dyn ClockSource>) -> anyhow::Result<Self> {
        let metrics = Arc::new(IngestMetrics::new());

        let mut sqlite = SqliteStore::open(&config.storage, Arc::clone(&metrics))
            .await
            .context("opening storage")?;
        let index = match &config.index_dir {
            Some(dir) => Some(Arc::new(
                SearchIndex::open_in_dir(dir).context("opening search index")?,
            )),
            None => None,
        };
        if let Some(index) = &index {
            sqlite.attach_index(Arc::clone(index));
        }
        let store: Arc<dyn LogStore> = Arc::new(sqlite);

        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone(), Arc::clone(&clock)));
        let buffer = MessageBuffer::new(
            config.buffer.clone(),
            Arc::clone(&store),
            config
                .guard_writes_with_breaker
                .then(|| Arc::clone(&breaker)),
            Arc::clone(&metrics),
        );

        let recovery = Arc::new(RecoveryManager::new(
            config.recovery.clone(),
            Arc::clone(&clock),
        ));
        match recovery.recover_pending().await {
            Ok(recovered) if !recovered.is_empty() => {
                info!(count = recovered.len(), "replaying recovered records");
                buffer.add(recovered);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "recovery replay failed"),
        }

        let protection: Arc<dyn DataProtection> = if config.protected_metadata_keys.is_empty() {
            Arc::new(NoopProtection)
        } else {
            Arc::new(MetadataScrubber::new(
                config.protected_metadata_keys.iter().cloned(),
            ))
        };

        let state = AppState {
            config: Arc::new(config.http.clone()),
            buffer,
            store: Arc::clone(&store),
            index,
            validator: Arc::new(Validator::new(config.validation.clone(), Arc::clone(&clock))),
            limiter: Arc::new(RateLimiter::new(config.limiter.clone(), Arc::clone(&clock))),
            breaker,
            recovery,
            metrics: Arc::clone(&metrics),
            protection,
            registry: Arc::new(ApiKeyRegistry::from_config(&config.http.auth)),
            lifecycle: Arc::new(Lifecycle::new()),
            clock: Arc::clone(&clock),
        };

        let retention = Arc::new(RetentionEngine::new(
            Arc::clone(&store),
            config.retention.clone(),
            Arc::clone(&clock),
        ));

        let mut http = HttpModule::new(state.clone());
        let http_port = http.start().await.context("binding ingest listener")?;

        let tool_router = Arc::new(ToolRouter::new(
            store,
            Arc::clone(&state.breaker),
            metrics,
            clock,
        ));
        let mut mcp = McpModule::new(
            config.mcp.clone(),
            tool_router,
            Arc::clone(&state.lifecycle),
        );
        let mcp_port = mcp.start().await.context("binding mcp listener")?;

        Ok(Self {
            state,
            http,
            mcp,
            retention,
            http_port,
            mcp_port,
        })
    }

    /// Actual ingest HTTP port.
    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Actual MCP TCP port.
    #[must_use]
    pub fn mcp_port(&self) -> u16 {
        self.mcp_port
    }

    /// Shared state handle, used by tests to reach into components.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves both listeners until `shutdown` resolves, then drains.
    ///
    /// # Errors
    ///
    /// Returns an error when either listener fails fatally.
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let lifecycle = Arc::clone(&self.state.lifecycle);

        let flusher = self.state.buffer.spawn_flusher();
        let limiter_cleaner = self.state.limiter.spawn_cleaner();
        let recovery_cleaner = self.state.recovery.spawn_cleaner();
        let retention_worker = Arc::clone(&self.retention).spawn();

        let http_shutdown = {
            let mut rx = lifecycle.shutdown_receiver();
            async move {
                let _ = rx.changed().await;
            }
        };
        let http_task = tokio::spawn(self.http.serve(http_shutdown));
        let mcp_task = tokio::spawn(self.mcp.serve(lifecycle.shutdown_receiver()));

        lifecycle.set_serving();
        info!(
            http_port = self.http_port,
            mcp_port = self.mcp_port,
            "loghive serving"
        );

        shutdown.await;
        info!("shutdown requested, draining");
        lifecycle.trigger_drain();

        http_task.await.context("joining ingest listener")??;
        mcp_task.await.context("joining mcp listener")??;

        retention_worker.stop().await;
        limiter_cleaner.stop().await;
        recovery_cleaner.stop().await;
        self.state
            .buffer
            .stop(flusher, Some(&self.state.recovery))
            .await;

        if !lifecycle
            .wait_idle(std::time::Duration::from_secs(10))
            .await
        {
            warn!("drain timeout expired with work in flight");
        }
        lifecycle.set_stopped();
        info!("loghive stopped");
        Ok(())
    }
}
