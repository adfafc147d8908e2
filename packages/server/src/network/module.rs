//! Ingestion HTTP module with deferred startup.
//!
//! `new()` captures the shared state, `start()` binds the listener and
//! returns the actual port (port 0 means OS-assigned, used heavily in
//! tests), and `serve()` consumes the module and accepts connections until
//! the shutdown future resolves. Buffer drain and worker teardown are owned
//! by the app assembly, not by this module.

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::handlers::{
    breaker_reset_handler, breaker_stats_handler, flush_handler, health_handler,
    ingest_batch_handler, ingest_handler, list_services_handler, liveness_handler,
    metrics_handler, query_logs_handler, readiness_handler, recovery_stats_handler,
    stats_handler, unblock_handler, AppState,
};
use super::middleware::apply_http_layers;

/// HTTP front-end lifecycle: `new() -> start() -> serve()`.
pub struct HttpModule {
    state: AppState,
    listener: Option<TcpListener>,
}

impl HttpModule {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    /// Assembles the router with every route and the middleware pipeline.
    #[must_use]
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/v1/logs", post(ingest_handler).get(query_logs_handler))
            .route("/v1/logs/batch", post(ingest_batch_handler))
            .route("/v1/services", get(list_services_handler))
            .route("/v1/flush", post(flush_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .route("/recovery/stats", get(recovery_stats_handler))
            .route("/circuit-breaker/stats", get(breaker_stats_handler))
            .route("/admin/circuit-breaker/reset", post(breaker_reset_handler))
            .route("/admin/rate-limit/unblock", post(unblock_handler))
            .with_state(self.state.clone());

        apply_http_layers(router, &self.state)
    }

    /// Binds the listener to the configured host and port.
    ///
    /// Returns the actual bound port.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.state.config.host, port, "ingest listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error on a fatal I/O failure.
    ///
    /// # Panics
    ///
    /// Panics when `start()` was not called first.
    pub async fn serve(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .expect("start() must be called before serve()");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("ingest listener closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loghive_core::{SystemClock, ValidationLimits, Validator};

    use super::*;
    use crate::breaker::{BreakerConfig, CircuitBreaker};
    use crate::buffer::{BufferConfig, MessageBuffer};
    use crate::limiter::{RateLimiter, RateLimiterConfig};
    use crate::metrics::IngestMetrics;
    use crate::network::auth::ApiKeyRegistry;
    use crate::network::config::HttpConfig;
    use crate::network::lifecycle::Lifecycle;
    use crate::network::protection::NoopProtection;
    use crate::recovery::{RecoveryConfig, RecoveryManager};
    use crate::storage::MemoryStore;

    fn test_state() -> AppState {
        let clock: Arc<SystemClock> = Arc::new(SystemClock);
        let metrics = Arc::new(IngestMetrics::new());
        let store = Arc::new(MemoryStore::new());
        let config = HttpConfig::default();
        AppState {
            config: Arc::new(config.clone()),
            buffer: MessageBuffer::new(
                BufferConfig::default(),
                store.clone(),
                None,
                Arc::clone(&metrics),
            ),
            store,
            index: None,
            validator: Arc::new(Validator::new(ValidationLimits::default(), clock.clone())),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default(), clock.clone())),
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig::default(), clock.clone())),
            recovery: Arc::new(RecoveryManager::new(RecoveryConfig::default(), clock.clone())),
            metrics,
            protection: Arc::new(NoopProtection),
            registry: Arc::new(ApiKeyRegistry::from_config(&config.auth)),
            lifecycle: Arc::new(Lifecycle::new()),
            clock,
        }
    }

    #[test]
    fn build_router_succeeds() {
        let module = HttpModule::new(test_state());
        let _router = module.build_router();
    }

    #[tokio::test]
    async fn start_binds_os_assigned_port() {
        let mut module = HttpModule::new(test_state());
        let port = module.start().await.expect("bind");
        assert!(port > 0);
    }

    #[tokio::test]
    async fn serve_shuts_down_on_signal() {
        let mut module = HttpModule::new(test_state());
        module.start().await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "start() must be called before serve()")]
    async fn serve_panics_without_start() {
        let module = HttpModule::new(test_state());
        let _ = module.serve(std::future::pending::<()>()).await;
    }
}
