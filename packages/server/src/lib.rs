//! Loghive Server -- HTTP log ingestion, SQLite storage, tantivy full-text
//! search, and an MCP-compatible JSON-RPC tool surface.
//!
//! Components, in dataflow order:
//!
//! - **Network** ([`network`]): axum front-end, middleware, auth, lifecycle
//! - **Buffer** ([`buffer`]): bounded queue with a dedicated flusher
//! - **Storage** ([`storage`]): `LogStore` trait, SQLite and memory adapters
//! - **Index** ([`index`]): tantivy full-text index over message/stack
//! - **Limiter** ([`limiter`]): per-key token buckets with abuse blocking
//! - **Breaker** ([`breaker`]): circuit breaker guarding storage calls
//! - **Recovery** ([`recovery`]): pending-record spill and replay
//! - **Retention** ([`retention`]): scheduled age- and count-based pruning
//! - **MCP** ([`mcp`]): JSON-RPC 2.0 tools over TCP
//! - **App** ([`app`]): assembly of all of the above

pub mod app;
pub mod breaker;
pub mod buffer;
pub mod config;
pub mod index;
pub mod limiter;
pub mod mcp;
pub mod metrics;
pub mod network;
pub mod recovery;
pub mod retention;
pub mod storage;
pub mod worker;

pub use app::App;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use buffer::{BufferConfig, MessageBuffer};
pub use config::ServerConfig;
pub use index::SearchIndex;
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use mcp::{McpConfig, McpModule, ToolRouter};
pub use metrics::IngestMetrics;
pub use network::{AppState, HttpConfig, HttpModule, Lifecycle};
pub use recovery::{RecoveryConfig, RecoveryManager};
pub use retention::{RetentionConfig, RetentionEngine};
pub use storage::{LogStore, MemoryStore, SqliteStore, StorageConfig};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}

/// Integration tests for the ingest pipeline behind the full router.
///
/// These drive the axum router directly (no sockets) through every
/// middleware layer, with the in-memory store so flushes are observable.
#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use loghive_core::{ManualClock, SystemClock, ValidationLimits, Validator};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::breaker::{BreakerConfig, CircuitBreaker};
    use crate::buffer::{BufferConfig, MessageBuffer};
    use crate::limiter::{RateLimiter, RateLimiterConfig};
    use crate::metrics::IngestMetrics;
    use crate::network::auth::ApiKeyRegistry;
    use crate::network::config::{ApiKeyConfig, AuthConfig, HttpConfig, Permission};
    use crate::network::handlers::AppState;
    use crate::network::lifecycle::Lifecycle;
    use crate::network::protection::NoopProtection;
    use crate::network::HttpModule;
    use crate::recovery::{RecoveryConfig, RecoveryManager};
    use crate::storage::{LogStore, MemoryStore};

    struct TestHarness {
        state: AppState,
        store: Arc<MemoryStore>,
    }

    fn harness_with(http: HttpConfig, limiter: RateLimiterConfig) -> TestHarness {
        let clock = Arc::new(ManualClock::new(1_714_521_600_000));
        let metrics = Arc::new(IngestMetrics::new());
        let store = Arc::new(MemoryStore::new());
        let buffer = MessageBuffer::new(
            BufferConfig {
                flush_interval: std::time::Duration::from_secs(3_600),
                ..BufferConfig::default()
            },
            store.clone() as Arc<dyn LogStore>,
            None,
            Arc::clone(&metrics),
        );
        let state = AppState {
            config: Arc::new(http.clone()),
            buffer,
            store: store.clone(),
            index: None,
            validator: Arc::new(Validator::new(ValidationLimits::default(), clock.clone())),
            limiter: Arc::new(RateLimiter::new(limiter, clock.clone())),
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig::default(), clock.clone())),
            recovery: Arc::new(RecoveryManager::new(
                RecoveryConfig::default(),
                Arc::new(SystemClock),
            )),
            metrics,
            protection: Arc::new(NoopProtection),
            registry: Arc::new(ApiKeyRegistry::from_config(&http.auth)),
            lifecycle: Arc::new(Lifecycle::new()),
            clock,
        };
        TestHarness { state, store }
    }

    fn harness() -> TestHarness {
        harness_with(HttpConfig::default(), RateLimiterConfig::default())
    }

    fn router(harness: &TestHarness) -> axum::Router {
        HttpModule::new(harness.state.clone()).build_router()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sample_record() -> Value {
        json!({
            "level": "INFO",
            "message": "Hi",
            "service_name": "svc",
            "agent_id": "a1",
            "platform": "go",
            "timestamp": "2024-05-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn single_record_happy_path() {
        // S1: 201 with a generated id; after a flush the record is queryable.
        let harness = harness();

        let response = router(&harness)
            .oneshot(post_json("/v1/logs", &sample_record()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let id = body["id"].as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        harness.state.buffer.flush().await;

        let response = router(&harness)
            .oneshot(
                Request::builder()
                    .uri("/v1/logs?service_name=svc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["logs"][0]["id"], id.as_str());
        assert_eq!(body["pagination"]["total_count"], 1);
    }

    #[tokio::test]
    async fn invalid_json_is_tagged() {
        let harness = harness();
        let response = router(&harness)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/logs")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn batch_with_one_invalid_entry_buffers_nothing() {
        // S2: the middle entry is invalid; 400 names index 1; nothing stored.
        let harness = harness();
        let mut bad = sample_record();
        bad["service_name"] = json!("bad name!");
        let batch = json!([sample_record(), bad, sample_record()]);

        let response = router(&harness)
            .oneshot(post_json("/v1/logs/batch", &batch))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["invalid_entries"][0]["index"], 1);

        harness.state.buffer.flush().await;
        assert_eq!(harness.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn valid_batch_reports_counts() {
        let harness = harness();
        let batch = json!([sample_record(), sample_record()]);

        let response = router(&harness)
            .oneshot(post_json("/v1/logs/batch", &batch))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["buffered_count"], 2);
        assert_eq!(body["total_count"], 2);

        harness.state.buffer.flush().await;
        assert_eq!(harness.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_and_oversized_batches_are_rejected() {
        let harness = harness();

        let response = router(&harness)
            .oneshot(post_json("/v1/logs/batch", &json!([])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "EMPTY_BATCH");

        let oversized: Vec<Value> = (0..1001).map(|_| sample_record()).collect();
        let response = router(&harness)
            .oneshot(post_json("/v1/logs/batch", &json!(oversized)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "BATCH_TOO_LARGE");
    }

    #[tokio::test]
    async fn health_reports_healthy_with_memory_store() {
        let harness = harness();
        let response = router(&harness)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["storage"]["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_tracks_ingest() {
        let harness = harness();
        let app = router(&harness);
        let _ = app
            .clone()
            .oneshot(post_json("/v1/logs", &sample_record()))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["logs_received"], 1);
        assert_eq!(body["logs_buffered"], 1);
    }

    #[tokio::test]
    async fn auth_enforced_when_enabled() {
        let http = HttpConfig {
            auth: AuthConfig {
                enabled: true,
                keys: vec![ApiKeyConfig {
                    key: "writer-key".to_string(),
                    permissions: vec![Permission::Write],
                    requests_per_minute: None,
                }],
            },
            ..HttpConfig::default()
        };
        let harness = harness_with(http, RateLimiterConfig::default());
        let app = router(&harness);

        // No key: 401.
        let response = app
            .clone()
            .oneshot(post_json("/v1/logs", &sample_record()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Health stays open.
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Valid key with write permission: accepted.
        let mut request = post_json("/v1/logs", &sample_record());
        request
            .headers_mut()
            .insert("x-api-key", "writer-key".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Write-only key cannot hit admin endpoints: 403.
        let mut request = Request::builder()
            .method("POST")
            .uri("/admin/circuit-breaker/reset")
            .body(Body::empty())
            .unwrap();
        request
            .headers_mut()
            .insert("x-api-key", "writer-key".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rate_limit_denies_with_retry_after() {
        let http = HttpConfig {
            auth: AuthConfig {
                enabled: true,
                keys: vec![ApiKeyConfig {
                    key: "writer-key".to_string(),
                    permissions: vec![Permission::Write],
                    requests_per_minute: None,
                }],
            },
            ..HttpConfig::default()
        };
        let limiter = RateLimiterConfig {
            burst_size: 2,
            requests_per_minute: 60,
            ..RateLimiterConfig::default()
        };
        let harness = harness_with(http, limiter);
        let app = router(&harness);

        for _ in 0..2 {
            let mut request = post_json("/v1/logs", &sample_record());
            request
                .headers_mut()
                .insert("x-api-key", "writer-key".parse().unwrap());
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let mut request = post_json("/v1/logs", &sample_record());
        request
            .headers_mut()
            .insert("x-api-key", "writer-key".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn admin_unblock_roundtrip() {
        let harness = harness();
        let app = router(&harness);

        let response = app
            .oneshot(post_json(
                "/admin/rate-limit/unblock",
                &json!({"key": "ip:10.0.0.1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["unblocked"], false);
    }

    #[tokio::test]
    async fn security_headers_and_request_id_present() {
        let harness = harness();
        let response = router(&harness)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let http = HttpConfig {
            max_body_bytes: 256,
            ..HttpConfig::default()
        };
        let harness = harness_with(http, RateLimiterConfig::default());

        let mut record = sample_record();
        record["message"] = json!("x".repeat(1024));
        let response = router(&harness)
            .oneshot(post_json("/v1/logs", &record))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
