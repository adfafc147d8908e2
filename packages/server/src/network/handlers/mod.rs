//! HTTP handlers and the shared application state they close over.

pub mod admin;
pub mod health;
pub mod ingest;
pub mod query;

use std::sync::Arc;

use loghive_core::{ClockSource, Validator};

pub use admin::{
    breaker_reset_handler, breaker_stats_handler, metrics_handler, recovery_stats_handler,
    stats_handler, unblock_handler,
};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use ingest::{flush_handler, ingest_batch_handler, ingest_handler};
pub use query::{list_services_handler, query_logs_handler};

use crate::breaker::CircuitBreaker;
use crate::buffer::MessageBuffer;
use crate::index::SearchIndex;
use crate::limiter::RateLimiter;
use crate::metrics::IngestMetrics;
use crate::network::auth::ApiKeyRegistry;
use crate::network::config::HttpConfig;
use crate::network::lifecycle::Lifecycle;
use crate::network::protection::DataProtection;
use crate::recovery::RecoveryManager;
use crate::storage::LogStore;

/// Everything the handlers and request middleware share.
///
/// All fields are `Arc`s, so cloning the state per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpConfig>,
    pub buffer: Arc<MessageBuffer>,
    pub store: Arc<dyn LogStore>,
    pub index: Option<Arc<SearchIndex>>,
    pub validator: Arc<Validator>,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub recovery: Arc<RecoveryManager>,
    pub metrics: Arc<IngestMetrics>,
    pub protection: Arc<dyn DataProtection>,
    pub registry: Arc<ApiKeyRegistry>,
    pub lifecycle: Arc<Lifecycle>,
    pub clock: Arc<dyn ClockSource>,
}
