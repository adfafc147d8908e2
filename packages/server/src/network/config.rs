//! Configuration for the ingestion HTTP front-end.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level HTTP configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
    /// Maximum time a request may take before a 408.
    pub request_timeout: Duration,
    /// Maximum request body size in bytes before a 413.
    pub max_body_bytes: usize,
    /// Largest accepted batch on `/v1/logs/batch`.
    pub max_batch_entries: usize,
    /// API-key authentication settings.
    pub auth: AuthConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
            max_batch_entries: 1000,
            auth: AuthConfig::default(),
        }
    }
}

/// API-key authentication settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// When false, every request carries full permissions.
    pub enabled: bool,
    /// Accepted keys.
    pub keys: Vec<ApiKeyConfig>,
}

/// One configured API key.
#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    /// The opaque key value presented by clients.
    pub key: String,
    /// What the key may do.
    pub permissions: Vec<Permission>,
    /// Optional per-key rate limit, overriding the limiter default.
    pub requests_per_minute: Option<u32>,
}

/// Permission set attached to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Submit records to the ingest endpoints.
    Write,
    /// Query records, stats, and health details.
    Read,
    /// Reset the breaker, unblock keys, force flushes.
    Admin,
}
