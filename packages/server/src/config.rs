//! Aggregated server configuration.
//!
//! Each component defines its own config struct next to its implementation;
//! this module only composes them. Config-file loading lives outside the
//! server -- the binary (or a test) hands over a fully-populated struct.

use std::path::PathBuf;

use loghive_core::ValidationLimits;

use crate::breaker::BreakerConfig;
use crate::buffer::BufferConfig;
use crate::limiter::RateLimiterConfig;
use crate::mcp::McpConfig;
use crate::network::HttpConfig;
use crate::recovery::RecoveryConfig;
use crate::retention::RetentionConfig;
use crate::storage::StorageConfig;

/// Everything the app assembly needs to build and run the service.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub mcp: McpConfig,
    pub storage: StorageConfig,
    /// Search index directory; `None` disables full-text search.
    pub index_dir: Option<PathBuf>,
    pub buffer: BufferConfig,
    pub limiter: RateLimiterConfig,
    pub breaker: BreakerConfig,
    pub recovery: RecoveryConfig,
    pub retention: RetentionConfig,
    pub validation: ValidationLimits,
    /// Metadata keys scrubbed at ingest by the data-protection hook.
    pub protected_metadata_keys: Vec<String>,
    /// Route buffer flush writes through the circuit breaker.
    pub guard_writes_with_breaker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_complete() {
        let config = ServerConfig::default();
        assert_eq!(config.http.port, 0);
        assert_eq!(config.mcp.port, 0);
        assert!(config.index_dir.is_none());
        assert!(config.protected_metadata_keys.is_empty());
        assert!(!config.guard_writes_with_breaker);
        assert_eq!(config.buffer.capacity, 10_000);
    }
}
