//! Ingestion HTTP front-end: routing, middleware, auth, lifecycle.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod module;
pub mod protection;

pub use auth::{ApiKeyRegistry, AuthContext};
pub use config::{ApiKeyConfig, AuthConfig, HttpConfig, Permission};
pub use error::ApiError;
pub use handlers::AppState;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use module::HttpModule;
pub use protection::{DataProtection, MetadataScrubber, NoopProtection, ProtectionError};
