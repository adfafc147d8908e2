//! API-key authentication.
//!
//! Keys are opaque strings presented via `X-API-Key` or
//! `Authorization: Bearer <key>`. Lookups compare the presented key against
//! every configured key in constant time (`subtle`), so a miss costs the
//! same as a hit on any prefix. Logs only ever see a short SHA-256
//! fingerprint of a key, never the key itself.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::config::{AuthConfig, Permission};
use super::error::ApiError;
use super::handlers::AppState;

/// Short key fingerprint for logs and limiter keys.
#[must_use]
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..4])
}

/// One authenticated key's capabilities.
#[derive(Debug, Clone)]
pub struct ApiKeyEntry {
    pub fingerprint: String,
    pub permissions: Vec<Permission>,
    pub requests_per_minute: Option<u32>,
}

/// Outcome of authentication, attached to the request as an extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Present when a key authenticated; absent when auth is disabled.
    pub key: Option<ApiKeyEntry>,
}

impl AuthContext {
    /// Context used when authentication is disabled: every permission.
    #[must_use]
    pub fn disabled() -> Self {
        Self { key: None }
    }

    /// True when the caller may perform actions requiring `permission`.
    #[must_use]
    pub fn allows(&self, permission: Permission) -> bool {
        match &self.key {
            None => true,
            Some(entry) => entry.permissions.contains(&permission),
        }
    }

    /// Rate-limiter key for this caller, when key-authenticated.
    #[must_use]
    pub fn limiter_key(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|entry| crate::limiter::api_key_key(&entry.fingerprint))
    }

    /// Per-key rate override, when configured.
    #[must_use]
    pub fn rpm_override(&self) -> Option<u32> {
        self.key.as_ref().and_then(|entry| entry.requests_per_minute)
    }
}

/// Registry of accepted API keys.
///
/// The map is keyed by the raw key for iteration; lookups never use the map
/// index directly -- they scan and compare in constant time.
#[derive(Debug, Default)]
pub struct ApiKeyRegistry {
    enabled: bool,
    keys: DashMap<String, ApiKeyEntry>,
}

impl ApiKeyRegistry {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let keys = DashMap::new();
        for key_config in &config.keys {
            keys.insert(
                key_config.key.clone(),
                ApiKeyEntry {
                    fingerprint: fingerprint(&key_config.key),
                    permissions: key_config.permissions.clone(),
                    requests_per_minute: key_config.requests_per_minute,
                },
            );
        }
        Self {
            enabled: config.enabled,
            keys,
        }
    }

    /// Whether authentication is enforced.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Constant-time lookup of a presented key.
    #[must_use]
    pub fn authenticate(&self, presented: &str) -> Option<ApiKeyEntry> {
        let presented = presented.as_bytes();
        let mut found = None;
        // Scan every entry so timing does not reveal which key prefix
        // matched. The registry is small (operator-configured keys).
        for entry in self.keys.iter() {
            let matches: bool = entry.key().as_bytes().ct_eq(presented).into();
            if matches {
                found = Some(entry.value().clone());
            }
        }
        found
    }
}

/// Extracts the presented API key from the request headers.
fn presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get("x-api-key") {
        return value.to_str().ok().map(str::to_string);
    }
    let auth = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(str::to_string)
}

/// Authentication middleware.
///
/// Health probes stay open so orchestrators never need credentials. When
/// auth is disabled an all-permission context is attached; otherwise a
/// missing or unknown key is a 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if !state.registry.enabled() || path == "/health" || path.starts_with("/health/") {
        request.extensions_mut().insert(AuthContext::disabled());
        return Ok(next.run(request).await);
    }

    let Some(key) = presented_key(&request) else {
        return Err(ApiError::unauthorized("missing API key"));
    };
    let Some(entry) = state.registry.authenticate(&key) else {
        return Err(ApiError::unauthorized("unknown API key"));
    };

    debug!(key = %entry.fingerprint, "authenticated request");
    request.extensions_mut().insert(AuthContext {
        key: Some(entry),
    });
    Ok(next.run(request).await)
}

/// Permission check used at the top of protected handlers.
///
/// # Errors
///
/// Returns a 403 [`ApiError`] when the context lacks the permission.
pub fn require_permission(
    ctx: Option<&AuthContext>,
    permission: Permission,
) -> Result<(), ApiError> {
    let allowed = ctx.is_none_or(|ctx| ctx.allows(permission));
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden(permission))
    }
}
