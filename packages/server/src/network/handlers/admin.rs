//! Operational endpoints: metrics snapshot, component stats, and admin
//! actions (breaker reset, rate-limit unblock).

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::AppState;
use crate::network::auth::{require_permission, AuthContext};
use crate::network::config::Permission;
use crate::network::error::ApiError;

/// `GET /metrics` -- counter snapshot.
pub async fn metrics_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Read)?;
    Ok(Json(serde_json::to_value(state.metrics.snapshot()).unwrap_or_default()))
}

/// `GET /stats` -- per-component statistics.
pub async fn stats_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Read)?;

    let storage_records = state.store.count().await.ok();
    let index_stats = state
        .index
        .as_ref()
        .and_then(|index| index.stats().ok());

    Ok(Json(json!({
        "buffer": state.buffer.stats(),
        "rate_limiter": state.limiter.stats(),
        "storage": { "records": storage_records },
        "index": index_stats,
    })))
}

/// `GET /recovery/stats` -- pending-file counts.
pub async fn recovery_stats_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Read)?;
    let stats = state
        .recovery
        .stats()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!(stats)))
}

/// `GET /circuit-breaker/stats` -- breaker state and counters.
pub async fn breaker_stats_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Read)?;
    Ok(Json(json!(state.breaker.stats())))
}

/// `POST /admin/circuit-breaker/reset` -- force the breaker closed.
pub async fn breaker_reset_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Admin)?;
    state.breaker.reset();
    info!("circuit breaker reset via admin endpoint");
    Ok(Json(json!({ "message": "circuit breaker reset" })))
}

/// Body of `POST /admin/rate-limit/unblock`.
#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    /// Full limiter key, e.g. `ip:10.0.0.1` or `api_key:<fingerprint>`.
    pub key: String,
}

/// `POST /admin/rate-limit/unblock` -- lift a block early.
pub async fn unblock_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
    Json(request): Json<UnblockRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Admin)?;
    let was_blocked = state.limiter.unblock(&request.key);
    Ok(Json(json!({
        "key": request.key,
        "unblocked": was_blocked,
    })))
}
