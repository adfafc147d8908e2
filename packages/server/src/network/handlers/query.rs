//! Read-side HTTP endpoints: log query and service rollup.
//!
//! These mirror the MCP `query_logs` / `list_services` tools for consumers
//! that prefer plain HTTP. Masking uses the same response-time rules: the
//! stored records are never mutated.

use std::collections::HashSet;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use loghive_core::{mask_records, LogLevel, LogQuery, Platform};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::network::auth::{require_permission, AuthContext};
use crate::network::config::Permission;
use crate::network::error::ApiError;

/// Query-string parameters for `GET /v1/logs`.
///
/// Kept flat (no nesting) so it deserializes from a plain query string.
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    pub service_name: Option<String>,
    pub agent_id: Option<String>,
    pub level: Option<LogLevel>,
    pub platform: Option<Platform>,
    pub message_contains: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Comma-separated field names to mask in the response.
    pub mask_fields: Option<String>,
}

impl LogQueryParams {
    fn into_parts(self) -> (LogQuery, HashSet<String>) {
        let mask: HashSet<String> = self
            .mask_fields
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let query = LogQuery {
            service_name: self.service_name,
            agent_id: self.agent_id,
            level: self.level,
            platform: self.platform,
            message_contains: self.message_contains,
            start_time: self.start_time,
            end_time: self.end_time,
            limit: self.limit,
            offset: self.offset,
        };
        (query, mask)
    }
}

/// `GET /v1/logs` -- filtered, paginated, optionally masked records.
pub async fn query_logs_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Read)?;
    let (query, mask) = params.into_parts();

    let page = state
        .store
        .query(&query)
        .await
        .map_err(|e| ApiError::storage(e.to_string()))?;

    let records = if mask.is_empty() {
        page.records
    } else {
        mask_records(&page.records, &mask)
    };

    Ok(Json(json!({
        "logs": records,
        "pagination": {
            "limit": query.effective_limit(),
            "offset": query.effective_offset(),
            "total_count": page.total_count,
            "has_more": page.has_more,
        },
    })))
}

/// `GET /v1/services` -- rollup of known producers.
pub async fn list_services_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Read)?;
    let services = state
        .store
        .services()
        .await
        .map_err(|e| ApiError::storage(e.to_string()))?;

    Ok(Json(json!({
        "services": services,
        "total_services": services.len(),
    })))
}
