//! Ingest endpoints: single record, batch, and forced flush.
//!
//! Accept flow: parse -> fill in id/timestamp -> validate -> data-protection
//! transform -> buffer. A record is only acknowledged (201) once it has
//! entered the buffer; durability to storage is asynchronous from there.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use loghive_core::LogRecord;
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::network::auth::{require_permission, AuthContext};
use crate::network::config::Permission;
use crate::network::error::ApiError;

/// `POST /v1/logs` -- accepts one record.
pub async fn ingest_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
    payload: Result<Json<LogRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_permission(ctx.as_deref(), Permission::Write)?;
    let Json(mut record) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;

    state.metrics.add_received(1);
    record.fill_defaults();

    let errors = state.validator.validate(&record);
    if !errors.is_empty() {
        state.metrics.incr_validation_failures();
        return Err(ApiError::validation(&errors));
    }

    state
        .protection
        .transform(&mut record)
        .map_err(|e| ApiError::data_protection(e.to_string()))?;

    let id = record.id.clone();
    state.buffer.add(vec![record]);
    debug!(id = %id, "record buffered");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "log accepted", "id": id })),
    ))
}

/// `POST /v1/logs/batch` -- accepts 1..=max entries, all or nothing.
///
/// A single invalid entry rejects the whole batch with the failing indices;
/// nothing is buffered in that case.
pub async fn ingest_batch_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
    payload: Result<Json<Vec<LogRecord>>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_permission(ctx.as_deref(), Permission::Write)?;
    let Json(mut records) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;

    if records.is_empty() {
        return Err(ApiError::empty_batch());
    }
    if records.len() > state.config.max_batch_entries {
        return Err(ApiError::batch_too_large(state.config.max_batch_entries));
    }

    state.metrics.add_received(records.len() as u64);
    for record in &mut records {
        record.fill_defaults();
    }

    let total_count = records.len();
    let split = state.validator.validate_batch(records);
    if !split.invalid.is_empty() {
        state.metrics.incr_validation_failures();
        return Err(ApiError::batch_validation(&split.invalid));
    }

    let mut accepted = split.valid;
    for record in &mut accepted {
        state
            .protection
            .transform(record)
            .map_err(|e| ApiError::data_protection(e.to_string()))?;
    }

    let buffered_count = accepted.len();
    state.buffer.add(accepted);
    debug!(count = buffered_count, "batch buffered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "batch accepted",
            "buffered_count": buffered_count,
            "total_count": total_count,
        })),
    ))
}

/// `POST /v1/flush` -- admin-forced buffer drain.
pub async fn flush_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_permission(ctx.as_deref(), Permission::Admin)?;
    let flushed = state.buffer.flush().await;
    Ok(Json(json!({ "message": "flush complete", "flushed": flushed })))
}
