//! Composite health plus liveness/readiness probes.
//!
//! The composite status is computed from the storage probe (through the
//! circuit breaker), the breaker state itself, and buffer occupancy:
//!
//! - **unhealthy** (503): storage probe fails or the breaker is open;
//! - **degraded** (200): buffer occupancy above 90% of capacity;
//! - **healthy** (200): otherwise.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::breaker::BreakerState;
use crate::network::lifecycle::LifecycleState;
use crate::storage::ProbeReport;

/// Occupancy fraction above which the service reports degraded.
const DEGRADED_OCCUPANCY: f64 = 0.9;

/// `GET /health` -- composite health document.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let storage_probe: Result<ProbeReport, String> = state
        .breaker
        .call(|| async {
            let report = state.store.health().await;
            if report.healthy {
                Ok(report)
            } else {
                Err(report
                    .details
                    .get("error")
                    .cloned()
                    .unwrap_or_else(|| "storage probe failed".to_string()))
            }
        })
        .await
        .map_err(|e| e.to_string());

    let breaker_stats = state.breaker.stats();
    let buffer_stats = state.buffer.stats();
    let occupancy = buffer_stats.occupancy();

    let status = if storage_probe.is_err() || breaker_stats.state == BreakerState::Open {
        "unhealthy"
    } else if occupancy > DEGRADED_OCCUPANCY {
        "degraded"
    } else {
        "healthy"
    };
    let http_status = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let storage_component = match &storage_probe {
        Ok(report) => json!({ "status": "ok", "details": report.details }),
        Err(error) => json!({ "status": "error", "error": error }),
    };
    let index_component = state.index.as_ref().map(|index| {
        let report = index.health();
        json!({
            "status": if report.healthy { "ok" } else { "error" },
            "details": report.details,
        })
    });

    let body = json!({
        "status": status,
        "state": state.lifecycle.state().as_str(),
        "timestamp": state.clock.now().to_rfc3339(),
        "components": {
            "storage": storage_component,
            "index": index_component,
            "buffer": {
                "size": buffer_stats.size,
                "capacity": buffer_stats.capacity,
                "occupancy": occupancy,
            },
            "circuit_breaker": breaker_stats,
        },
    });

    (http_status, Json(body))
}

/// `GET /health/live` -- process liveness, always 200.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// `GET /health/ready` -- 200 only while serving.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.lifecycle.state() == LifecycleState::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
