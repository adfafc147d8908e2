//! HTTP error responses with the tagged error-code contract.
//!
//! Every error body has the shape `{"error": {"code", "message", "details?"}}`
//! so clients can branch on `code` without parsing prose. Rate-limit errors
//! additionally carry a `Retry-After` header.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use loghive_core::validate::RejectedRecord;
use serde_json::json;

/// A client- or server-visible HTTP error.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    #[must_use]
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_JSON", message)
    }

    /// Single-record validation failure carrying the field errors.
    #[must_use]
    pub fn validation(errors: &[loghive_core::FieldError]) -> Self {
        let mut err = Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "log record failed validation",
        );
        err.details = Some(json!({ "errors": errors }));
        err
    }

    /// Batch validation failure carrying the rejected entries.
    #[must_use]
    pub fn batch_validation(invalid: &[RejectedRecord]) -> Self {
        let entries: Vec<serde_json::Value> = invalid
            .iter()
            .map(|rejected| {
                json!({
                    "index": rejected.index,
                    "errors": rejected.errors,
                })
            })
            .collect();
        let mut err = Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("{} batch entries failed validation", invalid.len()),
        );
        err.details = Some(json!({ "invalid_entries": entries }));
        err
    }

    #[must_use]
    pub fn empty_batch() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "EMPTY_BATCH",
            "batch must contain at least one record",
        )
    }

    #[must_use]
    pub fn batch_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "BATCH_TOO_LARGE",
            format!("batch exceeds {limit} entries"),
        )
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    #[must_use]
    pub fn forbidden(permission: super::config::Permission) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            format!("API key lacks the {permission:?} permission").to_lowercase(),
        )
    }

    /// 429 with a `Retry-After` header.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64, blocked: bool) -> Self {
        let message = if blocked {
            "key is temporarily blocked for repeated violations"
        } else {
            "rate limit exceeded"
        };
        let mut err = Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message);
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    #[must_use]
    pub fn buffer_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "BUFFER_ERROR", message)
    }

    #[must_use]
    pub fn data_protection(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATA_PROTECTION_ERROR",
            message,
        )
    }

    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
