//! HTTP middleware pipeline for the ingestion front-end.
//!
//! Ordering follows the outer-to-inner convention: the first layer listed
//! processes the request first on the way in and the response last on the
//! way out. Outermost to innermost: request-id assignment, security headers,
//! request tracing, panic recovery, authentication, rate limiting, CORS,
//! body-size cap, request timeout, response compression, request-id
//! propagation. The data-protection hook runs inside the ingest handlers
//! because it needs the parsed record.

use std::any::Any;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any as CorsAny, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use super::auth::{auth_middleware, AuthContext};
use super::error::ApiError;
use super::handlers::AppState;
use crate::limiter::ip_key;

/// Applies the full middleware pipeline to the router.
pub fn apply_http_layers(router: Router, state: &AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    let cors = build_cors_layer(&state.config.cors_origins);

    router
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(CatchPanicLayer::custom(PanicResponder {
            state: state.clone(),
        }))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
}

/// Builds the CORS layer from the configured origin list.
///
/// A wildcard `"*"` allows any origin; otherwise each entry is parsed into
/// an explicit allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(CorsAny)
}

/// Converts a handler panic into a 500 and counts it.
#[derive(Clone)]
struct PanicResponder {
    state: AppState,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = axum::body::Body;

    fn response_for_panic(
        &mut self,
        err: Box<dyn Any + Send + 'static>,
    ) -> http::Response<Self::ResponseBody> {
        let detail = err
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| err.downcast_ref::<&str>().copied())
            .unwrap_or("panic");
        error!(detail, "request handler panicked");
        self.state.metrics.incr_panics();
        ApiError::internal("internal server error").into_response()
    }
}

/// Rate-limit middleware.
///
/// Health probes are exempt. The caller's IP bucket is checked first; when
/// the request is API-key authenticated, the key's own bucket (with its
/// optional per-key limit) is checked as well. Either denial is a 429 with
/// `Retry-After`.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if path == "/health" || path.starts_with("/health/") {
        return Ok(next.run(request).await);
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let auth = request.extensions().get::<AuthContext>().cloned();

    let mut decisions = Vec::with_capacity(2);
    if let Some(ip) = ip {
        decisions.push(state.limiter.check(&ip_key(&ip), None));
    }
    if let Some(key) = auth.as_ref().and_then(AuthContext::limiter_key) {
        let rpm = auth.as_ref().and_then(AuthContext::rpm_override);
        decisions.push(state.limiter.check(&key, rpm));
    }

    if let Some(denied) = decisions.iter().find(|d| !d.allowed) {
        state.metrics.incr_rate_limited();
        return Err(ApiError::rate_limited(
            denied.retry_after_secs(state.clock.now()),
            denied.blocked,
        ));
    }
    Ok(next.run(request).await)
}
