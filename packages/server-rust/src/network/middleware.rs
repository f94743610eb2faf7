//! HTTP middleware: the tower-http stack and bearer-key authentication.
//!
//! Layer ordering is outer-to-inner: request id assignment first, then
//! tracing, compression, CORS, and the request timeout. Authentication is
//! an axum middleware applied per-route-group, with the health endpoints
//! exempt.

use axum::extract::{Request, State};
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum::Router;
use subtle::ConstantTimeEq;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::handlers::AppState;

/// Applies the transport-level middleware stack to a finished router.
#[must_use]
pub fn apply_http_layers(router: Router, config: &NetworkConfig) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(cors)
            .layer(TimeoutLayer::new(config.request_timeout))
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    )
}

/// Bearer-key authentication middleware.
///
/// Disabled when no key is configured. The comparison is constant-time,
/// so timing cannot leak key prefixes.
pub async fn require_bearer_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.config.api_key.is_empty() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| {
            bool::from(token.as_bytes().ct_eq(state.config.api_key.as_bytes()))
        });

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "missing or invalid bearer key",
            })),
        )
            .into_response()
    }
}
