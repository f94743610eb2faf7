//! Sync protocol handlers: push, delta, snapshot, and status.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use engram_core::messages::PushRequest;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::EngramError;

use super::{parse_store_id, reject_if_draining, ApiError, AppState};

/// Marker header set on idempotent push replays.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "x-idempotent-replay";

/// `POST /api/v1/stores/{store_id}/sync/push`
///
/// 200 on accept (replays carry `X-Idempotent-Replay: true`), 409 on
/// schema mismatch, 422 on validation failure with the full entry list.
pub async fn push_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Json(request): Json<PushRequest>,
) -> Result<Response, ApiError> {
    reject_if_draining(&state)?;
    let _guard = state.shutdown.in_flight_guard();
    let store_id = parse_store_id(&store_id)?;

    let outcome = state.sync.push(&store_id, request)?;
    let mut response = Json(outcome.response).into_response();
    if outcome.replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENT_REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// Query parameters of the delta endpoint.
#[derive(Debug, Deserialize)]
pub struct DeltaParams {
    #[serde(default)]
    pub after: i64,
    pub limit: Option<usize>,
}

/// `GET /api/v1/stores/{store_id}/sync/delta?after=<seq>&limit=<n>`
pub async fn delta_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(params): Query<DeltaParams>,
) -> Result<Response, ApiError> {
    let _guard = state.shutdown.in_flight_guard();
    let store_id = parse_store_id(&store_id)?;
    let delta = state.sync.delta(&store_id, params.after, params.limit)?;
    Ok(Json(delta).into_response())
}

/// `GET /api/v1/stores/{store_id}/sync/snapshot`
///
/// Streams the current snapshot as an octet-stream; 503 with
/// `Retry-After: 60` when no snapshot exists yet.
pub async fn snapshot_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> Result<Response, ApiError> {
    let _guard = state.shutdown.in_flight_guard();
    let store_id = parse_store_id(&store_id)?;
    let path = state.sync.snapshot_path(&store_id)?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError(EngramError::SnapshotUnavailable))?;
    let stream = ReaderStream::new(file);

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// `GET /api/v1/stores/{store_id}/sync/status`
pub async fn status_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> Result<Response, ApiError> {
    let _guard = state.shutdown.in_flight_guard();
    let store_id = parse_store_id(&store_id)?;
    let status = state.sync.status(&store_id)?;
    Ok(Json(status).into_response())
}
