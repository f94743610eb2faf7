//! Legacy lore endpoints.
//!
//! These predate the sync protocol but share its write path: every legacy
//! write becomes a change-log entry identical in format to sync-pushed
//! ones, so delta clients observe it the same way.

use axum::extract::{Path, State};
use axum::Json;
use engram_core::messages::{LoreUpsertRequest, LoreUpsertResponse};

use super::{parse_store_id, reject_if_draining, ApiError, AppState};

/// `POST /api/v1/stores/{store_id}/lore`
pub async fn lore_upsert_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Json(request): Json<LoreUpsertRequest>,
) -> Result<Json<LoreUpsertResponse>, ApiError> {
    reject_if_draining(&state)?;
    let _guard = state.shutdown.in_flight_guard();
    let store_id = parse_store_id(&store_id)?;
    let response = state.sync.legacy_upsert(&store_id, request)?;
    Ok(Json(response))
}

/// `DELETE /api/v1/stores/{store_id}/lore/{lore_id}`
pub async fn lore_delete_handler(
    State(state): State<AppState>,
    Path((store_id, lore_id)): Path<(String, String)>,
) -> Result<Json<LoreUpsertResponse>, ApiError> {
    reject_if_draining(&state)?;
    let _guard = state.shutdown.in_flight_guard();
    let store_id = parse_store_id(&store_id)?;
    let response = state.sync.legacy_delete(&store_id, &lore_id)?;
    Ok(Json(response))
}
