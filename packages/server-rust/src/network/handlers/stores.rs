//! Store management endpoints, mirroring the CLI operations.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::EngramError;
use crate::store::StoreInfo;

use super::{parse_store_id, reject_if_draining, ApiError, AppState};

/// Body of `POST /api/v1/stores`.
#[derive(Debug, Deserialize)]
pub struct CreateStoreRequest {
    pub id: String,
    #[serde(rename = "type", default)]
    pub store_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Succeed (200) instead of conflicting when the store exists.
    #[serde(default)]
    pub if_not_exists: bool,
}

/// `POST /api/v1/stores` -- 201 on creation, 409 when it exists (200 with
/// `if_not_exists`).
pub async fn store_create_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateStoreRequest>,
) -> Result<(StatusCode, Json<StoreInfo>), ApiError> {
    reject_if_draining(&state)?;
    let _guard = state.shutdown.in_flight_guard();
    let id = parse_store_id(&request.id)?;
    let store_type = request
        .store_type
        .unwrap_or_else(|| engram_core::DEFAULT_STORE_TYPE.to_string());

    match state
        .manager
        .create_store(&id, &store_type, request.description)
    {
        Ok(_) => {}
        Err(EngramError::StoreAlreadyExists { .. }) if request.if_not_exists => {
            let info = find_store(&state, id.as_str())?;
            return Ok((StatusCode::OK, Json(info)));
        }
        Err(e) => return Err(ApiError(e)),
    }

    let info = find_store(&state, id.as_str())?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// `GET /api/v1/stores`
pub async fn store_list_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoreInfo>>, ApiError> {
    let _guard = state.shutdown.in_flight_guard();
    Ok(Json(state.manager.list_stores()?))
}

/// `GET /api/v1/stores/{store_id}`
pub async fn store_info_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> Result<Json<StoreInfo>, ApiError> {
    let _guard = state.shutdown.in_flight_guard();
    let id = parse_store_id(&store_id)?;
    let info = find_store(&state, id.as_str())?;
    Ok(Json(info))
}

/// `DELETE /api/v1/stores/{store_id}` -- `default` is undeletable.
pub async fn store_delete_handler(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    reject_if_draining(&state)?;
    let _guard = state.shutdown.in_flight_guard();
    let id = parse_store_id(&store_id)?;
    state.manager.delete_store(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn find_store(state: &AppState, id: &str) -> Result<StoreInfo, ApiError> {
    state
        .manager
        .list_stores()?
        .into_iter()
        .find(|info| info.id == id)
        .ok_or_else(|| {
            ApiError(EngramError::StoreNotFound {
                store_id: id.to_string(),
            })
        })
}
