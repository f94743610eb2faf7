//! HTTP handler definitions for the Engram server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the JSON error envelope, and re-exports all handler
//! functions for convenient access when building the router.

pub mod health;
pub mod lore;
pub mod stores;
pub mod sync;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use lore::{lore_delete_handler, lore_upsert_handler};
pub use stores::{
    store_create_handler, store_delete_handler, store_info_handler, store_list_handler,
};
pub use sync::{delta_handler, push_handler, snapshot_handler, status_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::response::{IntoResponse, Response};
use axum::Json;
use engram_core::store_id::StoreId;

use crate::error::EngramError;
use crate::store::StoreManager;
use crate::sync::SyncService;

use super::config::NetworkConfig;
use super::shutdown::ShutdownController;

/// Shared application state passed to all axum handlers via `State`.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Sync protocol operations (push, delta, snapshot, legacy ingest).
    pub sync: Arc<SyncService>,
    /// Store manager for the management endpoints.
    pub manager: Arc<StoreManager>,
    /// Graceful shutdown controller with in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, timeouts, auth key).
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// JSON error envelope produced from [`EngramError`] at the boundary.
pub struct ApiError(pub EngramError);

impl From<EngramError> for ApiError {
    fn from(error: EngramError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let mut body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        if let EngramError::ValidationFailed(errors) = &self.0 {
            body["errors"] = serde_json::to_value(errors).unwrap_or_default();
        }

        if matches!(self.0, EngramError::SnapshotUnavailable) {
            return (status, [("Retry-After", "60")], Json(body)).into_response();
        }
        (status, Json(body)).into_response()
    }
}

/// Parses a percent-decoded path parameter into a validated store id.
pub(crate) fn parse_store_id(raw: &str) -> Result<StoreId, ApiError> {
    StoreId::parse(raw).map_err(|e| ApiError(e.into()))
}

/// Rejects new write work once shutdown has begun.
pub(crate) fn reject_if_draining(state: &AppState) -> Result<(), ApiError> {
    if state.shutdown.is_shutting_down() {
        return Err(ApiError(EngramError::ShutdownInProgress));
    }
    Ok(())
}
