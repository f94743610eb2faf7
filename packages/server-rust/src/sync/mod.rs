//! The sync protocol: push ingestion and delta reads over the change log.
//!
//! Push is at-least-once from the client's perspective and exactly-once
//! in effect: replays with a known `push_id` return the stored response
//! verbatim without touching the log, domain rows, or the idempotency
//! TTL. The legacy lore endpoints funnel through the same push path so
//! delta clients see their writes identically.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use engram_core::changelog::{ChangeOperation, NewChangeLogEntry};
use engram_core::messages::{
    DeltaResponse, LoreUpsertRequest, LoreUpsertResponse, PushRequest, PushResponse,
    SyncStatusResponse,
};
use engram_core::store_id::StoreId;
use tracing::{debug, info};

use crate::error::{EngramError, Result};
use crate::storage::engine::meta_keys;
use crate::storage::DEFAULT_DELTA_LIMIT;
use crate::store::StoreManager;

/// Source id recorded on entries written through the legacy endpoints.
const LEGACY_SOURCE_ID: &str = "legacy-api";

/// Result of a push: the canonical response plus whether it was an
/// idempotent replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub response: PushResponse,
    pub replayed: bool,
}

/// Store-facing sync operations shared by HTTP handlers and the legacy
/// ingest path.
pub struct SyncService {
    manager: Arc<StoreManager>,
    idempotency_ttl_secs: u64,
}

impl SyncService {
    #[must_use]
    pub fn new(manager: Arc<StoreManager>, idempotency_ttl_secs: u64) -> Self {
        Self {
            manager,
            idempotency_ttl_secs,
        }
    }

    /// The manager backing this service.
    #[must_use]
    pub fn manager(&self) -> &Arc<StoreManager> {
        &self.manager
    }

    /// Ingests a push batch: idempotency check, schema check, plugin
    /// validation, then a single transaction appending to the change log
    /// and replaying into domain tables.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` when the client is ahead, `ValidationFailed` with
    /// the complete per-entry list, or store/database failures.
    pub fn push(&self, store_id: &StoreId, request: PushRequest) -> Result<PushOutcome> {
        let store = self.manager.get_store(store_id)?;
        let engine = store.engine();

        if let Some(body) = engine.check_push_idempotency(&request.push_id)? {
            let response: PushResponse = serde_json::from_str(&body)
                .map_err(|e| EngramError::Internal(e.into()))?;
            debug!(store_id = %store_id, push_id = request.push_id, "idempotent replay");
            return Ok(PushOutcome {
                response,
                replayed: true,
            });
        }

        let server_version = engine.schema_version()?;
        if request.schema_version > server_version {
            return Err(EngramError::SchemaMismatch {
                client: request.schema_version,
                server: server_version,
            });
        }

        let plugin = store.plugin();
        let ordered = plugin
            .validate_push(request.entries)
            .map_err(EngramError::ValidationFailed)?;

        let committed = engine.apply_push(plugin.as_ref(), &request.source_id, ordered)?;
        let response = PushResponse {
            accepted: committed.len(),
            first_sequence: committed.first().map(|e| e.sequence),
            last_sequence: committed.last().map(|e| e.sequence),
        };

        let body =
            serde_json::to_string(&response).map_err(|e| EngramError::Internal(e.into()))?;
        engine.record_push_idempotency(&request.push_id, &body, self.idempotency_ttl_secs)?;

        info!(
            store_id = %store_id,
            push_id = request.push_id,
            source_id = request.source_id,
            accepted = response.accepted,
            "push accepted"
        );
        Ok(PushOutcome {
            response,
            replayed: false,
        })
    }

    /// Reads a delta page: entries with `sequence > after`, ascending,
    /// with a stable resume cursor.
    ///
    /// # Errors
    ///
    /// Store lookup or database failures.
    pub fn delta(
        &self,
        store_id: &StoreId,
        after: i64,
        limit: Option<usize>,
    ) -> Result<DeltaResponse> {
        let store = self.manager.get_store(store_id)?;
        let engine = store.engine();

        let limit = limit
            .unwrap_or(DEFAULT_DELTA_LIMIT)
            .clamp(1, DEFAULT_DELTA_LIMIT);
        let entries = engine.get_change_log_after(after, limit)?;
        let latest_sequence = engine.latest_sequence()?;
        let last_sequence = entries.last().map_or(after, |e| e.sequence);
        let has_more = entries.len() == limit && last_sequence < latest_sequence;

        Ok(DeltaResponse {
            entries,
            last_sequence,
            latest_sequence,
            has_more,
        })
    }

    /// Path of the store's current snapshot file.
    ///
    /// # Errors
    ///
    /// `SnapshotUnavailable` when none has been generated yet.
    pub fn snapshot_path(&self, store_id: &StoreId) -> Result<PathBuf> {
        let store = self.manager.get_store(store_id)?;
        store.engine().snapshot_path()
    }

    /// Cheap read clients use before entering a delta loop.
    ///
    /// # Errors
    ///
    /// Store lookup or database failures.
    pub fn status(&self, store_id: &StoreId) -> Result<SyncStatusResponse> {
        let store = self.manager.get_store(store_id)?;
        let engine = store.engine();
        Ok(SyncStatusResponse {
            latest_sequence: engine.latest_sequence()?,
            schema_version: engine.schema_version()?,
            last_compaction_sequence: engine
                .get_sync_meta(meta_keys::LAST_COMPACTION_SEQUENCE)?
                .and_then(|v| v.parse().ok()),
        })
    }

    /// Legacy lore upsert: builds a one-entry push through the normal
    /// path so the write is visible to delta like any other.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SyncService::push`].
    pub fn legacy_upsert(
        &self,
        store_id: &StoreId,
        request: LoreUpsertRequest,
    ) -> Result<LoreUpsertResponse> {
        let entity_id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut payload = serde_json::Map::new();
        payload.insert("content".to_string(), request.content.into());
        if let Some(category) = request.category {
            payload.insert("category".to_string(), category.into());
        }
        if let Some(confidence) = request.confidence {
            payload.insert("confidence".to_string(), confidence.into());
        }
        if let Some(sources) = request.sources {
            payload.insert("sources".to_string(), sources.into());
        }

        let entry = NewChangeLogEntry {
            table_name: "lore_entries".to_string(),
            entity_id: entity_id.clone(),
            operation: ChangeOperation::Upsert,
            payload: Some(serde_json::Value::Object(payload)),
            created_at: request.created_at.unwrap_or_else(Utc::now),
        };
        let outcome = self.legacy_push(store_id, entry)?;
        Ok(LoreUpsertResponse {
            id: entity_id,
            sequence: outcome.response.last_sequence.unwrap_or(0),
        })
    }

    /// Legacy lore delete: records a delete entry through the push path.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SyncService::push`].
    pub fn legacy_delete(
        &self,
        store_id: &StoreId,
        entity_id: &str,
    ) -> Result<LoreUpsertResponse> {
        let entry = NewChangeLogEntry {
            table_name: "lore_entries".to_string(),
            entity_id: entity_id.to_string(),
            operation: ChangeOperation::Delete,
            payload: None,
            created_at: Utc::now(),
        };
        let outcome = self.legacy_push(store_id, entry)?;
        Ok(LoreUpsertResponse {
            id: entity_id.to_string(),
            sequence: outcome.response.last_sequence.unwrap_or(0),
        })
    }

    fn legacy_push(&self, store_id: &StoreId, entry: NewChangeLogEntry) -> Result<PushOutcome> {
        let store = self.manager.get_store(store_id)?;
        let schema_version = store.engine().schema_version()?;
        self.push(
            store_id,
            PushRequest {
                push_id: format!("legacy-{}", uuid::Uuid::new_v4()),
                source_id: LEGACY_SOURCE_ID.to_string(),
                schema_version,
                entries: vec![entry],
            },
        )
    }
}
