//! Request/response bodies for the push, delta, and legacy lore endpoints.
//!
//! These are standalone structs used as HTTP bodies, not an enum of
//! protocol frames: each endpoint owns its pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changelog::{ChangeLogEntry, NewChangeLogEntry};

/// Body of `POST /api/v1/stores/{store_id}/sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Client-chosen idempotency key; retries reuse the same id.
    pub push_id: String,
    /// Identity of the origin writer, recorded on every entry.
    pub source_id: String,
    /// The client's domain schema version; must not exceed the server's.
    pub schema_version: i64,
    /// The operations to append, in client order.
    pub entries: Vec<NewChangeLogEntry>,
}

/// Body of a successful push acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Number of entries appended.
    pub accepted: usize,
    /// Sequence assigned to the first appended entry, if any were.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_sequence: Option<i64>,
    /// Sequence assigned to the last appended entry, if any were.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_sequence: Option<i64>,
}

/// One rejected entry inside a 422 validation failure.
///
/// Validation is all-or-nothing: the response carries the complete list
/// and zero entries are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    /// Index of the entry in the submitted batch.
    pub index: usize,
    /// Entity the entry addressed.
    pub entity_id: String,
    /// Human-readable rejection reason.
    pub reason: String,
}

/// Body of `GET /api/v1/stores/{store_id}/sync/delta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaResponse {
    /// Entries with `sequence > after`, ascending, capped at `limit`.
    pub entries: Vec<ChangeLogEntry>,
    /// Highest sequence returned, or the echoed `after` when empty.
    /// Clients pass this back as the next cursor.
    pub last_sequence: i64,
    /// Current maximum sequence in the store.
    pub latest_sequence: i64,
    /// Whether more entries remain beyond this page.
    pub has_more: bool,
}

/// Body of `GET /api/v1/stores/{store_id}/sync/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    /// Current maximum change-log sequence.
    pub latest_sequence: i64,
    /// The store's domain schema version.
    pub schema_version: i64,
    /// Highest sequence ever compacted away, if compaction has run.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_compaction_sequence: Option<i64>,
}

/// Body of the legacy `POST /api/v1/stores/{store_id}/lore` endpoint.
///
/// Legacy writes surface as ordinary change-log entries so delta clients
/// see them identically to sync-pushed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreUpsertRequest {
    /// Entity id; generated by the server when omitted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// Lore content text.
    pub content: String,
    /// Optional category label.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
    /// Optional confidence in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<f64>,
    /// Optional source attributions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sources: Option<Vec<String>>,
    /// Client-side creation instant; defaults to receipt time.
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// Acknowledgement for a legacy lore write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreUpsertResponse {
    /// Entity id of the written row.
    pub id: String,
    /// Change-log sequence the write was recorded at.
    pub sequence: i64,
}
