//! Change-log entry types, the unit of replication.
//!
//! Every mutation to a store's domain tables is recorded as one
//! [`ChangeLogEntry`] in that store's append-only `change_log`. Sequences
//! are server-assigned and strictly monotonic per store; entries are never
//! rewritten, and deletes are entries rather than physical removals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of mutation a change-log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// The payload carries the full row state.
    Upsert,
    /// The row is soft-deleted; payload may be omitted.
    Delete,
}

impl ChangeOperation {
    /// Stable string form used in SQL storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    /// Parses the SQL storage form back into an operation.
    #[must_use]
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(Self::Upsert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A committed change-log row as stored and replicated.
///
/// `(store, sequence)` uniquely identifies an entry. `created_at` is the
/// client-assigned instant; `received_at` is stamped by the server inside
/// the append transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Server-assigned, strictly monotonic per store, starting at 1.
    pub sequence: i64,
    /// Domain table the entry mutates.
    pub table_name: String,
    /// Primary key of the mutated row within `table_name`.
    pub entity_id: String,
    /// Whether the entry is an upsert or a delete.
    pub operation: ChangeOperation,
    /// Full row state for upserts; usually absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
    /// Identity of the origin writer.
    pub source_id: String,
    /// Client-assigned creation instant.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Server-assigned receipt instant.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub received_at: DateTime<Utc>,
}

/// A change submitted by a client, before the server assigns a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChangeLogEntry {
    /// Domain table the entry mutates.
    pub table_name: String,
    /// Primary key of the mutated row within `table_name`.
    pub entity_id: String,
    /// Whether the entry is an upsert or a delete.
    pub operation: ChangeOperation,
    /// Full row state for upserts; usually absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
    /// Client-assigned creation instant.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl NewChangeLogEntry {
    /// Promotes a client entry to a committed entry with server-assigned
    /// sequence, source, and receipt instant.
    #[must_use]
    pub fn into_committed(
        self,
        sequence: i64,
        source_id: &str,
        received_at: DateTime<Utc>,
    ) -> ChangeLogEntry {
        ChangeLogEntry {
            sequence,
            table_name: self.table_name,
            entity_id: self.entity_id,
            operation: self.operation,
            payload: self.payload,
            source_id: source_id.to_string(),
            created_at: self.created_at,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn operation_sql_round_trip() {
        for op in [ChangeOperation::Upsert, ChangeOperation::Delete] {
            assert_eq!(ChangeOperation::from_str_opt(op.as_str()), Some(op));
        }
        assert_eq!(ChangeOperation::from_str_opt("truncate"), None);
    }

    #[test]
    fn operation_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChangeOperation::Upsert).unwrap(),
            "\"upsert\""
        );
        assert_eq!(
            serde_json::from_str::<ChangeOperation>("\"delete\"").unwrap(),
            ChangeOperation::Delete
        );
    }

    #[test]
    fn entry_json_round_trip() {
        let entry = ChangeLogEntry {
            sequence: 7,
            table_name: "lore_entries".to_string(),
            entity_id: "entity-1".to_string(),
            operation: ChangeOperation::Upsert,
            payload: Some(serde_json::json!({"content": "hello"})),
            source_id: "recall-laptop".to_string(),
            created_at: instant(1_700_000_000_000),
            received_at: instant(1_700_000_000_500),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["created_at"], 1_700_000_000_000_i64);

        let back: ChangeLogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn delete_entry_omits_payload() {
        let entry = ChangeLogEntry {
            sequence: 1,
            table_name: "lore_entries".to_string(),
            entity_id: "gone".to_string(),
            operation: ChangeOperation::Delete,
            payload: None,
            source_id: "src".to_string(),
            created_at: instant(0),
            received_at: instant(1),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn into_committed_stamps_server_fields() {
        let new = NewChangeLogEntry {
            table_name: "goals".to_string(),
            entity_id: "g1".to_string(),
            operation: ChangeOperation::Upsert,
            payload: Some(serde_json::json!({"title": "ship"})),
            created_at: instant(10),
        };
        let committed = new.into_committed(42, "tract-ci", instant(99));
        assert_eq!(committed.sequence, 42);
        assert_eq!(committed.source_id, "tract-ci");
        assert_eq!(committed.received_at, instant(99));
        assert_eq!(committed.created_at, instant(10));
    }
}
