//! The generic fallback plugin for unknown store types.
//!
//! Accepts any safe table name and replays payloads verbatim into a
//! single-JSON-column table created on first write. No domain validation
//! beyond name safety and basic payload shape.

use std::sync::OnceLock;

use regex::Regex;

use crate::changelog::NewChangeLogEntry;

use super::{is_reserved_table, Migration, Plugin, TableSchema};

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("table pattern is valid"))
}

/// Whether a table name is safe for dynamic creation.
#[must_use]
pub fn is_safe_table_name(name: &str) -> bool {
    name.len() <= 64 && table_name_pattern().is_match(name) && !is_reserved_table(name)
}

/// Fallback plugin: verbatim replay into dynamically-created tables.
pub struct GenericPlugin;

impl GenericPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenericPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for GenericPlugin {
    fn type_name(&self) -> &'static str {
        "generic"
    }

    fn migrations(&self) -> &[Migration] {
        &[]
    }

    fn table_schemas(&self) -> &[TableSchema] {
        &[]
    }

    fn schema_for(&self, table: &str) -> Option<TableSchema> {
        if !is_safe_table_name(table) {
            return None;
        }
        let mut schema = TableSchema::new(table, &["id", "payload"]);
        schema.dynamic = true;
        Some(schema)
    }

    fn validate_payload(&self, entry: &NewChangeLogEntry) -> Result<(), String> {
        match entry.payload.as_ref() {
            Some(payload) if payload.is_object() => Ok(()),
            Some(_) => Err("payload must be a JSON object".to_string()),
            None => Err("upsert without payload".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeOperation;
    use chrono::{TimeZone, Utc};

    #[test]
    fn safe_names() {
        assert!(is_safe_table_name("events"));
        assert!(is_safe_table_name("agent_notes_v2"));
    }

    #[test]
    fn unsafe_names() {
        assert!(!is_safe_table_name("Events"));
        assert!(!is_safe_table_name("1things"));
        assert!(!is_safe_table_name("drop table"));
        assert!(!is_safe_table_name("sqlite_master"));
        assert!(!is_safe_table_name("change_log"));
        assert!(!is_safe_table_name(&"t".repeat(65)));
    }

    #[test]
    fn synthesizes_dynamic_schema() {
        let plugin = GenericPlugin::new();
        let schema = plugin.schema_for("events").unwrap();
        assert!(schema.dynamic);
        assert!(schema.soft_delete);
        assert_eq!(schema.columns, ["id", "payload"]);
    }

    #[test]
    fn refuses_reserved_table() {
        let plugin = GenericPlugin::new();
        assert!(plugin.schema_for("sync_meta").is_none());
    }

    #[test]
    fn validate_push_rejects_unsafe_table() {
        let plugin = GenericPlugin::new();
        let batch = vec![NewChangeLogEntry {
            table_name: "DROP TABLE".to_string(),
            entity_id: "e".to_string(),
            operation: ChangeOperation::Upsert,
            payload: Some(serde_json::json!({})),
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
        }];
        let errors = plugin.validate_push(batch).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].reason.contains("unknown table"));
    }
}
