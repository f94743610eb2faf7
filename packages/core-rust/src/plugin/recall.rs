//! The `recall` plugin: lore entries with embeddings.

use std::sync::OnceLock;

use crate::changelog::NewChangeLogEntry;

use super::{Migration, Plugin, TableSchema};

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        up: "CREATE TABLE IF NOT EXISTS lore_entries (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT,
                confidence REAL,
                embedding BLOB,
                sources TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_lore_entries_category
                ON lore_entries(category);",
        down: "DROP INDEX IF EXISTS idx_lore_entries_category;
            DROP TABLE IF EXISTS lore_entries;",
    },
    Migration {
        version: 2,
        up: "CREATE INDEX IF NOT EXISTS idx_lore_entries_updated_at
                ON lore_entries(updated_at);",
        down: "DROP INDEX IF EXISTS idx_lore_entries_updated_at;",
    },
];

/// Domain plugin for `recall` stores.
pub struct RecallPlugin {
    schemas: &'static [TableSchema],
}

fn recall_schemas() -> &'static [TableSchema] {
    static SCHEMAS: OnceLock<Vec<TableSchema>> = OnceLock::new();
    SCHEMAS.get_or_init(|| {
        vec![TableSchema::new(
            "lore_entries",
            &[
                "id",
                "content",
                "category",
                "confidence",
                "embedding",
                "sources",
                "created_at",
                "updated_at",
                "deleted_at",
            ],
        )
        .with_embedding()]
    })
}

impl RecallPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: recall_schemas(),
        }
    }
}

impl Default for RecallPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for RecallPlugin {
    fn type_name(&self) -> &'static str {
        "recall"
    }

    fn migrations(&self) -> &[Migration] {
        &MIGRATIONS
    }

    fn table_schemas(&self) -> &[TableSchema] {
        self.schemas
    }

    fn validate_payload(&self, entry: &NewChangeLogEntry) -> Result<(), String> {
        let Some(payload) = entry.payload.as_ref() else {
            return Err("upsert without payload".to_string());
        };
        let Some(object) = payload.as_object() else {
            return Err("payload must be a JSON object".to_string());
        };

        match object.get("content") {
            Some(serde_json::Value::String(content)) if !content.trim().is_empty() => {}
            Some(serde_json::Value::String(_)) => {
                return Err("content must not be empty".to_string());
            }
            Some(_) => return Err("content must be a string".to_string()),
            None => return Err("content is required".to_string()),
        }

        if let Some(confidence) = object.get("confidence") {
            match confidence.as_f64() {
                Some(value) if (0.0..=1.0).contains(&value) => {}
                Some(value) => {
                    return Err(format!("confidence {value} outside [0, 1]"));
                }
                None => return Err("confidence must be a number".to_string()),
            }
        }

        if let Some(sources) = object.get("sources") {
            if !sources.is_array() {
                return Err("sources must be an array".to_string());
            }
        }

        Ok(())
    }
}
