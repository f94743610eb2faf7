//! The `tract` plugin: goal-planning tables with an FK chain.
//!
//! Hierarchy: `goals` ← `csfs` ← `fwus` ← `implementation_contexts`.
//! Push validation enforces that child rows name their parent, and batch
//! reordering guarantees parents land first within one push.

use std::sync::OnceLock;

use crate::changelog::NewChangeLogEntry;

use super::{Migration, Plugin, TableSchema};

const MIGRATIONS: [Migration; 1] = [Migration {
    version: 1,
    up: "CREATE TABLE IF NOT EXISTS goals (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS csfs (
            id TEXT PRIMARY KEY,
            goal_id TEXT NOT NULL REFERENCES goals(id),
            title TEXT NOT NULL,
            status TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS fwus (
            id TEXT PRIMARY KEY,
            csf_id TEXT NOT NULL REFERENCES csfs(id),
            title TEXT NOT NULL,
            status TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS implementation_contexts (
            id TEXT PRIMARY KEY,
            fwu_id TEXT NOT NULL REFERENCES fwus(id),
            summary TEXT,
            content TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_csfs_goal_id ON csfs(goal_id);
        CREATE INDEX IF NOT EXISTS idx_fwus_csf_id ON fwus(csf_id);
        CREATE INDEX IF NOT EXISTS idx_impl_contexts_fwu_id
            ON implementation_contexts(fwu_id);",
    down: "DROP TABLE IF EXISTS implementation_contexts;
        DROP TABLE IF EXISTS fwus;
        DROP TABLE IF EXISTS csfs;
        DROP TABLE IF EXISTS goals;",
}];

/// Domain plugin for `tract` stores.
pub struct TractPlugin {
    schemas: &'static [TableSchema],
}

fn tract_schemas() -> &'static [TableSchema] {
    static SCHEMAS: OnceLock<Vec<TableSchema>> = OnceLock::new();
    SCHEMAS.get_or_init(|| {
        vec![
            TableSchema::new(
                "goals",
                &["id", "title", "description", "status", "created_at", "updated_at", "deleted_at"],
            ),
            TableSchema::new(
                "csfs",
                &["id", "goal_id", "title", "status", "created_at", "updated_at", "deleted_at"],
            )
            .with_parent("goals", "goal_id"),
            TableSchema::new(
                "fwus",
                &["id", "csf_id", "title", "status", "created_at", "updated_at", "deleted_at"],
            )
            .with_parent("csfs", "csf_id"),
            TableSchema::new(
                "implementation_contexts",
                &["id", "fwu_id", "summary", "content", "created_at", "updated_at", "deleted_at"],
            )
            .with_parent("fwus", "fwu_id"),
        ]
    })
}

impl TractPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: tract_schemas(),
        }
    }
}

impl Default for TractPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for TractPlugin {
    fn type_name(&self) -> &'static str {
        "tract"
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

        let schema = self
            .schema_for(&entry.table_name)
            .ok_or_else(|| format!("unknown table: {}", entry.table_name))?;

        if let Some(fk) = &schema.parent {
            match object.get(&fk.column) {
                Some(serde_json::Value::String(parent_id)) if !parent_id.is_empty() => {}
                Some(_) => {
                    return Err(format!("{} must be a non-empty string", fk.column));
                }
                None => return Err(format!("{} is required", fk.column)),
            }
        }

        if matches!(entry.table_name.as_str(), "goals" | "csfs" | "fwus") {
            match object.get("title") {
                Some(serde_json::Value::String(title)) if !title.trim().is_empty() => {}
                _ => return Err("title is required".to_string()),
            }
        }

        Ok(())
    }
}
