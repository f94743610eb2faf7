//! Domain plugins: the capability set attached to a store type.
//!
//! A [`Plugin`] defines the domain tables for one store type (`recall`,
//! `tract`, …), validates pushed batches, and replays committed change-log
//! entries into those tables through a [`RowSink`]. Unknown store types fall
//! back to the registry's generic plugin, which accepts any safe table name
//! and replays verbatim.

pub mod generic;
pub mod order;
pub mod recall;
pub mod tract;

use std::collections::HashMap;
use std::sync::Arc;

use crate::changelog::{ChangeLogEntry, ChangeOperation, NewChangeLogEntry};
use crate::messages::EntryError;

pub use generic::GenericPlugin;
pub use recall::RecallPlugin;
pub use tract::TractPlugin;

/// Tables owned by the engine itself; plugins may never write to them.
pub const RESERVED_TABLES: [&str; 4] = [
    "change_log",
    "sync_meta",
    "push_idempotency",
    "pending_embeddings",
];

/// Whether a table name is reserved for engine internals (or SQLite's own).
#[must_use]
pub fn is_reserved_table(name: &str) -> bool {
    RESERVED_TABLES.contains(&name) || name.starts_with("sqlite_")
}

/// A foreign-key edge from a child table to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Parent table the edge points to.
    pub table: String,
    /// Column on the child table holding the parent id.
    pub column: String,
}

/// Shape of one domain table, used by row-apply to build parameterized
/// statements and by push validation to order batches FK-safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Ordered column list. The first column is always the `id` primary key.
    pub columns: Vec<String>,
    /// Deletes set `deleted_at` instead of removing the row.
    pub soft_delete: bool,
    /// Upserts to this table queue the row for embedding generation.
    pub embedding: bool,
    /// FK edge to a parent table, if any.
    pub parent: Option<ForeignKey>,
    /// The table is created on first write rather than by migration
    /// (generic plugin only).
    pub dynamic: bool,
}

impl TableSchema {
    /// A statically-declared table with the given columns.
    #[must_use]
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
            soft_delete: true,
            embedding: false,
            parent: None,
            dynamic: false,
        }
    }

    /// Marks the table as embedding-bearing.
    #[must_use]
    pub fn with_embedding(mut self) -> Self {
        self.embedding = true;
        self
    }

    /// Declares an FK edge to `table` through `column`.
    #[must_use]
    pub fn with_parent(mut self, table: &str, column: &str) -> Self {
        self.parent = Some(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }
}

/// One versioned DDL step. Versions are dense and ascending per plugin;
/// the engine applies all unapplied `up` scripts at open time.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Monotonic schema version this migration produces.
    pub version: i64,
    /// Forward DDL.
    pub up: &'static str,
    /// Reverse DDL.
    pub down: &'static str,
}

/// Row-application surface the engine exposes to plugins during replay.
///
/// Implementations run inside the push transaction: every call is atomic
/// with the change-log append that triggered it.
pub trait RowSink {
    /// Inserts or fully replaces a domain row from its JSON payload.
    ///
    /// # Errors
    ///
    /// Fails on I/O or constraint violation; the surrounding transaction
    /// rolls back.
    fn upsert_row(
        &self,
        schema: &TableSchema,
        entity_id: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Deletes a domain row (soft when the schema says so).
    ///
    /// # Errors
    ///
    /// Fails on I/O; the surrounding transaction rolls back.
    fn delete_row(&self, schema: &TableSchema, entity_id: &str) -> anyhow::Result<()>;

    /// Records the row in the pending-embedding index.
    ///
    /// # Errors
    ///
    /// Fails on I/O; the surrounding transaction rolls back.
    fn queue_embedding(&self, table: &str, entity_id: &str) -> anyhow::Result<()>;
}

/// The capability set for one store type.
///
/// `validate_push` and `on_replay` have provided implementations driven by
/// [`Plugin::table_schemas`] and [`Plugin::validate_payload`]; plugins
/// normally implement only the declarative parts.
pub trait Plugin: Send + Sync + 'static {
    /// Store type this plugin serves.
    fn type_name(&self) -> &'static str;

    /// Ordered, monotonically versioned DDL scripts.
    fn migrations(&self) -> &[Migration];

    /// Declared domain tables.
    fn table_schemas(&self) -> &[TableSchema];

    /// The schema version a fully-migrated store of this type reports.
    fn schema_version(&self) -> i64 {
        self.migrations().iter().map(|m| m.version).max().unwrap_or(0)
    }

    /// Looks up the schema for one table. The generic plugin overrides this
    /// to synthesize schemas for tables it has never seen.
    fn schema_for(&self, table: &str) -> Option<TableSchema> {
        self.table_schemas().iter().find(|s| s.name == table).cloned()
    }

    /// Validates one entry's payload against its table's domain rules.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the payload is rejected.
    fn validate_payload(&self, entry: &NewChangeLogEntry) -> Result<(), String>;

    /// Validates a full batch and reorders it FK-safely.
    ///
    /// All-or-nothing: either every entry is accepted and the batch comes
    /// back parent-before-child, or the complete per-entry error list is
    /// returned and nothing is accepted.
    ///
    /// # Errors
    ///
    /// The full list of rejected entries, in submission order.
    fn validate_push(
        &self,
        entries: Vec<NewChangeLogEntry>,
    ) -> Result<Vec<NewChangeLogEntry>, Vec<EntryError>> {
        let mut errors = Vec::new();
        let mut schemas: HashMap<String, TableSchema> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            let schema = match schemas.get(&entry.table_name) {
                Some(s) => Some(s.clone()),
                None => {
                    let found = self.schema_for(&entry.table_name);
                    if let Some(s) = &found {
                        schemas.insert(entry.table_name.clone(), s.clone());
                    }
                    found
                }
            };
            if schema.is_none() {
                errors.push(EntryError {
                    index,
                    entity_id: entry.entity_id.clone(),
                    reason: format!("unknown table: {}", entry.table_name),
                });
                continue;
            }
            if entry.entity_id.is_empty() {
                errors.push(EntryError {
                    index,
                    entity_id: String::new(),
                    reason: "entity_id is empty".to_string(),
                });
                continue;
            }
            if entry.operation == ChangeOperation::Upsert {
                if let Err(reason) = self.validate_payload(entry) {
                    errors.push(EntryError {
                        index,
                        entity_id: entry.entity_id.clone(),
                        reason,
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let schema_list: Vec<TableSchema> = schemas.into_values().collect();
        order::reorder_fk_safe(entries, &schema_list).map_err(|reason| {
            vec![EntryError {
                index: 0,
                entity_id: String::new(),
                reason,
            }]
        })
    }

    /// Replays committed entries into domain tables through the sink.
    ///
    /// Entries are applied in the given (already FK-safe) order. Upserts to
    /// embedding-bearing tables are queued for embedding generation.
    ///
    /// # Errors
    ///
    /// Propagates the first sink failure; the surrounding transaction
    /// rolls back.
    fn on_replay(&self, sink: &dyn RowSink, entries: &[ChangeLogEntry]) -> anyhow::Result<()> {
        for entry in entries {
            let schema = self
                .schema_for(&entry.table_name)
                .ok_or_else(|| anyhow::anyhow!("no schema for table {}", entry.table_name))?;
            match entry.operation {
                ChangeOperation::Upsert => {
                    let payload = entry
                        .payload
                        .as_ref()
                        .ok_or_else(|| anyhow::anyhow!("upsert without payload"))?;
                    sink.upsert_row(&schema, &entry.entity_id, payload)?;
                    if schema.embedding {
                        sink.queue_embedding(&schema.name, &entry.entity_id)?;
                    }
                }
                ChangeOperation::Delete => {
                    sink.delete_row(&schema, &entry.entity_id)?;
                }
            }
        }
        Ok(())
    }
}

/// Process-wide store-type → plugin lookup with a generic fallback.
///
/// Built once at startup and shared behind an `Arc`; never mutated after.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
    generic: Option<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// An empty registry with no plugins and no generic fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            generic: None,
        }
    }

    /// The standard registry: `recall`, `tract`, and a generic fallback.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RecallPlugin::new()));
        registry.register(Arc::new(TractPlugin::new()));
        registry.set_generic(Arc::new(GenericPlugin::new()));
        registry
    }

    /// Registers a plugin under its own type name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.type_name(), plugin);
    }

    /// Sets the fallback plugin returned for unknown store types.
    pub fn set_generic(&mut self, plugin: Arc<dyn Plugin>) {
        self.generic = Some(plugin);
    }

    /// Resolves a store type to its plugin, falling back to the generic
    /// plugin for unknown types. `None` only when no generic is set.
    #[must_use]
    pub fn lookup(&self, store_type: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .get(store_type)
            .or(self.generic.as_ref())
            .cloned()
    }

    /// Type names of all registered (non-generic) plugins.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.keys().copied()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_tables_are_detected() {
        assert!(is_reserved_table("change_log"));
        assert!(is_reserved_table("sync_meta"));
        assert!(is_reserved_table("sqlite_master"));
        assert!(!is_reserved_table("lore_entries"));
    }

    #[test]
    fn registry_lookup_known_type() {
        let registry = PluginRegistry::with_defaults();
        let plugin = registry.lookup("recall").unwrap();
        assert_eq!(plugin.type_name(), "recall");
        let plugin = registry.lookup("tract").unwrap();
        assert_eq!(plugin.type_name(), "tract");
    }

    #[test]
    fn registry_unknown_type_falls_back_to_generic() {
        let registry = PluginRegistry::with_defaults();
        let plugin = registry.lookup("telemetry").unwrap();
        assert_eq!(plugin.type_name(), "generic");
    }

    #[test]
    fn registry_without_generic_returns_none_for_unknown() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(RecallPlugin::new()));
        assert!(registry.lookup("telemetry").is_none());
        assert!(registry.lookup("recall").is_some());
    }

    #[test]
    fn schema_version_is_max_migration_version() {
        let plugin = RecallPlugin::new();
        let max = plugin.migrations().iter().map(|m| m.version).max().unwrap();
        assert_eq!(plugin.schema_version(), max);
    }
}
