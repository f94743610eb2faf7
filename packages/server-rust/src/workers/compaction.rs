//! Change-log compaction coordinator.
//!
//! Each cycle removes superseded entries older than the retention window
//! from every store's change log (mirroring them into the audit file) and
//! records the compaction high-water mark in sync_meta.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::storage::engine::meta_keys;
use crate::store::StoreManager;

use super::{all_store_ids, Coordinator};

pub struct CompactionCoordinator {
    manager: Arc<StoreManager>,
    interval: Duration,
    retention: Duration,
}

impl CompactionCoordinator {
    #[must_use]
    pub fn new(manager: Arc<StoreManager>, interval: Duration, retention: Duration) -> Self {
        Self {
            manager,
            interval,
            retention,
        }
    }
}

#[async_trait]
impl Coordinator for CompactionCoordinator {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, shutdown: &watch::Receiver<bool>) {
        let ids = match all_store_ids(&self.manager) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "compaction: store listing failed, skipping cycle");
                return;
            }
        };

        let now = Utc::now();
        let cutoff =
            now - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());

        for id in ids {
            if *shutdown.borrow() {
                return;
            }
            let result = self.manager.get_store(&id).and_then(|store| {
                let engine = store.engine();
                let (exported, deleted) =
                    engine.compact_change_log(cutoff, &store.audit_dir())?;
                engine.set_sync_meta(
                    meta_keys::LAST_COMPACTION_SEQUENCE,
                    &engine.latest_sequence()?.to_string(),
                )?;
                engine.set_sync_meta(
                    meta_keys::LAST_COMPACTION_TIME,
                    &now.timestamp_millis().to_string(),
                )?;
                Ok((exported, deleted))
            });
            match result {
                Ok((exported, deleted)) if deleted > 0 => {
                    info!(store_id = %id, exported, deleted, "store compacted");
                }
                Ok(_) => {}
                Err(e) => warn!(store_id = %id, error = %e, "compaction failed for store"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::changelog::{ChangeOperation, NewChangeLogEntry};
    use engram_core::plugin::PluginRegistry;
    use engram_core::store_id::StoreId;
    use tempfile::TempDir;

    fn lore(entity: &str, content: &str) -> NewChangeLogEntry {
        NewChangeLogEntry {
            table_name: "lore_entries".to_string(),
            entity_id: entity.to_string(),
            operation: ChangeOperation::Upsert,
            payload: Some(serde_json::json!({"content": content})),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn tick_records_compaction_high_water_mark() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(PluginRegistry::with_defaults());
        let manager = Arc::new(StoreManager::new(dir.path(), registry).unwrap());
        let id = StoreId::parse("default").unwrap();
        let store = manager.get_store(&id).unwrap();
        let plugin = Arc::clone(store.plugin());
        store
            .engine()
            .apply_push(plugin.as_ref(), "src", vec![lore("e1", "v1")])
            .unwrap();
        store
            .engine()
            .apply_push(plugin.as_ref(), "src", vec![lore("e1", "v2")])
            .unwrap();

        // Zero retention: everything up to now is a candidate.
        let coordinator = CompactionCoordinator::new(
            Arc::clone(&manager),
            Duration::from_secs(86_400),
            Duration::ZERO,
        );
        let (_tx, rx) = watch::channel(false);
        coordinator.tick(&rx).await;

        let entries = store.engine().get_change_log_after(0, 100).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 2);

        assert_eq!(
            store
                .engine()
                .get_sync_meta(meta_keys::LAST_COMPACTION_SEQUENCE)
                .unwrap()
                .as_deref(),
            Some("2")
        );
        assert!(store
            .engine()
            .get_sync_meta(meta_keys::LAST_COMPACTION_TIME)
            .unwrap()
            .is_some());
        assert!(store.audit_dir().join(format!(
            "{}.jsonl",
            Utc::now().format("%Y-%m-%d")
        ))
        .is_file());
    }
}
