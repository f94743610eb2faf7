//! Compaction behavior against live stores: convergence of delta-from-zero
//! and the audit trail.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use engram_core::changelog::{ChangeLogEntry, ChangeOperation, NewChangeLogEntry};
use engram_core::plugin::PluginRegistry;
use engram_core::store_id::StoreId;
use engram_server::store::StoreManager;
use engram_server::sync::SyncService;

fn setup() -> (TempDir, Arc<StoreManager>, SyncService) {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(PluginRegistry::with_defaults());
    let manager = Arc::new(StoreManager::new(dir.path(), registry).unwrap());
    let sync = SyncService::new(Arc::clone(&manager), 3600);
    (dir, manager, sync)
}

fn lore(entity: &str, content: &str) -> NewChangeLogEntry {
    NewChangeLogEntry {
        table_name: "lore_entries".to_string(),
        entity_id: entity.to_string(),
        operation: ChangeOperation::Upsert,
        payload: Some(serde_json::json!({"content": content})),
        created_at: Utc::now(),
    }
}

#[test]
fn compaction_preserves_delta_convergence() {
    let (_dir, manager, sync) = setup();
    let id = StoreId::parse("default").unwrap();
    let store = manager.get_store(&id).unwrap();
    let plugin = Arc::clone(store.plugin());
    let engine = store.engine();

    // Three versions of entity-1 plus one entry for entity-2.
    for content in ["v1", "v2", "v3"] {
        engine
            .apply_push(plugin.as_ref(), "src", vec![lore("entity-1", content)])
            .unwrap();
    }
    engine
        .apply_push(plugin.as_ref(), "src", vec![lore("entity-2", "only")])
        .unwrap();

    let (exported, deleted) = engine
        .compact_change_log(Utc::now(), &store.audit_dir())
        .unwrap();
    assert_eq!(exported, deleted);
    assert_eq!(deleted, 2);

    // Delta from zero returns exactly one entry per entity.
    let delta = sync.delta(&id, 0, None).unwrap();
    assert_eq!(delta.entries.len(), 2);
    let ids: Vec<&str> = delta
        .entries
        .iter()
        .map(|e| e.entity_id.as_str())
        .collect();
    assert_eq!(ids, ["entity-1", "entity-2"]);
    // The surviving entity-1 entry is its latest version.
    assert_eq!(
        delta.entries[0].payload.as_ref().unwrap()["content"],
        "v3"
    );

    // The audit file holds the two removed versions, one JSON object per
    // line.
    let audit_path = store
        .audit_dir()
        .join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d")));
    let contents = std::fs::read_to_string(&audit_path).unwrap();
    let removed: Vec<ChangeLogEntry> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("each audit line is valid JSON"))
        .collect();
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|e| e.entity_id == "entity-1"));
    assert_eq!(removed[0].payload.as_ref().unwrap()["content"], "v1");
    assert_eq!(removed[1].payload.as_ref().unwrap()["content"], "v2");
}

#[test]
fn delta_cursor_is_stable_across_compaction() {
    let (_dir, manager, sync) = setup();
    let id = StoreId::parse("default").unwrap();
    let store = manager.get_store(&id).unwrap();
    let plugin = Arc::clone(store.plugin());
    let engine = store.engine();

    for i in 0..10 {
        engine
            .apply_push(
                plugin.as_ref(),
                "src",
                vec![lore("hot-entity", &format!("v{i}"))],
            )
            .unwrap();
    }

    // A client paginates halfway, then compaction runs underneath it.
    let page = sync.delta(&id, 0, Some(5)).unwrap();
    assert_eq!(page.last_sequence, 5);
    assert!(page.has_more);

    engine
        .compact_change_log(Utc::now(), &store.audit_dir())
        .unwrap();

    // Resuming from the cursor still converges on the surviving tail:
    // sequences never shift, so anything after the cursor is valid.
    let resumed = sync.delta(&id, page.last_sequence, Some(100)).unwrap();
    assert_eq!(resumed.entries.len(), 1);
    assert_eq!(resumed.entries[0].sequence, 10);
    assert!(!resumed.has_more);

    // A fresh client from zero sees exactly the latest version.
    let fresh = sync.delta(&id, 0, None).unwrap();
    assert_eq!(fresh.entries.len(), 1);
    assert_eq!(fresh.entries[0].payload.as_ref().unwrap()["content"], "v9");
}

#[test]
fn repeated_compaction_is_idempotent() {
    let (_dir, manager, _sync) = setup();
    let id = StoreId::parse("default").unwrap();
    let store = manager.get_store(&id).unwrap();
    let plugin = Arc::clone(store.plugin());
    let engine = store.engine();

    for content in ["a", "b"] {
        engine
            .apply_push(plugin.as_ref(), "src", vec![lore("e1", content)])
            .unwrap();
    }

    let (_, first_deleted) = engine
        .compact_change_log(Utc::now(), &store.audit_dir())
        .unwrap();
    assert_eq!(first_deleted, 1);

    // Nothing left to remove: the survivor per entity is retained.
    let (exported, deleted) = engine
        .compact_change_log(Utc::now(), &store.audit_dir())
        .unwrap();
    assert_eq!((exported, deleted), (0, 0));
}

#[test]
fn compaction_scopes_entities_per_table() {
    let (_dir, manager, _sync) = setup();
    let id = StoreId::parse("plans").unwrap();
    manager.create_store(&id, "tract", None).unwrap();
    let store = manager.get_store(&id).unwrap();
    let plugin = Arc::clone(store.plugin());
    let engine = store.engine();

    let entry = |table: &str, payload: serde_json::Value| NewChangeLogEntry {
        table_name: table.to_string(),
        entity_id: "shared-id".to_string(),
        operation: ChangeOperation::Upsert,
        payload: Some(payload),
        created_at: Utc::now(),
    };

    // The same entity id in two tables: each keeps its own survivor.
    engine
        .apply_push(
            plugin.as_ref(),
            "src",
            vec![entry("goals", serde_json::json!({"title": "g-v1"}))],
        )
        .unwrap();
    engine
        .apply_push(
            plugin.as_ref(),
            "src",
            vec![entry("goals", serde_json::json!({"title": "g-v2"}))],
        )
        .unwrap();
    engine
        .apply_push(
            plugin.as_ref(),
            "src",
            vec![entry(
                "csfs",
                serde_json::json!({"title": "c-v1", "goal_id": "shared-id"}),
            )],
        )
        .unwrap();

    let (_, deleted) = engine
        .compact_change_log(Utc::now(), &store.audit_dir())
        .unwrap();
    assert_eq!(deleted, 1);

    let entries = engine.get_change_log_after(0, 100).unwrap();
    let tables: Vec<&str> = entries.iter().map(|e| e.table_name.as_str()).collect();
    assert_eq!(tables, ["goals", "csfs"]);
}
