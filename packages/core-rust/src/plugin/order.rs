//! FK-safe reordering of push batches.
//!
//! Within a single batch, entries touching parent tables must commit before
//! entries touching their child tables, so replay never inserts a child row
//! whose parent does not exist yet. The reorder is a stable sort by table
//! depth in the declared FK forest: roots first, then their children, with
//! the client's submission order preserved inside each depth class.

use std::collections::HashMap;

use crate::changelog::NewChangeLogEntry;

use super::TableSchema;

/// Reorders a batch so parents precede children across declared FK edges.
///
/// Tables without a declared parent sit at depth 0. The sort is stable, so
/// two entries for the same table (or for unrelated tables at the same
/// depth) keep their relative submission order.
///
/// # Errors
///
/// Returns a description when the declared FK edges form a cycle. Unknown
/// tables must be rejected by validation before calling this.
pub fn reorder_fk_safe(
    entries: Vec<NewChangeLogEntry>,
    schemas: &[TableSchema],
) -> Result<Vec<NewChangeLogEntry>, String> {
    let depths = table_depths(schemas)?;

    let mut indexed: Vec<(usize, NewChangeLogEntry)> = entries.into_iter().enumerate().collect();
    indexed.sort_by_key(|(index, entry)| {
        // Tables outside the declared set (dynamic generic tables) have no
        // FK edges and sort as roots.
        let depth = depths.get(entry.table_name.as_str()).copied().unwrap_or(0);
        (depth, *index)
    });

    Ok(indexed.into_iter().map(|(_, entry)| entry).collect())
}

/// Computes each declared table's depth in the FK forest.
fn table_depths(schemas: &[TableSchema]) -> Result<HashMap<&str, usize>, String> {
    let parent_of: HashMap<&str, &str> = schemas
        .iter()
        .filter_map(|s| s.parent.as_ref().map(|fk| (s.name.as_str(), fk.table.as_str())))
        .collect();

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for schema in schemas {
        let mut depth = 0usize;
        let mut current = schema.name.as_str();
        while let Some(parent) = parent_of.get(current) {
            depth += 1;
            if depth > parent_of.len() {
                return Err(format!("foreign-key cycle involving table {}", schema.name));
            }
            current = parent;
        }
        depths.insert(schema.name.as_str(), depth);
    }
    Ok(depths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeOperation;
    use chrono::{TimeZone, Utc};

    fn entry(table: &str, entity: &str) -> NewChangeLogEntry {
        NewChangeLogEntry {
            table_name: table.to_string(),
            entity_id: entity.to_string(),
            operation: ChangeOperation::Upsert,
            payload: Some(serde_json::json!({})),
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
        }
    }

    fn chain_schemas() -> Vec<TableSchema> {
        vec![
            TableSchema::new("goals", &["id"]),
            TableSchema::new("csfs", &["id", "goal_id"]).with_parent("goals", "goal_id"),
            TableSchema::new("fwus", &["id", "csf_id"]).with_parent("csfs", "csf_id"),
        ]
    }

    #[test]
    fn parents_move_before_children() {
        let batch = vec![
            entry("fwus", "f1"),
            entry("csfs", "c1"),
            entry("goals", "g1"),
        ];
        let ordered = reorder_fk_safe(batch, &chain_schemas()).unwrap();
        let tables: Vec<&str> = ordered.iter().map(|e| e.table_name.as_str()).collect();
        assert_eq!(tables, ["goals", "csfs", "fwus"]);
    }

    #[test]
    fn order_within_one_table_is_preserved() {
        let batch = vec![
            entry("goals", "g1"),
            entry("goals", "g2"),
            entry("goals", "g3"),
        ];
        let ordered = reorder_fk_safe(batch, &chain_schemas()).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, ["g1", "g2", "g3"]);
    }

    #[test]
    fn unrelated_roots_keep_submission_order() {
        let schemas = vec![
            TableSchema::new("alpha", &["id"]),
            TableSchema::new("beta", &["id"]),
        ];
        let batch = vec![entry("beta", "b1"), entry("alpha", "a1"), entry("beta", "b2")];
        let ordered = reorder_fk_safe(batch, &schemas).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, ["b1", "a1", "b2"]);
    }

    #[test]
    fn already_ordered_batch_is_unchanged() {
        let batch = vec![
            entry("goals", "g1"),
            entry("csfs", "c1"),
            entry("fwus", "f1"),
        ];
        let ordered = reorder_fk_safe(batch.clone(), &chain_schemas()).unwrap();
        assert_eq!(ordered, batch);
    }

    #[test]
    fn undeclared_table_sorts_as_root() {
        let batch = vec![entry("csfs", "c1"), entry("events", "e1")];
        let ordered = reorder_fk_safe(batch, &chain_schemas()).unwrap();
        let tables: Vec<&str> = ordered.iter().map(|e| e.table_name.as_str()).collect();
        assert_eq!(tables, ["events", "csfs"]);
    }

    #[test]
    fn cycle_is_reported() {
        let schemas = vec![
            TableSchema::new("a", &["id"]).with_parent("b", "b_id"),
            TableSchema::new("b", &["id"]).with_parent("a", "a_id"),
        ];
        let err = reorder_fk_safe(vec![entry("a", "x")], &schemas).unwrap_err();
        assert!(err.contains("cycle"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arbitrary_batch() -> impl Strategy<Value = Vec<NewChangeLogEntry>> {
            proptest::collection::vec(
                (0usize..3, "[a-z]{1,8}").prop_map(|(table_index, entity)| {
                    let table = ["goals", "csfs", "fwus"][table_index];
                    entry(table, &entity)
                }),
                0..20,
            )
        }

        proptest! {
            #[test]
            fn parents_always_precede_children(batch in arbitrary_batch()) {
                let schemas = chain_schemas();
                let ordered = reorder_fk_safe(batch.clone(), &schemas).unwrap();
                prop_assert_eq!(ordered.len(), batch.len());

                let depth = |table: &str| match table {
                    "goals" => 0,
                    "csfs" => 1,
                    _ => 2,
                };
                let depths: Vec<usize> = ordered
                    .iter()
                    .map(|e| depth(e.table_name.as_str()))
                    .collect();
                prop_assert!(
                    depths.windows(2).all(|w| w[0] <= w[1]),
                    "depths not monotonic: {depths:?}"
                );
            }

            #[test]
            fn reorder_is_a_permutation(batch in arbitrary_batch()) {
                let ordered = reorder_fk_safe(batch.clone(), &chain_schemas()).unwrap();
                let mut before: Vec<String> =
                    batch.iter().map(|e| format!("{}/{}", e.table_name, e.entity_id)).collect();
                let mut after: Vec<String> =
                    ordered.iter().map(|e| format!("{}/{}", e.table_name, e.entity_id)).collect();
                before.sort();
                after.sort();
                prop_assert_eq!(before, after);
            }

            #[test]
            fn same_table_order_is_stable(batch in arbitrary_batch()) {
                let ordered = reorder_fk_safe(batch.clone(), &chain_schemas()).unwrap();
                for table in ["goals", "csfs", "fwus"] {
                    let before: Vec<&str> = batch
                        .iter()
                        .filter(|e| e.table_name == table)
                        .map(|e| e.entity_id.as_str())
                        .collect();
                    let after: Vec<&str> = ordered
                        .iter()
                        .filter(|e| e.table_name == table)
                        .map(|e| e.entity_id.as_str())
                        .collect();
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}
