//! Per-store metadata, persisted as `meta.yaml` in the store directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store type assumed when `meta.yaml` omits or misspells `type`.
pub const DEFAULT_STORE_TYPE: &str = "recall";

/// The contents of a store's `meta.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Store type; selects the domain plugin. Defaults to `recall`.
    #[serde(rename = "type", default = "default_store_type")]
    pub store_type: String,
    /// Creation instant, set once by the manager.
    pub created: DateTime<Utc>,
    /// Last access instant; buffered in memory and flushed on close.
    pub last_accessed: DateTime<Utc>,
    /// Optional free-form description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

fn default_store_type() -> String {
    DEFAULT_STORE_TYPE.to_string()
}

impl StoreMeta {
    /// Creates metadata for a brand-new store.
    #[must_use]
    pub fn new(store_type: &str, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            store_type: store_type.to_string(),
            created: now,
            last_accessed: now,
            description,
        }
    }
}
