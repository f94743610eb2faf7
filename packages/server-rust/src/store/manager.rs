//! Multi-store manager: lazy-loaded, name-validated, per-store engines.
//!
//! The manager exclusively owns live [`Store`] handles. Lookups take the
//! read lock; construction upgrades to the write lock with a double-check
//! so concurrent `get_store` calls for one id observe a single
//! construction. Only the reserved `default` store is auto-created on
//! first access; every other id must be created explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use engram_core::meta::StoreMeta;
use engram_core::plugin::{Plugin, PluginRegistry};
use engram_core::store_id::{StoreId, MAX_SEGMENTS};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{EngramError, Result};
use crate::storage::StoreEngine;

use super::meta::{load_store_meta, save_store_meta, MetaState, META_FILE};

/// A live store: directory, engine, plugin, and buffered metadata.
pub struct Store {
    id: StoreId,
    dir: PathBuf,
    engine: StoreEngine,
    plugin: Arc<dyn Plugin>,
    meta: Mutex<MetaState>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("id", &self.id).field("dir", &self.dir).finish()
    }
}

impl Store {
    /// The store's validated id.
    #[must_use]
    pub fn id(&self) -> &StoreId {
        &self.id
    }

    /// The store's directory on disk.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory compaction audit files are appended to.
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.dir.join("audit")
    }

    /// The store's persistence engine.
    #[must_use]
    pub fn engine(&self) -> &StoreEngine {
        &self.engine
    }

    /// The domain plugin serving this store's type.
    #[must_use]
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// A clone of the current (possibly unflushed) metadata.
    #[must_use]
    pub fn meta(&self) -> StoreMeta {
        self.meta.lock().snapshot()
    }

    fn touch(&self) {
        self.meta.lock().touch();
    }

    /// Persists buffered metadata changes.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn flush_meta(&self) -> Result<()> {
        self.meta.lock().flush(&self.dir)
    }

    /// Flushes metadata and closes the engine.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the engine is closed regardless.
    pub fn close(&self) -> Result<()> {
        let meta_result = self.flush_meta();
        let engine_result = self.engine.close();
        meta_result.and(engine_result)
    }
}

/// Summary emitted by [`StoreManager::list_stores`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub store_type: String,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Owns every live engine, keyed by store id.
pub struct StoreManager {
    root: PathBuf,
    registry: Arc<PluginRegistry>,
    stores: RwLock<HashMap<String, Arc<Store>>>,
}

impl StoreManager {
    /// Creates a manager rooted at `root`, creating the directory if
    /// missing.
    ///
    /// # Errors
    ///
    /// Fails when the root cannot be created.
    pub fn new(root: impl Into<PathBuf>, registry: Arc<PluginRegistry>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            registry,
            stores: RwLock::new(HashMap::new()),
        })
    }

    /// The stores root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, id: &StoreId) -> PathBuf {
        self.root.join(id.relative_path())
    }

    /// Returns the live handle for `id`, opening it on first access.
    ///
    /// Only `default` is auto-created when its directory does not exist;
    /// any other missing id fails with `StoreNotFound`.
    ///
    /// # Errors
    ///
    /// `StoreNotFound`, metadata, or engine-open failures.
    pub fn get_store(&self, id: &StoreId) -> Result<Arc<Store>> {
        {
            let stores = self.stores.read();
            if let Some(store) = stores.get(id.as_str()) {
                store.touch();
                return Ok(Arc::clone(store));
            }
        }

        let mut stores = self.stores.write();
        // Double-check: another caller may have opened it while this one
        // waited on the write lock.
        if let Some(store) = stores.get(id.as_str()) {
            store.touch();
            return Ok(Arc::clone(store));
        }

        let dir = self.store_dir(id);
        if !dir.join(META_FILE).is_file() {
            if !id.is_default() {
                return Err(EngramError::StoreNotFound {
                    store_id: id.to_string(),
                });
            }
            std::fs::create_dir_all(&dir)?;
            save_store_meta(&dir, &StoreMeta::new(engram_core::DEFAULT_STORE_TYPE, None))?;
            info!(store_id = %id, "auto-created default store");
        }

        let store = self.open_store(id, dir)?;
        store.touch();
        stores.insert(id.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Creates a new store directory, writes its metadata, and opens it.
    ///
    /// # Errors
    ///
    /// `StoreAlreadyExists` when the directory exists; on metadata-write
    /// failure the directory is rolled back.
    pub fn create_store(
        &self,
        id: &StoreId,
        store_type: &str,
        description: Option<String>,
    ) -> Result<Arc<Store>> {
        let mut stores = self.stores.write();
        let dir = self.store_dir(id);
        if dir.exists() {
            return Err(EngramError::StoreAlreadyExists {
                store_id: id.to_string(),
            });
        }

        std::fs::create_dir_all(&dir)?;
        let meta = StoreMeta::new(store_type, description);
        if let Err(e) = save_store_meta(&dir, &meta) {
            // Roll the directory back so a failed create leaves no trace.
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e);
        }

        let store = self.open_store(id, dir)?;
        stores.insert(id.to_string(), Arc::clone(&store));
        info!(store_id = %id, store_type, "store created");
        Ok(store)
    }

    /// Deletes a store: closes the live handle, then removes the
    /// directory recursively. The `default` store is undeletable.
    ///
    /// # Errors
    ///
    /// Rejects `default`; `StoreNotFound` when no such store exists.
    pub fn delete_store(&self, id: &StoreId) -> Result<()> {
        if id.is_default() {
            return Err(EngramError::StoreProtected {
                store_id: id.to_string(),
            });
        }

        let mut stores = self.stores.write();
        if let Some(store) = stores.remove(id.as_str()) {
            if let Err(e) = store.close() {
                warn!(store_id = %id, error = %e, "error closing store before delete");
            }
        }

        let dir = self.store_dir(id);
        if !dir.exists() {
            return Err(EngramError::StoreNotFound {
                store_id: id.to_string(),
            });
        }
        std::fs::remove_dir_all(&dir)?;
        info!(store_id = %id, "store deleted");
        Ok(())
    }

    /// Scans the root for directories containing `meta.yaml` and emits
    /// their summaries. Non-store directories are ignored.
    ///
    /// # Errors
    ///
    /// Fails when the root cannot be read.
    pub fn list_stores(&self) -> Result<Vec<StoreInfo>> {
        let mut infos = Vec::new();
        self.scan_dir(&self.root, &mut Vec::new(), &mut infos)?;
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    fn scan_dir(
        &self,
        dir: &Path,
        segments: &mut Vec<String>,
        infos: &mut Vec<StoreInfo>,
    ) -> Result<()> {
        if segments.len() >= MAX_SEGMENTS {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            segments.push(name);
            let path = entry.path();
            if path.join(META_FILE).is_file() {
                let id = segments.join("/");
                match self.store_info(&id, &path) {
                    Ok(info) => infos.push(info),
                    Err(e) => warn!(store_id = id, error = %e, "skipping unreadable store"),
                }
            }
            // Stores can nest below non-store directories and below other
            // stores, so recursion continues either way.
            self.scan_dir(&path, segments, infos)?;
            segments.pop();
        }
        Ok(())
    }

    fn store_info(&self, id: &str, dir: &Path) -> Result<StoreInfo> {
        // Prefer the live handle's buffered metadata over the file.
        let meta = {
            let stores = self.stores.read();
            match stores.get(id) {
                Some(store) => store.meta(),
                None => load_store_meta(dir)?,
            }
        };
        let size_bytes = std::fs::metadata(dir.join("engram.db"))
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(StoreInfo {
            id: id.to_string(),
            store_type: meta.store_type,
            size_bytes,
            created: meta.created,
            last_accessed: meta.last_accessed,
            description: meta.description,
        })
    }

    /// Closes every live engine, flushing buffered metadata.
    ///
    /// All errors are logged; the last one wins as the return value.
    ///
    /// # Errors
    ///
    /// The last close failure, if any occurred.
    pub fn close(&self) -> Result<()> {
        let mut stores = self.stores.write();
        let mut last_error = None;
        for (id, store) in stores.drain() {
            if let Err(e) = store.close() {
                error!(store_id = id, error = %e, "error closing store");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn open_store(&self, id: &StoreId, dir: PathBuf) -> Result<Arc<Store>> {
        let meta = load_store_meta(&dir)?;
        let plugin = self.registry.lookup(&meta.store_type).ok_or_else(|| {
            EngramError::Meta(format!("no plugin for store type {:?}", meta.store_type))
        })?;
        let engine = StoreEngine::open(&dir, plugin.as_ref())?;
        Ok(Arc::new(Store {
            id: id.clone(),
            dir,
            engine,
            plugin,
            meta: Mutex::new(MetaState::new(meta)),
        }))
    }
}
