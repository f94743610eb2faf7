//! `meta.yaml` persistence with buffered `last_accessed` updates.
//!
//! Every store access bumps `last_accessed` in memory and sets a dirty
//! bit; the file is rewritten only on flush or close, never per access.

use std::path::Path;

use chrono::Utc;
use engram_core::meta::StoreMeta;

use crate::error::{EngramError, Result};

/// File name of the per-store metadata document.
pub const META_FILE: &str = "meta.yaml";

/// Loads a store's `meta.yaml`.
///
/// # Errors
///
/// [`EngramError::Meta`] when the file is missing or malformed.
pub fn load_store_meta(store_dir: &Path) -> Result<StoreMeta> {
    let path = store_dir.join(META_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        EngramError::Meta(format!("read {}: {e}", path.display()))
    })?;
    serde_yaml::from_str(&raw)
        .map_err(|e| EngramError::Meta(format!("parse {}: {e}", path.display())))
}

/// Writes a store's `meta.yaml` atomically (temp file + rename).
///
/// # Errors
///
/// Fails on I/O or serialization errors.
pub fn save_store_meta(store_dir: &Path, meta: &StoreMeta) -> Result<()> {
    let raw = serde_yaml::to_string(meta)
        .map_err(|e| EngramError::Meta(format!("serialize meta: {e}")))?;
    let mut file = tempfile::NamedTempFile::new_in(store_dir)?;
    std::io::Write::write_all(&mut file, raw.as_bytes())?;
    file.persist(store_dir.join(META_FILE))
        .map_err(|e| EngramError::Io(e.error))?;
    Ok(())
}

/// In-memory metadata with a dirty bit for buffered access tracking.
#[derive(Debug)]
pub struct MetaState {
    meta: StoreMeta,
    dirty: bool,
}

impl MetaState {
    #[must_use]
    pub fn new(meta: StoreMeta) -> Self {
        Self { meta, dirty: false }
    }

    /// A clone of the current metadata.
    #[must_use]
    pub fn snapshot(&self) -> StoreMeta {
        self.meta.clone()
    }

    /// The store type recorded in metadata.
    #[must_use]
    pub fn store_type(&self) -> &str {
        &self.meta.store_type
    }

    /// Bumps `last_accessed` to now without touching disk.
    pub fn touch(&mut self) {
        self.meta.last_accessed = Utc::now();
        self.dirty = true;
    }

    /// Persists the metadata if it changed since the last flush.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors; the dirty bit stays set for retry.
    pub fn flush(&mut self, store_dir: &Path) -> Result<()> {
        if self.dirty {
            save_store_meta(store_dir, &self.meta)?;
            self.dirty = false;
        }
        Ok(())
    }
}
