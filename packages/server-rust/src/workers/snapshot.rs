//! Snapshot coordinator.
//!
//! Regenerates each store's `snapshots/current.db` on an interval and
//! hands the file to the configured uploader. Upload failures are logged
//! and never fail the cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::storage::SnapshotUploader;
use crate::store::StoreManager;

use super::{all_store_ids, Coordinator};

pub struct SnapshotCoordinator {
    manager: Arc<StoreManager>,
    uploader: Option<Arc<dyn SnapshotUploader>>,
    interval: Duration,
    run_on_start: bool,
}

impl SnapshotCoordinator {
    #[must_use]
    pub fn new(
        manager: Arc<StoreManager>,
        uploader: Option<Arc<dyn SnapshotUploader>>,
        interval: Duration,
        run_on_start: bool,
    ) -> Self {
        Self {
            manager,
            uploader,
            interval,
            run_on_start,
        }
    }
}

#[async_trait]
impl Coordinator for SnapshotCoordinator {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_on_start(&self) -> bool {
        self.run_on_start
    }

    async fn tick(&self, shutdown: &watch::Receiver<bool>) {
        let ids = match all_store_ids(&self.manager) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "snapshot: store listing failed, skipping cycle");
                return;
            }
        };

        for id in ids {
            if *shutdown.borrow() {
                return;
            }
            let path = match self
                .manager
                .get_store(&id)
                .and_then(|store| store.engine().generate_snapshot())
            {
                Ok(path) => path,
                Err(e) => {
                    warn!(store_id = %id, error = %e, "snapshot failed for store");
                    continue;
                }
            };
            debug!(store_id = %id, path = %path.display(), "snapshot generated");

            if let Some(uploader) = &self.uploader {
                if let Err(e) = uploader.upload(id.as_str(), &path).await {
                    warn!(store_id = %id, error = %e, "snapshot upload failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::plugin::PluginRegistry;
    use engram_core::store_id::StoreId;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingUploader {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotUploader for CountingUploader {
        async fn upload(&self, _store_id: &str, _path: &Path) -> anyhow::Result<String> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok("uploaded".to_string())
        }
    }

    #[tokio::test]
    async fn tick_snapshots_every_store_and_uploads() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(PluginRegistry::with_defaults());
        let manager = Arc::new(StoreManager::new(dir.path(), registry).unwrap());
        manager.get_store(&StoreId::parse("default").unwrap()).unwrap();
        manager
            .create_store(&StoreId::parse("second").unwrap(), "recall", None)
            .unwrap();

        let uploader = Arc::new(CountingUploader {
            uploads: AtomicUsize::new(0),
        });
        let coordinator = SnapshotCoordinator::new(
            Arc::clone(&manager),
            Some(Arc::clone(&uploader) as Arc<dyn SnapshotUploader>),
            Duration::from_secs(3600),
            false,
        );
        let (_tx, rx) = watch::channel(false);
        coordinator.tick(&rx).await;

        assert!(dir.path().join("default/snapshots/current.db").is_file());
        assert!(dir.path().join("second/snapshots/current.db").is_file());
        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 2);
    }
}
