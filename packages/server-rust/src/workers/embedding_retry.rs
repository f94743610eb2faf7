//! Embedding retry coordinator.
//!
//! Sweeps every store's pending-embedding index, batch-embeds the texts,
//! and writes vectors back. Failures are counted per store and per entry
//! in a nested map; an entry that fails `max_attempts` times is marked
//! permanently failed and dropped from the map. Counters are store-scoped
//! so an entry id in store A never shadows the same id in store B, and
//! counters for deleted stores are pruned each cycle.
//!
//! Runs immediately on start: pending work from a previous process should
//! not wait a full interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::storage::PendingEmbedding;
use crate::store::StoreManager;

use super::{all_store_ids, Coordinator};

pub struct EmbeddingRetryCoordinator {
    manager: Arc<StoreManager>,
    embedder: Arc<dyn Embedder>,
    interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    /// store id -> entry key (`table/entity`) -> failed attempt count.
    attempts: Mutex<HashMap<String, HashMap<String, u32>>>,
}

impl EmbeddingRetryCoordinator {
    #[must_use]
    pub fn new(
        manager: Arc<StoreManager>,
        embedder: Arc<dyn Embedder>,
        interval: Duration,
        batch_size: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            manager,
            embedder,
            interval,
            batch_size,
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn entry_key(pending: &PendingEmbedding) -> String {
        format!("{}/{}", pending.table_name, pending.entity_id)
    }

    /// Drops attempt counters for stores that no longer exist.
    fn prune_attempts(&self, live: &[engram_core::StoreId]) {
        let mut attempts = self.attempts.lock();
        attempts.retain(|store_id, _| live.iter().any(|id| id.as_str() == store_id));
    }

    /// Increments an entry's counter, returning the new count.
    fn record_failure(&self, store_id: &str, key: &str) -> u32 {
        let mut attempts = self.attempts.lock();
        let count = attempts
            .entry(store_id.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    fn clear_entry(&self, store_id: &str, key: &str) {
        let mut attempts = self.attempts.lock();
        if let Some(store_attempts) = attempts.get_mut(store_id) {
            store_attempts.remove(key);
            if store_attempts.is_empty() {
                attempts.remove(store_id);
            }
        }
    }

    async fn process_store(&self, id: &engram_core::StoreId) -> crate::error::Result<()> {
        let store = self.manager.get_store(id)?;
        let engine = store.engine();

        let pending = engine.get_pending_embeddings(self.batch_size)?;
        if pending.is_empty() {
            return Ok(());
        }

        // Rows whose source text is gone can never succeed.
        let (embeddable, orphaned): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|p| p.content.is_some());
        for orphan in orphaned {
            engine.mark_embedding_failed(&orphan.table_name, &orphan.entity_id)?;
            self.clear_entry(id.as_str(), &Self::entry_key(&orphan));
        }
        if embeddable.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = embeddable
            .iter()
            .map(|p| p.content.clone().unwrap_or_default())
            .collect();

        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (pending, vector) in embeddable.iter().zip(vectors.iter()) {
                    engine.update_embedding(&pending.table_name, &pending.entity_id, vector)?;
                    self.clear_entry(id.as_str(), &Self::entry_key(pending));
                }
                debug!(store_id = %id, embedded = embeddable.len(), "embeddings updated");
            }
            Err(e) => {
                // A batch failure is transient for every participant.
                warn!(store_id = %id, error = %e, "embedding batch failed");
                for pending in &embeddable {
                    let key = Self::entry_key(pending);
                    let count = self.record_failure(id.as_str(), &key);
                    if count >= self.max_attempts {
                        engine.mark_embedding_failed(&pending.table_name, &pending.entity_id)?;
                        self.clear_entry(id.as_str(), &key);
                        warn!(
                            store_id = %id,
                            entity_id = pending.entity_id,
                            attempts = count,
                            "embedding permanently failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for EmbeddingRetryCoordinator {
    fn name(&self) -> &'static str {
        "embedding-retry"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_on_start(&self) -> bool {
        true
    }

    async fn tick(&self, shutdown: &watch::Receiver<bool>) {
        let ids = match all_store_ids(&self.manager) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "embedding-retry: store listing failed, skipping cycle");
                return;
            }
        };
        self.prune_attempts(&ids);

        for id in ids {
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.process_store(&id).await {
                warn!(store_id = %id, error = %e, "embedding retry failed for store");
            }
        }
    }
}
