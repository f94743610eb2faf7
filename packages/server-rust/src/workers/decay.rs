//! Confidence decay coordinator.
//!
//! Each cycle subtracts the configured amount from the confidence of
//! lore entries not updated within the decay window. The threshold is
//! the interval itself: an entry is stale once it has sat unmodified for
//! one full decay period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::store::StoreManager;

use super::{all_store_ids, Coordinator};

pub struct DecayCoordinator {
    manager: Arc<StoreManager>,
    interval: Duration,
    amount: f64,
}

impl DecayCoordinator {
    #[must_use]
    pub fn new(manager: Arc<StoreManager>, interval: Duration, amount: f64) -> Self {
        Self {
            manager,
            interval,
            amount,
        }
    }
}

#[async_trait]
impl Coordinator for DecayCoordinator {
    fn name(&self) -> &'static str {
        "decay"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, shutdown: &watch::Receiver<bool>) {
        let ids = match all_store_ids(&self.manager) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "decay: store listing failed, skipping cycle");
                return;
            }
        };

        let now = Utc::now();
        let threshold = now
            - chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero());

        for id in ids {
            if *shutdown.borrow() {
                return;
            }
            let result = self.manager.get_store(&id).and_then(|store| {
                let affected = store.engine().decay_confidence(threshold, self.amount)?;
                store.engine().set_last_decay(now)?;
                Ok(affected)
            });
            match result {
                Ok(affected) if affected > 0 => {
                    debug!(store_id = %id, affected, "confidence decayed");
                }
                Ok(_) => {}
                Err(e) => warn!(store_id = %id, error = %e, "decay failed for store"),
            }
        }
    }
}
