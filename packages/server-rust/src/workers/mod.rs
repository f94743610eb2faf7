//! Background coordinators: long-running tasks that sweep every store on
//! a fixed interval.
//!
//! Shared contract: one tokio task per coordinator; per-store operations
//! run sequentially within a cycle; a store-listing failure skips the
//! cycle; a per-store failure logs and moves on; shutdown is observed
//! between stores and at the ticker wait. No failure crashes a
//! coordinator.

pub mod compaction;
pub mod decay;
pub mod embedding_retry;
pub mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engram_core::store_id::StoreId;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::StoreManager;

pub use compaction::CompactionCoordinator;
pub use decay::DecayCoordinator;
pub use embedding_retry::EmbeddingRetryCoordinator;
pub use snapshot::SnapshotCoordinator;

/// A background task that visits every store once per cycle.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Interval between cycles.
    fn interval(&self) -> Duration;

    /// Whether the first cycle runs immediately on start instead of
    /// after the first full interval.
    fn run_on_start(&self) -> bool {
        false
    }

    /// Runs one full cycle. Implementations contain their own error
    /// handling; a cycle never propagates failure.
    async fn tick(&self, shutdown: &watch::Receiver<bool>);
}

/// Drives a coordinator until the shutdown signal fires.
///
/// The ticker's built-in immediate first fire models `run_on_start`;
/// coordinators that wait consume it before entering the loop.
pub async fn run_coordinator(
    coordinator: Arc<dyn Coordinator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(coordinator.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    if !coordinator.run_on_start() {
        ticker.tick().await;
    }

    info!(coordinator = coordinator.name(), "coordinator started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                coordinator.tick(&shutdown).await;
                if *shutdown.borrow() {
                    break;
                }
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(coordinator = coordinator.name(), "coordinator stopped");
}

/// Ids of every store currently on disk, skipping unparsable directories.
///
/// A listing failure is reported once per cycle by the caller; this
/// helper only surfaces it.
pub(crate) fn all_store_ids(manager: &StoreManager) -> crate::error::Result<Vec<StoreId>> {
    let infos = manager.list_stores()?;
    Ok(infos
        .into_iter()
        .filter_map(|info| match StoreId::parse(&info.id) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(store_id = info.id, error = %e, "skipping store with invalid id");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCoordinator {
        ticks: AtomicUsize,
        on_start: bool,
    }

    #[async_trait]
    impl Coordinator for CountingCoordinator {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn run_on_start(&self) -> bool {
            self.on_start
        }

        async fn tick(&self, _shutdown: &watch::Receiver<bool>) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_on_start_ticks_immediately() {
        let coordinator = Arc::new(CountingCoordinator {
            ticks: AtomicUsize::new(0),
            on_start: true,
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_coordinator(
            Arc::clone(&coordinator) as Arc<dyn Coordinator>,
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.ticks.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_start_waits_a_full_interval() {
        let coordinator = Arc::new(CountingCoordinator {
            ticks: AtomicUsize::new(0),
            on_start: false,
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_coordinator(
            Arc::clone(&coordinator) as Arc<dyn Coordinator>,
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(coordinator.ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(coordinator.ticks.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_terminates_promptly() {
        let coordinator = Arc::new(CountingCoordinator {
            ticks: AtomicUsize::new(0),
            on_start: false,
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_coordinator(
            Arc::clone(&coordinator) as Arc<dyn Coordinator>,
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(coordinator.ticks.load(Ordering::SeqCst), 0);
    }
}
