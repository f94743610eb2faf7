//! Lifecycle supervisor: ordered startup, signal handling, and graceful
//! shutdown of the HTTP server, coordinators, and store engines.
//!
//! Shutdown invariant: the HTTP server drains first (in-flight pushes
//! finish and commit), the coordinator tasks drain next, and only then
//! does the store manager close its engines. No change-log write that was
//! acknowledged can be lost, and no write can begin after engine close.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info};

use engram_core::plugin::PluginRegistry;
use engram_core::store_id::StoreId;

use crate::config::AppConfig;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::network::{build_app_state, build_router, NetworkConfig, NetworkModule, ShutdownController};
use crate::storage::{NullUploader, SnapshotUploader};
use crate::store::StoreManager;
use crate::sync::SyncService;
use crate::workers::{
    run_coordinator, CompactionCoordinator, Coordinator, DecayCoordinator,
    EmbeddingRetryCoordinator, SnapshotCoordinator,
};

/// A fully-assembled server, bound but not yet serving.
///
/// Splitting assembly from serving lets tests drive the lifecycle with an
/// injected shutdown future and a known port.
pub struct Server {
    config: AppConfig,
    module: NetworkModule,
    manager: Arc<StoreManager>,
    sync: Arc<SyncService>,
    embedder: Arc<dyn Embedder>,
    port: u16,
}

impl Server {
    /// Builds all components and binds the listener.
    ///
    /// Startup order: plugin registry, store manager (opening the default
    /// engine runs its migrations), embedder, sync service, listener.
    ///
    /// # Errors
    ///
    /// Fails when the stores root, default engine, embedder, or listener
    /// cannot be initialized.
    pub async fn bind(config: AppConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(PluginRegistry::with_defaults());
        let manager = Arc::new(StoreManager::new(config.stores.root_path(), registry)?);

        // Opening the default store up front surfaces migration problems
        // at startup instead of on the first request.
        manager.get_store(&StoreId::default_store())?;

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(config.embedding.clone())?);
        let sync = Arc::new(SyncService::new(
            Arc::clone(&manager),
            config.worker.push_idempotency_ttl_secs,
        ));

        let mut module = NetworkModule::new(NetworkConfig::from_app(&config));
        let port = module.bind().await?;

        Ok(Self {
            config,
            module,
            manager,
            sync,
            embedder,
            port,
        })
    }

    /// The actually-bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shared handle to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.module.shutdown_controller()
    }

    fn coordinators(&self) -> Vec<Arc<dyn Coordinator>> {
        let worker = &self.config.worker;
        // The S3 uploader lives outside this crate and is injected by the
        // deployment binary; the in-tree default keeps snapshots local.
        let uploader: Option<Arc<dyn SnapshotUploader>> = Some(Arc::new(NullUploader));

        vec![
            Arc::new(DecayCoordinator::new(
                Arc::clone(&self.manager),
                Duration::from_secs(worker.decay_interval_secs),
                worker.decay_amount,
            )),
            Arc::new(EmbeddingRetryCoordinator::new(
                Arc::clone(&self.manager),
                Arc::clone(&self.embedder),
                Duration::from_secs(worker.embedding_retry_interval_secs),
                worker.embedding_batch_size,
                worker.embedding_max_attempts,
            )),
            Arc::new(SnapshotCoordinator::new(
                Arc::clone(&self.manager),
                uploader,
                Duration::from_secs(worker.snapshot_interval_secs),
                worker.snapshot_on_start,
            )),
            Arc::new(CompactionCoordinator::new(
                Arc::clone(&self.manager),
                Duration::from_secs(worker.compaction_interval_secs),
                Duration::from_secs(worker.compaction_retention_secs),
            )),
        ]
    }

    /// Serves until `shutdown` resolves (or a fatal server error), then
    /// tears down in order: HTTP drain, coordinator drain, engine close.
    ///
    /// # Errors
    ///
    /// Returns the fatal server error, if any; teardown runs regardless.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let shutdown_ctrl = self.module.shutdown_controller();

        let mut workers = JoinSet::new();
        for coordinator in self.coordinators() {
            let rx = shutdown_ctrl.shutdown_receiver();
            workers.spawn(run_coordinator(coordinator, rx));
        }

        let state = build_app_state(
            Arc::clone(&self.sync),
            Arc::clone(&self.manager),
            Arc::clone(&shutdown_ctrl),
            self.module.config().clone(),
        );
        let router = build_router(state);

        info!(port = self.port, "engram server listening");
        let serve_result = self.module.serve(router, shutdown).await;
        if let Err(e) = &serve_result {
            error!(error = %e, "server terminated with error");
        }

        // serve() already drained HTTP; make sure the workers see the
        // signal even on the fatal-error path, then wait them out.
        shutdown_ctrl.trigger_shutdown();
        while workers.join_next().await.is_some() {}
        info!("coordinators drained");

        // Engines close last: every in-flight push has committed by now.
        if let Err(e) = self.manager.close() {
            error!(error = %e, "error closing store manager");
        }
        info!("store manager closed");

        serve_result
    }
}

/// Runs the server until SIGINT or SIGTERM.
///
/// # Errors
///
/// Propagates bind and fatal serve errors.
pub async fn run_until_signal(config: AppConfig) -> anyhow::Result<()> {
    let server = Server::bind(config).await?;
    server.run(shutdown_signal()).await
}

/// Resolves on the first termination or interrupt signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("interrupt received, shutting down"),
        () = terminate => info!("terminate received, shutting down"),
    }
}
