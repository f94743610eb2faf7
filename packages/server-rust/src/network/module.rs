//! Network module with deferred startup lifecycle.
//!
//! `new()` creates resources, `bind()` claims the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! separation lets the lifecycle supervisor assemble shared state (store
//! manager, sync service, coordinators) between binding and serving.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    delta_handler, health_handler, liveness_handler, lore_delete_handler, lore_upsert_handler,
    push_handler, readiness_handler, snapshot_handler, status_handler, store_create_handler,
    store_delete_handler, store_info_handler, store_list_handler, AppState,
};
use super::middleware::{apply_http_layers, require_bearer_key};
use super::shutdown::ShutdownController;

/// Manages the HTTP server lifecycle: `new()` → `bind()` → `serve()`.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port. The shutdown
    /// controller is allocated immediately so other modules can share it.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Shared handle to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// The network configuration.
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Binds the TCP listener, returning the actual bound port (which
    /// differs from the configured one when port 0 was requested).
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound.
    pub async fn bind(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!("TCP listener bound to {}:{}", self.config.host, port);
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then drains.
    ///
    /// Consumes `self` because the listener moves into the server.
    ///
    /// # Errors
    ///
    /// Returns an error on fatal I/O failures.
    ///
    /// # Panics
    ///
    /// Panics if `bind()` was not called first.
    pub async fn serve(
        self,
        router: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self.listener.expect("bind() must be called before serve()");
        let shutdown_ctrl = self.shutdown;

        shutdown_ctrl.set_ready();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        shutdown_ctrl.trigger_shutdown();
        let drained = shutdown_ctrl
            .wait_for_drain(self.config.shutdown_timeout)
            .await;
        if drained {
            info!("all in-flight requests drained");
        } else {
            warn!("drain timeout expired with in-flight requests remaining");
        }
        Ok(())
    }
}

/// Assembles the axum router with all routes and middleware.
///
/// Routes:
/// - `GET  /health`, `/health/live`, `/health/ready`
/// - `POST /api/v1/stores`, `GET /api/v1/stores`
/// - `GET/DELETE /api/v1/stores/{store_id}`
/// - `POST /api/v1/stores/{store_id}/sync/push`
/// - `GET  /api/v1/stores/{store_id}/sync/delta`
/// - `GET  /api/v1/stores/{store_id}/sync/snapshot`
/// - `GET  /api/v1/stores/{store_id}/sync/status`
/// - `POST /api/v1/stores/{store_id}/lore` (legacy)
/// - `DELETE /api/v1/stores/{store_id}/lore/{lore_id}` (legacy)
///
/// The bearer-key middleware guards everything under `/api`; health
/// endpoints stay open for probes.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/stores",
            post(store_create_handler).get(store_list_handler),
        )
        .route(
            "/api/v1/stores/{store_id}",
            get(store_info_handler).delete(store_delete_handler),
        )
        .route("/api/v1/stores/{store_id}/sync/push", post(push_handler))
        .route("/api/v1/stores/{store_id}/sync/delta", get(delta_handler))
        .route(
            "/api/v1/stores/{store_id}/sync/snapshot",
            get(snapshot_handler),
        )
        .route(
            "/api/v1/stores/{store_id}/sync/status",
            get(status_handler),
        )
        .route("/api/v1/stores/{store_id}/lore", post(lore_upsert_handler))
        .route(
            "/api/v1/stores/{store_id}/lore/{lore_id}",
            delete(lore_delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_key,
        ));

    let health = Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler));

    let config = Arc::clone(&state.config);
    let router = api.merge(health).with_state(state);
    apply_http_layers(router, &config)
}

/// Builds the shared application state handed to every handler.
#[must_use]
pub fn build_app_state(
    sync: Arc<crate::sync::SyncService>,
    manager: Arc<crate::store::StoreManager>,
    shutdown: Arc<ShutdownController>,
    config: NetworkConfig,
) -> AppState {
    AppState {
        sync,
        manager,
        shutdown,
        config: Arc::new(config),
        start_time: Instant::now(),
    }
}
