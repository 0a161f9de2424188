//! Axum server for the command bridge

use axum::routing::{get, post};
use axum::Router;
use quill_core::Result;
use std::future::Future;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers;
use crate::maintenance::MaintenanceTasks;
use crate::port::bind_with_reclaim;
use crate::state::SharedState;

/// Every route the bridge serves
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/commands",
            get(handlers::list_commands).post(handlers::submit_command),
        )
        .route("/commands/:id", get(handlers::get_command))
        .route("/commands/:id/response", post(handlers::post_response))
        .route("/commands/:id/posted", post(handlers::mark_posted))
        .route(
            "/current-file",
            get(handlers::get_current_file).post(handlers::set_current_file),
        )
        .route("/preview", post(handlers::preview))
        .route("/backups", get(handlers::list_backups))
        .route("/document", get(handlers::get_document))
        .route("/document/nodes", get(handlers::get_nodes))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/invalidate", post(handlers::cache_invalidate))
        .route("/cache/events", post(handlers::cache_event))
        .route("/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct BridgeServer {
    state: SharedState,
}

impl BridgeServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bridge = &self.state.config.bridge;
        let listener = bind_with_reclaim(&bridge.host, bridge.port, bridge.reclaim_port).await?;
        info!("Quill bridge listening on http://{}", listener.local_addr()?);

        let maintenance = MaintenanceTasks::spawn(&self.state);
        let result = axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(shutdown)
            .await;
        maintenance.shutdown();

        info!("Quill bridge stopped");
        result.map_err(Into::into)
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }
}
