//! Core library for the kuberhealthy orchestrator: check registry, master state machine,
//! external check whitelist, shutdown coordination and the status API.

pub mod checks;
pub mod cluster;
pub mod config;
pub mod election;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod shutdown;
pub mod status;
pub mod whitelist;

pub use checks::{CheckDefinition, CheckExecutor, CheckRegistry, CheckSpec, ProbeExecutor};
pub use cluster::{ClusterStore, KubeClusterStore, MemoryClusterStore};
pub use config::AppConfig;
pub use election::{LeaseMasterMonitor, MasterMonitor, StaticMasterMonitor};
pub use error::{AppError, CheckError, ClusterStateError, Result};
pub use handlers::routes::create_routes;
pub use orchestrator::{Orchestrator, OrchestratorHandle, OrchestratorSnapshot};
pub use shutdown::{listen_for_signals, ShutdownCoordinator, ShutdownOutcome};
pub use whitelist::UuidWhitelist;

use axum::Router;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: String,
    pub instance: String,
    pub store: Arc<dyn ClusterStore>,
    pub whitelist: UuidWhitelist,
    pub orchestrator: OrchestratorHandle,
}

impl AppState {
    pub fn new(
        instance: impl Into<String>,
        store: Arc<dyn ClusterStore>,
        whitelist: UuidWhitelist,
        orchestrator: OrchestratorHandle,
    ) -> Self {
        Self {
            app_name: "kuberhealthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance: instance.into(),
            store,
            whitelist,
            orchestrator,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(create_routes())
        .layer(middleware::logging_layer())
        .with_state(state)
}

/// Serves until the listener fails. Process shutdown is owned by the shutdown coordinator,
/// which exits the process once checks are drained.
pub async fn run_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(anyhow::Error::from)?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(anyhow::Error::from)?;

    Ok(())
}
