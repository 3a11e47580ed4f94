//! Main entry point for the kuberhealthy binary

use anyhow::Result;
use kh_core::checks::{CheckCategory, DnsProbe, ExternalPodLauncher, ExternalReportWatchdog};
use kh_core::config::{ClusterBackend, ElectionBackend, LogFormat};
use kh_core::{
    create_app, listen_for_signals, run_server, AppConfig, AppState, CheckRegistry, ClusterStore,
    KubeClusterStore, LeaseMasterMonitor, MasterMonitor, MemoryClusterStore, Orchestrator,
    ProbeExecutor, ShutdownCoordinator, StaticMasterMonitor, UuidWhitelist,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_tracing(&config);

    info!(
        instance = %config.instance.name,
        namespace = %config.instance.namespace,
        election = ?config.election.backend,
        cluster = ?config.cluster.backend,
        "Configuration loaded"
    );

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    let client = match (config.cluster.backend, config.election.backend) {
        (ClusterBackend::Memory, ElectionBackend::Standalone) => None,
        _ => Some(
            kube::Client::try_default()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?,
        ),
    };

    let store: Arc<dyn ClusterStore> = match (&client, config.cluster.backend) {
        (Some(client), ClusterBackend::Kubernetes) => {
            info!("Using Kubernetes custom resources for cluster state");
            Arc::new(KubeClusterStore::new(client.clone(), &config.instance.namespace))
        }
        _ => {
            info!("Using in-memory cluster state");
            Arc::new(MemoryClusterStore::new())
        }
    };

    let monitor: Arc<dyn MasterMonitor> = match (&client, config.election.backend) {
        (Some(client), ElectionBackend::Kubernetes) => Arc::new(
            LeaseMasterMonitor::new(
                client.clone(),
                &config.instance.namespace,
                &config.election.lease_name,
                &config.instance.name,
            )
            .with_lease_duration(config.lease_duration()),
        ),
        _ => Arc::new(StaticMasterMonitor::new(false)),
    };
    if config.election.debug {
        monitor.enable_verbose_logging();
    }

    let whitelist = UuidWhitelist::new(store.clone());
    let mut executor = ProbeExecutor::new(store.clone(), config.instance.name.as_str())
        .with_probe(CheckCategory::Dns, DnsProbe::factory(config.probe_timeout()));
    executor = match (&client, config.cluster.backend) {
        (Some(client), ClusterBackend::Kubernetes) => executor.with_probe(
            CheckCategory::External,
            ExternalPodLauncher::factory(
                client.clone(),
                config.instance.namespace.clone(),
                whitelist.clone(),
                store.clone(),
                config.reporting_url(),
            ),
        ),
        _ => executor.with_probe(CheckCategory::External, ExternalReportWatchdog::factory(store.clone())),
    };

    for category in [
        CheckCategory::ComponentStatus,
        CheckCategory::DaemonSet,
        CheckCategory::PodRestart,
        CheckCategory::PodStatus,
    ] {
        if !executor.supports(category) {
            warn!(category = %category, "No probe available; checks of this category will fail to activate");
        }
    }

    let mut registry = CheckRegistry::new(Arc::new(executor), whitelist.clone(), config.stop_timeout());
    for definition in config.check_definitions() {
        info!(check = %definition.name, category = %definition.category(), "Registering built-in check");
        registry.register(definition)?;
    }

    let (mut orchestrator, handle) =
        Orchestrator::new(registry, monitor, store.clone(), config.orchestrator_settings());
    if config.election.force_master {
        orchestrator.force_master();
    }

    let signals = listen_for_signals();
    tokio::spawn(orchestrator.run());

    let state = AppState::new(config.instance.name.as_str(), store, whitelist, handle.clone());
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_server(create_app(state.clone()), addr).await {
                error!(error = %e, "Status server failed; restarting");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let report = ShutdownCoordinator::new(config.grace_period())
        .run(signals, move || async move { handle.shutdown().await })
        .await;

    info!(outcome = ?report.outcome, signals = report.state.signal_count, "Shutdown finished");
    std::process::exit(report.outcome.exit_code());
}

fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if config.election.debug {
            "debug"
        } else {
            config.logging.level.as_str()
        };

        format!("kuberhealthy={level},kh_core={level},tower_http=info").into()
    });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let is_json = config.logging.format == LogFormat::Json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.to_lowercase() == "json")
            .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }
}
