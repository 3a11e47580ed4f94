//! The master state machine. A single task owns the check registry and reacts to master
//! transitions, periodic re-scans of external checks, and shutdown requests.

use crate::checks::{CheckDefinition, CheckRegistry};
use crate::cluster::ClusterStore;
use crate::election::MasterMonitor;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterState {
    pub is_master: bool,
    pub forced: bool,
}

/// Read-only view published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    pub master: MasterState,
    pub active: BTreeSet<String>,
}

#[derive(Debug)]
enum Command {
    Shutdown { done: oneshot::Sender<()> },
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub master_poll_interval: Duration,
    pub rescan_interval: Duration,
    /// Whether re-scans list external checks from cluster state.
    pub discover_external: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            master_poll_interval: Duration::from_secs(10),
            rescan_interval: Duration::from_secs(15),
            discover_external: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl ReconcileReport {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty() && self.removed.is_empty()
    }
}

pub struct Orchestrator {
    registry: CheckRegistry,
    monitor: Arc<dyn MasterMonitor>,
    store: Arc<dyn ClusterStore>,
    settings: OrchestratorSettings,
    state: MasterState,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<OrchestratorSnapshot>,
}

/// Cloneable handle used by the web server and the shutdown coordinator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<OrchestratorSnapshot>,
}

impl Orchestrator {
    pub fn new(
        registry: CheckRegistry,
        monitor: Arc<dyn MasterMonitor>,
        store: Arc<dyn ClusterStore>,
        settings: OrchestratorSettings,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(OrchestratorSnapshot::default());

        let orchestrator = Self {
            registry,
            monitor,
            store,
            settings,
            state: MasterState::default(),
            commands: command_rx,
            snapshot: snapshot_tx,
        };
        let handle = OrchestratorHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };

        (orchestrator, handle)
    }

    pub fn force_master(&mut self) {
        self.state.forced = true;
        self.monitor.force_always_master();
        self.publish();
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Asks the monitor for the current master status and runs the matching transition.
    pub async fn poll_master(&mut self) {
        let is_master = self.state.forced || self.monitor.is_master().await;

        match (self.state.is_master, is_master) {
            (false, true) => {
                info!("Became master; activating checks");
                self.state.is_master = true;
                let report = self.reconcile().await;
                info!(activated = report.activated.len(), failed = report.failed.len(), "Check activation complete");
            }
            (true, false) => {
                warn!("Lost mastership; deactivating all checks");
                self.state.is_master = false;
                self.registry.deactivate_all().await;
                info!("All checks stopped after losing mastership");
            }
            _ => debug!(is_master, "Master status unchanged"),
        }

        self.publish();
    }

    /// Brings the running set in line with the known definitions. Running it twice without
    /// any change in between does nothing the second time.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if self.settings.discover_external {
            match self.store.list_external_check_definitions().await {
                Ok(discovered) => self.sync_external_definitions(discovered, &mut report).await,
                Err(e) => warn!(error = %e, "Could not list external checks; keeping known definitions"),
            }
        }

        let definitions: Vec<(String, bool)> = self
            .registry
            .definitions()
            .map(|d| (d.name.clone(), d.enabled))
            .collect();

        for (name, enabled) in definitions {
            let active = self.registry.is_active(&name);
            if enabled && !active {
                match self.registry.activate(&name).await {
                    Ok(()) => report.activated.push(name),
                    Err(e) => {
                        error!(check = %name, error = %e, "Failed to activate check; retrying on next re-scan");
                        report.failed.push(name);
                    }
                }
            } else if !enabled && active {
                // A stop timeout is already logged by the registry and the entry is gone either way.
                let _ = self.registry.deactivate(&name).await;
                report.deactivated.push(name);
            }
        }

        if !report.is_noop() {
            info!(
                activated = ?report.activated,
                deactivated = ?report.deactivated,
                removed = ?report.removed,
                "Reconciled checks"
            );
        }
        report
    }

    async fn sync_external_definitions(
        &mut self,
        discovered: Vec<CheckDefinition>,
        report: &mut ReconcileReport,
    ) {
        let discovered_names: BTreeSet<String> = discovered.iter().map(|d| d.name.clone()).collect();

        let removed: Vec<String> = self
            .registry
            .external_names()
            .difference(&discovered_names)
            .cloned()
            .collect();

        for name in removed {
            info!(check = %name, "External check removed from cluster state");
            self.registry.unregister(&name).await;
            if let Err(e) = self.store.delete_check_state(&name).await {
                warn!(check = %name, error = %e, "Failed to delete state of removed check");
            }
            report.removed.push(name);
        }

        for definition in discovered {
            let name = definition.name.clone();
            if self.registry.definition(&name).is_none() {
                debug!(check = %name, "Discovered external check");
            }
            if let Err(e) = self.registry.register(definition) {
                warn!(check = %name, error = %e, "Ignoring invalid external check");
            }
        }
    }

    pub async fn shutdown(&mut self) {
        info!(active = self.registry.active_names().len(), "Stopping all checks for shutdown");
        let failures = self.registry.deactivate_all().await;
        if !failures.is_empty() {
            warn!(failed = failures.len(), "Some checks did not stop cleanly during shutdown");
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(OrchestratorSnapshot {
            master: self.state,
            active: self.registry.active_names(),
        });
    }

    /// Drives the state machine until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        let mut poll = tokio::time::interval(self.settings.master_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rescan = tokio::time::interval(self.settings.rescan_interval);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval = ?self.settings.master_poll_interval,
            rescan_interval = ?self.settings.rescan_interval,
            "Orchestrator started"
        );

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    self.shutdown().await;
                    if let Some(Command::Shutdown { done }) = command {
                        let _ = done.send(());
                    }
                    break;
                }
                _ = poll.tick() => self.poll_master().await,
                _ = rescan.tick() => {
                    if self.state.is_master {
                        self.reconcile().await;
                        self.publish();
                    }
                }
            }
        }

        info!("Orchestrator stopped");
    }
}

impl OrchestratorHandle {
    /// Requests shutdown and waits until every check has stopped.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done: done_tx }).await.is_err() {
            debug!("Orchestrator already stopped");
            return;
        }
        let _ = done_rx.await;
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_master(&self) -> bool {
        self.snapshot.borrow().master.is_master
    }

    /// Resolves on the next published snapshot.
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }
}
