//! In-process probe runner: executes a category's probe on the check's interval and
//! records every outcome as the check's current state

use super::executor::{CheckExecutor, StopHandle};
use super::{CheckCategory, CheckDefinition};
use crate::cluster::ClusterStore;
use crate::error::CheckError;
use crate::status::CheckState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(Vec<String>),
    /// Nothing to record yet, e.g. an external check still inside its reporting window.
    Pending,
}

#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn run(&self) -> ProbeOutcome;

    /// Called once after the check was told to stop.
    async fn cleanup(&self) {}
}

pub trait ProbeFactory: Send + Sync {
    fn build(&self, definition: &CheckDefinition) -> Result<Arc<dyn Probe>, CheckError>;
}

impl<F> ProbeFactory for F
where
    F: Fn(&CheckDefinition) -> Result<Arc<dyn Probe>, CheckError> + Send + Sync,
{
    fn build(&self, definition: &CheckDefinition) -> Result<Arc<dyn Probe>, CheckError> {
        self(definition)
    }
}

pub struct ProbeExecutor {
    store: Arc<dyn ClusterStore>,
    instance: String,
    factories: HashMap<CheckCategory, Arc<dyn ProbeFactory>>,
}

impl ProbeExecutor {
    pub fn new(store: Arc<dyn ClusterStore>, instance: impl Into<String>) -> Self {
        Self {
            store,
            instance: instance.into(),
            factories: HashMap::new(),
        }
    }

    pub fn with_probe<T: ProbeFactory + 'static>(mut self, category: CheckCategory, factory: T) -> Self {
        self.factories.insert(category, Arc::new(factory));
        self
    }

    pub fn supports(&self, category: CheckCategory) -> bool {
        self.factories.contains_key(&category)
    }
}

#[async_trait::async_trait]
impl CheckExecutor for ProbeExecutor {
    async fn start(&self, definition: &CheckDefinition) -> Result<StopHandle, CheckError> {
        let category = definition.category();
        let factory = self.factories.get(&category).ok_or_else(|| CheckError::NoProbe {
            name: definition.name.clone(),
            category,
        })?;
        let probe = factory.build(definition)?;

        let name = definition.name.clone();
        let mandatory = definition.mandatory;
        let interval = definition.run_interval;
        let store = self.store.clone();
        let instance = self.instance.clone();

        info!(check = %name, category = %category, interval = ?interval, "Starting probe");

        Ok(StopHandle::spawn(&definition.name, move |mut stop| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = ticker.tick() => {}
                }

                let started = Instant::now();
                let outcome = tokio::select! {
                    outcome = probe.run() => outcome,
                    _ = stop.stopped() => break,
                };

                let state = match outcome {
                    ProbeOutcome::Healthy => CheckState::healthy(instance.as_str(), mandatory),
                    ProbeOutcome::Unhealthy(errors) => {
                        warn!(check = %name, errors = ?errors, "Check failed");
                        CheckState::unhealthy(instance.as_str(), mandatory, errors)
                    }
                    ProbeOutcome::Pending => continue,
                };

                debug!(check = %name, ok = state.ok, elapsed = ?started.elapsed(), "Check run complete");
                if let Err(e) = store.put_check_state(&name, &state).await {
                    error!(check = %name, error = %e, "Failed to record check state");
                }
            }

            probe.cleanup().await;
            info!(check = %name, "Probe stopped");
        }))
    }
}
