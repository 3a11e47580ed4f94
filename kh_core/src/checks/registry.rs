//! Known check definitions and the at-most-one running instance of each

use super::executor::{CheckExecutor, StopHandle};
use super::CheckDefinition;
use crate::error::CheckError;
use crate::whitelist::UuidWhitelist;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RunningCheck {
    pub definition: CheckDefinition,
    pub handle: StopHandle,
    pub started_at: DateTime<Utc>,
}

/// Owns every definition and running check. Mutated only by the orchestrator task, so
/// activation and deactivation for one name never interleave.
pub struct CheckRegistry {
    definitions: BTreeMap<String, CheckDefinition>,
    running: HashMap<String, RunningCheck>,
    executor: Arc<dyn CheckExecutor>,
    whitelist: UuidWhitelist,
    stop_timeout: Duration,
}

impl CheckRegistry {
    pub fn new(executor: Arc<dyn CheckExecutor>, whitelist: UuidWhitelist, stop_timeout: Duration) -> Self {
        Self {
            definitions: BTreeMap::new(),
            running: HashMap::new(),
            executor,
            whitelist,
            stop_timeout,
        }
    }

    /// Adds or replaces a definition. A running check keeps its current run until it is
    /// deactivated.
    pub fn register(&mut self, definition: CheckDefinition) -> Result<(), CheckError> {
        definition.validate()?;

        if let Some(previous) = self.definitions.get(&definition.name) {
            if previous != &definition {
                debug!(check = %definition.name, "Replacing check definition");
            }
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub async fn unregister(&mut self, name: &str) -> Option<CheckDefinition> {
        if let Err(e) = self.deactivate(name).await {
            warn!(check = %name, error = %e, "Check did not stop cleanly while being removed");
        }
        self.definitions.remove(name)
    }

    pub fn definition(&self, name: &str) -> Option<&CheckDefinition> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CheckDefinition> {
        self.definitions.values()
    }

    pub fn external_names(&self) -> BTreeSet<String> {
        self.definitions
            .values()
            .filter(|d| d.is_external())
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    pub fn active_names(&self) -> BTreeSet<String> {
        self.running.keys().cloned().collect()
    }

    pub fn running(&self, name: &str) -> Option<&RunningCheck> {
        self.running.get(name)
    }

    /// Starts `name`. External checks get a fresh whitelist token first, so reports from
    /// any earlier run are rejected from here on.
    pub async fn activate(&mut self, name: &str) -> Result<(), CheckError> {
        let definition = self
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| CheckError::UnknownCheck(name.to_string()))?;

        if !definition.enabled {
            return Err(CheckError::CheckDisabled(name.to_string()));
        }

        if self.running.contains_key(name) {
            warn!(check = %name, "Refusing to start check that is already active");
            return Err(CheckError::AlreadyActive(name.to_string()));
        }

        if definition.is_external() {
            self.whitelist.issue_token(name).await?;
        }

        let handle = self.executor.start(&definition).await?;
        info!(check = %name, category = %definition.category(), "Activated check");

        self.running.insert(
            name.to_string(),
            RunningCheck {
                definition,
                handle,
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Stops `name` if it is running. The entry is dropped even when the stop times out,
    /// since the task has been aborted by then.
    pub async fn deactivate(&mut self, name: &str) -> Result<(), CheckError> {
        let Some(running) = self.running.remove(name) else {
            return Ok(());
        };

        let result = bounded_stop(self.executor.as_ref(), name, running.handle, self.stop_timeout).await;
        match &result {
            Ok(()) => info!(check = %name, "Deactivated check"),
            Err(e) => warn!(check = %name, error = %e, "Check did not stop within timeout"),
        }
        result
    }

    /// Stops every running check in parallel and returns the ones that failed to stop.
    pub async fn deactivate_all(&mut self) -> Vec<CheckError> {
        if self.running.is_empty() {
            return Vec::new();
        }

        let executor = self.executor.clone();
        let timeout = self.stop_timeout;
        let stops = self.running.drain().map(|(name, running)| {
            let executor = executor.clone();
            async move {
                debug!(check = %name, "Stopping check");
                bounded_stop(executor.as_ref(), &name, running.handle, timeout).await
            }
        });

        let failures: Vec<CheckError> = join_all(stops)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            info!("Stopped all checks");
        } else {
            warn!(failed = failures.len(), "Some checks did not stop within timeout");
        }
        failures
    }
}

/// Waits at most `timeout` for the executor to confirm the stop, whatever the executor does
/// with the bound it is given. The handle is dropped on overrun, which aborts the task.
async fn bounded_stop(
    executor: &dyn CheckExecutor,
    name: &str,
    handle: StopHandle,
    timeout: Duration,
) -> Result<(), CheckError> {
    match tokio::time::timeout(timeout, executor.stop(handle, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(CheckError::DeactivationTimeout {
            name: name.to_string(),
            timeout,
        }),
    }
}
