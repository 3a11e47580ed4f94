//! Start/stop contract between the registry and whatever actually runs a check

use super::CheckDefinition;
use crate::error::CheckError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receiving side of a stop request, handed to the task running a check.
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once a stop was requested or the handle was dropped.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Opaque token for one running check.
pub struct StopHandle {
    check_name: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StopHandle {
    /// Spawns `run` as the check's task and returns the handle that stops it.
    pub fn spawn<F, Fut>(check_name: &str, run: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, rx) = watch::channel(false);
        let task = tokio::spawn(run(StopSignal { rx }));

        Self {
            check_name: check_name.to_string(),
            stop_tx,
            task,
        }
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    /// Requests a stop and waits up to `timeout` for the task to finish. A task that
    /// overruns is aborted and reported as a [`CheckError::DeactivationTimeout`].
    pub async fn stop(mut self, timeout: Duration) -> Result<(), CheckError> {
        let _ = self.stop_tx.send(true);

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => {
                debug!(check = %self.check_name, "Check task stopped");
                Ok(())
            }
            Ok(Err(join_error)) => {
                warn!(check = %self.check_name, error = %join_error, "Check task ended abnormally");
                Ok(())
            }
            Err(_) => {
                self.task.abort();
                Err(CheckError::DeactivationTimeout {
                    name: self.check_name.clone(),
                    timeout,
                })
            }
        }
    }
}

/// A handle that goes away without a confirmed stop takes its task with it, so a run can
/// never outlive the registry entry that owned it.
impl Drop for StopHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait::async_trait]
pub trait CheckExecutor: Send + Sync {
    async fn start(&self, definition: &CheckDefinition) -> Result<StopHandle, CheckError>;

    async fn stop(&self, handle: StopHandle, timeout: Duration) -> Result<(), CheckError> {
        handle.stop(timeout).await
    }
}
