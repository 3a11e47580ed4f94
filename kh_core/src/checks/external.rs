//! Report deadline tracking for external checks, whose results arrive over the status API

use super::probe::{Probe, ProbeOutcome};
use super::{CheckDefinition, CheckSpec};
use crate::cluster::ClusterStore;
use crate::error::CheckError;
use crate::status::CheckState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// An external check is late once neither its activation nor its last verified report
/// is more recent than `run_interval + timeout`.
#[derive(Debug, Clone)]
pub struct ReportDeadline {
    activated_at: DateTime<Utc>,
    allowance: chrono::Duration,
}

impl ReportDeadline {
    pub fn new(activated_at: DateTime<Utc>, run_interval: Duration, timeout: Duration) -> Self {
        let allowance = chrono::Duration::from_std(run_interval + timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        Self {
            activated_at,
            allowance,
        }
    }

    pub fn from_definition(definition: &CheckDefinition) -> Result<Self, CheckError> {
        match &definition.spec {
            CheckSpec::External { run_interval, timeout, .. } => {
                Ok(Self::new(Utc::now(), *run_interval, *timeout))
            }
            _ => Err(CheckError::Activation {
                name: definition.name.clone(),
                reason: "not an external check".to_string(),
            }),
        }
    }

    /// Only states carrying a run UUID came from a verified report.
    pub fn evaluate(&self, state: Option<&CheckState>, now: DateTime<Utc>) -> ProbeOutcome {
        let last_report = state
            .filter(|s| s.run_uuid.is_some())
            .and_then(|s| s.last_run)
            .filter(|last_run| *last_run >= self.activated_at);

        let reference = last_report.unwrap_or(self.activated_at);
        if now - reference > self.allowance {
            ProbeOutcome::Unhealthy(vec![format!(
                "check has not reported within {}s",
                self.allowance.num_seconds()
            )])
        } else {
            ProbeOutcome::Pending
        }
    }
}

/// Watches an externally scheduled check and fails it when its reports stop arriving.
pub struct ExternalReportWatchdog {
    check_name: String,
    store: Arc<dyn ClusterStore>,
    deadline: ReportDeadline,
}

impl ExternalReportWatchdog {
    pub fn new(check_name: impl Into<String>, store: Arc<dyn ClusterStore>, deadline: ReportDeadline) -> Self {
        Self {
            check_name: check_name.into(),
            store,
            deadline,
        }
    }

    pub fn factory(
        store: Arc<dyn ClusterStore>,
    ) -> impl Fn(&CheckDefinition) -> Result<Arc<dyn Probe>, CheckError> + Send + Sync {
        move |definition: &CheckDefinition| -> Result<Arc<dyn Probe>, CheckError> {
            let deadline = ReportDeadline::from_definition(definition)?;
            Ok(Arc::new(ExternalReportWatchdog::new(
                definition.name.clone(),
                store.clone(),
                deadline,
            )))
        }
    }
}

pub(crate) async fn evaluate_deadline(
    store: &dyn ClusterStore,
    check_name: &str,
    deadline: &ReportDeadline,
) -> ProbeOutcome {
    match store.get_check_state(check_name).await {
        Ok(state) => deadline.evaluate(state.as_ref(), Utc::now()),
        Err(e) => {
            warn!(check = %check_name, error = %e, "Could not read check state; skipping deadline evaluation");
            ProbeOutcome::Pending
        }
    }
}

#[async_trait::async_trait]
impl Probe for ExternalReportWatchdog {
    async fn run(&self) -> ProbeOutcome {
        evaluate_deadline(self.store.as_ref(), &self.check_name, &self.deadline).await
    }
}
