//! Master election on a coordination/v1 Lease. Every `is_master` poll acquires or renews the
//! lease, so an instance that stops polling loses mastership once the lease expires.

use super::MasterMonitor;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, Error as KubeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
enum LeaseDecision {
    Renew,
    TakeOver,
    HeldBy(String),
}

pub struct LeaseMasterMonitor {
    leases: Api<Lease>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    forced: AtomicBool,
    verbose: AtomicBool,
    was_master: AtomicBool,
}

impl LeaseMasterMonitor {
    pub fn new(client: Client, namespace: &str, lease_name: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            lease_duration: Duration::from_secs(60),
            forced: AtomicBool::new(false),
            verbose: AtomicBool::new(false),
            was_master: AtomicBool::new(false),
        }
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    fn lease_spec(&self, now: DateTime<Utc>, acquire_time: Option<MicroTime>, transitions: Option<i32>) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: Some(acquire_time.unwrap_or(MicroTime(now))),
            renew_time: Some(MicroTime(now)),
            lease_transitions: transitions,
            ..Default::default()
        }
    }

    async fn acquire_or_renew(&self) -> Result<bool, KubeError> {
        let now = Utc::now();

        let Some(existing) = self.leases.get_opt(&self.lease_name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.lease_name.clone()),
                    ..Default::default()
                },
                spec: Some(self.lease_spec(now, None, Some(0))),
            };

            return match self.leases.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(KubeError::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e),
            };
        };

        let spec = existing.spec.clone().unwrap_or_default();
        let decision = decide(&spec, &self.identity, now);
        let (acquire_time, transitions) = match &decision {
            LeaseDecision::Renew => (spec.acquire_time.clone(), spec.lease_transitions),
            LeaseDecision::TakeOver => (None, Some(spec.lease_transitions.unwrap_or(0) + 1)),
            LeaseDecision::HeldBy(holder) => {
                if self.verbose.load(Ordering::Relaxed) {
                    debug!(lease = %self.lease_name, holder = %holder, "Lease held by another instance");
                }
                return Ok(false);
            }
        };

        let mut updated = existing;
        updated.spec = Some(self.lease_spec(now, acquire_time, transitions));

        // Replace carries the resourceVersion, so a concurrent takeover surfaces as a 409.
        match self
            .leases
            .replace(&self.lease_name, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => Ok(true),
            Err(KubeError::Api(err)) if err.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn lease_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let (Some(renew_time), Some(duration)) = (&spec.renew_time, spec.lease_duration_seconds) else {
        return true;
    };

    renew_time.0 + chrono::Duration::seconds(i64::from(duration)) < now
}

fn decide(spec: &LeaseSpec, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    match spec.holder_identity.as_deref() {
        Some(holder) if holder == identity => LeaseDecision::Renew,
        Some(holder) if !holder.is_empty() && !lease_expired(spec, now) => {
            LeaseDecision::HeldBy(holder.to_string())
        }
        _ => LeaseDecision::TakeOver,
    }
}

#[async_trait::async_trait]
impl MasterMonitor for LeaseMasterMonitor {
    async fn is_master(&self) -> bool {
        if self.forced.load(Ordering::Relaxed) {
            return true;
        }

        let master = match self.acquire_or_renew().await {
            Ok(master) => master,
            Err(e) => {
                warn!(lease = %self.lease_name, error = %e, "Lease check failed; assuming not master");
                false
            }
        };

        if self.was_master.swap(master, Ordering::Relaxed) != master {
            info!(lease = %self.lease_name, identity = %self.identity, master, "Master status changed");
        }
        master
    }

    fn force_always_master(&self) {
        info!(identity = %self.identity, "Forcing this instance to always be master");
        self.forced.store(true, Ordering::Relaxed);
    }

    fn enable_verbose_logging(&self) {
        self.verbose.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: &str, renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(duration),
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_own_lease_is_renewed() {
        assert_eq!(decide(&spec("kh-0", 5, 15), "kh-0", Utc::now()), LeaseDecision::Renew);
        assert_eq!(decide(&spec("kh-0", 60, 15), "kh-0", Utc::now()), LeaseDecision::Renew);
    }

    #[test]
    fn test_live_lease_of_other_instance_is_respected() {
        assert_eq!(
            decide(&spec("kh-1", 5, 15), "kh-0", Utc::now()),
            LeaseDecision::HeldBy("kh-1".to_string())
        );
    }

    #[test]
    fn test_expired_or_empty_lease_is_taken_over() {
        assert_eq!(decide(&spec("kh-1", 30, 15), "kh-0", Utc::now()), LeaseDecision::TakeOver);
        assert_eq!(decide(&spec("", 1, 15), "kh-0", Utc::now()), LeaseDecision::TakeOver);
        assert_eq!(decide(&LeaseSpec::default(), "kh-0", Utc::now()), LeaseDecision::TakeOver);
    }
}
