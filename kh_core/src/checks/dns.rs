//! DNS resolution probe

use super::probe::{Probe, ProbeOutcome};
use super::{CheckDefinition, CheckSpec};
use crate::error::CheckError;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::debug;

pub struct DnsProbe {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    /// Factory for [`ProbeExecutor::with_probe`](super::ProbeExecutor::with_probe).
    pub fn factory(
        timeout: Duration,
    ) -> impl Fn(&CheckDefinition) -> Result<Arc<dyn Probe>, CheckError> + Send + Sync {
        move |definition: &CheckDefinition| -> Result<Arc<dyn Probe>, CheckError> {
            match &definition.spec {
                CheckSpec::Dns { endpoints } if !endpoints.is_empty() => {
                    Ok(Arc::new(DnsProbe::new(endpoints.clone(), timeout)))
                }
                _ => Err(CheckError::Activation {
                    name: definition.name.clone(),
                    reason: "DNS check requires at least one endpoint".to_string(),
                }),
            }
        }
    }

    async fn resolve(&self, endpoint: &str) -> Result<(), String> {
        let target = if endpoint.contains(':') {
            endpoint.to_string()
        } else {
            format!("{}:53", endpoint)
        };

        match tokio::time::timeout(self.timeout, lookup_host(target)).await {
            Ok(Ok(mut addrs)) => match addrs.next() {
                Some(addr) => {
                    debug!(endpoint, %addr, "DNS lookup succeeded");
                    Ok(())
                }
                None => Err(format!("DNS lookup of {} returned no addresses", endpoint)),
            },
            Ok(Err(e)) => Err(format!("DNS lookup of {} failed: {}", endpoint, e)),
            Err(_) => Err(format!("DNS lookup of {} timed out after {:?}", endpoint, self.timeout)),
        }
    }
}

#[async_trait::async_trait]
impl Probe for DnsProbe {
    async fn run(&self) -> ProbeOutcome {
        let mut errors = Vec::new();
        for endpoint in &self.endpoints {
            if let Err(e) = self.resolve(endpoint).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            ProbeOutcome::Healthy
        } else {
            ProbeOutcome::Unhealthy(errors)
        }
    }
}
