//! Runs external checks as checker pods and fails them when no report arrives in time

use super::external::{evaluate_deadline, ReportDeadline};
use super::probe::{Probe, ProbeOutcome};
use super::{CheckDefinition, CheckSpec};
use crate::cluster::ClusterStore;
use crate::error::CheckError;
use crate::whitelist::UuidWhitelist;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, Error as KubeError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CHECK_NAME_LABEL: &str = "kuberhealthy-check-name";

pub const ENV_CHECK_NAME: &str = "KH_CHECK_NAME";
pub const ENV_RUN_UUID: &str = "KH_RUN_UUID";
pub const ENV_REPORTING_URL: &str = "KH_REPORTING_URL";

/// Everything needed to render one checker pod.
#[derive(Debug, Clone)]
pub struct CheckerPodTemplate {
    pub check_name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub reporting_url: String,
}

impl CheckerPodTemplate {
    pub fn render(&self, pod_name: &str, run_uuid: &str) -> Pod {
        let mut env = vec![
            env_var(ENV_CHECK_NAME, &self.check_name),
            env_var(ENV_RUN_UUID, run_uuid),
            env_var(ENV_REPORTING_URL, &self.reporting_url),
        ];
        env.extend(self.env.iter().map(|(name, value)| env_var(name, value)));

        Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.to_string()),
                labels: Some(BTreeMap::from([(
                    CHECK_NAME_LABEL.to_string(),
                    self.check_name.clone(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: self.check_name.clone(),
                    image: Some(self.image.clone()),
                    env: Some(env),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn check_pod_selector(check_name: &str) -> String {
    format!("{}={}", CHECK_NAME_LABEL, check_name)
}

/// Issues a fresh whitelist token and renders the pod that will carry it. Reports from any
/// earlier pod of the same check fail verification from here on.
pub async fn prepare_run(
    whitelist: &UuidWhitelist,
    template: &CheckerPodTemplate,
) -> Result<(String, Pod), String> {
    let entry = whitelist
        .issue_token(&template.check_name)
        .await
        .map_err(|e| format!("could not issue run UUID: {}", e))?;

    let pod_name = format!("{}-{}", template.check_name, Utc::now().timestamp_millis());
    let pod = template.render(&pod_name, &entry.current_uuid);
    Ok((pod_name, pod))
}

pub struct ExternalPodLauncher {
    check_name: String,
    template: CheckerPodTemplate,
    pods: Api<Pod>,
    whitelist: UuidWhitelist,
    store: Arc<dyn ClusterStore>,
    deadline: ReportDeadline,
}

impl ExternalPodLauncher {
    pub fn factory(
        client: Client,
        namespace: String,
        whitelist: UuidWhitelist,
        store: Arc<dyn ClusterStore>,
        reporting_url: String,
    ) -> impl Fn(&CheckDefinition) -> Result<Arc<dyn Probe>, CheckError> + Send + Sync {
        move |definition: &CheckDefinition| -> Result<Arc<dyn Probe>, CheckError> {
            let (image, env) = match &definition.spec {
                CheckSpec::External { image, env, .. } => (image.clone(), env.clone()),
                _ => {
                    return Err(CheckError::Activation {
                        name: definition.name.clone(),
                        reason: "not an external check".to_string(),
                    })
                }
            };

            Ok(Arc::new(ExternalPodLauncher {
                check_name: definition.name.clone(),
                template: CheckerPodTemplate {
                    check_name: definition.name.clone(),
                    image,
                    env,
                    reporting_url: reporting_url.clone(),
                },
                pods: Api::namespaced(client.clone(), &namespace),
                whitelist: whitelist.clone(),
                store: store.clone(),
                deadline: ReportDeadline::from_definition(definition)?,
            }))
        }
    }

    /// Deletes every checker pod labelled with this check, whichever run created it.
    async fn delete_check_pods(&self) {
        let selector = check_pod_selector(&self.check_name);
        let params = ListParams::default().labels(&selector);

        match self.pods.delete_collection(&DeleteParams::default(), &params).await {
            Ok(_) => debug!(check = %self.check_name, "Deleted checker pods"),
            Err(KubeError::Api(err)) if err.code == 404 => {}
            Err(e) => warn!(check = %self.check_name, error = %e, "Failed to delete checker pods"),
        }
    }

    async fn launch(&self) -> Result<String, String> {
        let (pod_name, pod) = prepare_run(&self.whitelist, &self.template).await?;

        self.pods
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| format!("failed to create checker pod {}: {}", pod_name, e))?;

        info!(check = %self.check_name, pod = %pod_name, "Launched checker pod");
        Ok(pod_name)
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl Probe for ExternalPodLauncher {
    async fn run(&self) -> ProbeOutcome {
        let deadline = evaluate_deadline(self.store.as_ref(), &self.check_name, &self.deadline).await;

        self.delete_check_pods().await;
        match self.launch().await {
            Ok(_) => deadline,
            Err(e) => ProbeOutcome::Unhealthy(vec![e]),
        }
    }

    async fn cleanup(&self) {
        self.delete_check_pods().await;
    }
}
