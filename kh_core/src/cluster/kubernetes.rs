//! Cluster state backed by `khchecks` and `khstates` custom resources

use super::crds::{KuberhealthyCheck, KuberhealthyState, KuberhealthyStateSpec};
use super::ClusterStore;
use crate::checks::CheckDefinition;
use crate::error::ClusterStateError;
use crate::status::CheckState;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Error as KubeError, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const FIELD_MANAGER: &str = "kuberhealthy";

#[derive(Clone)]
pub struct KubeClusterStore {
    checks: Api<KuberhealthyCheck>,
    states: Api<KuberhealthyState>,
}

impl KubeClusterStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            checks: Api::namespaced(client.clone(), namespace),
            states: Api::namespaced(client, namespace),
        }
    }
}

fn map_kube_error(kind: &'static str, name: &str, err: KubeError) -> ClusterStateError {
    match err {
        KubeError::Api(response) if response.code == 404 => ClusterStateError::not_found(kind, name),
        other => ClusterStateError::Backend(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_check_definition(&self, name: &str) -> Result<CheckDefinition, ClusterStateError> {
        let check = self
            .checks
            .get(name)
            .await
            .map_err(|e| map_kube_error("khcheck", name, e))?;

        CheckDefinition::try_from(&check)
    }

    async fn list_external_check_definitions(&self) -> Result<Vec<CheckDefinition>, ClusterStateError> {
        let list = self
            .checks
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterStateError::Backend(e.to_string()))?;

        let mut definitions = Vec::with_capacity(list.items.len());
        for check in &list.items {
            match CheckDefinition::try_from(check) {
                Ok(definition) => definitions.push(definition),
                Err(e) => warn!(check = %check.name_any(), error = %e, "Skipping invalid khcheck"),
            }
        }

        debug!(count = definitions.len(), "Listed external check definitions");
        Ok(definitions)
    }

    async fn put_uuid(&self, check_name: &str, uuid: &str) -> Result<(), ClusterStateError> {
        let patch = json!({ "spec": { "currentUUID": uuid } });

        self.checks
            .patch(check_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error("khcheck", check_name, e))?;

        Ok(())
    }

    async fn get_uuid(&self, check_name: &str) -> Result<String, ClusterStateError> {
        let check = self
            .checks
            .get(check_name)
            .await
            .map_err(|e| map_kube_error("khcheck", check_name, e))?;

        Ok(check.spec.current_uuid)
    }

    async fn put_check_state(&self, check_name: &str, state: &CheckState) -> Result<(), ClusterStateError> {
        let resource = KuberhealthyState::new(check_name, KuberhealthyStateSpec::from(state));
        let params = PatchParams::apply(FIELD_MANAGER).force();

        self.states
            .patch(check_name, &params, &Patch::Apply(&resource))
            .await
            .map_err(|e| map_kube_error("khstate", check_name, e))?;

        Ok(())
    }

    async fn get_check_state(&self, check_name: &str) -> Result<Option<CheckState>, ClusterStateError> {
        let resource = self
            .states
            .get_opt(check_name)
            .await
            .map_err(|e| map_kube_error("khstate", check_name, e))?;

        Ok(resource.map(|r| CheckState::from(&r.spec)))
    }

    async fn list_check_states(&self) -> Result<BTreeMap<String, CheckState>, ClusterStateError> {
        let list = self
            .states
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterStateError::Backend(e.to_string()))?;

        Ok(list
            .items
            .iter()
            .map(|r| (r.name_any(), CheckState::from(&r.spec)))
            .collect())
    }

    async fn delete_check_state(&self, check_name: &str) -> Result<(), ClusterStateError> {
        match self.states.delete(check_name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(ClusterStateError::Backend(e.to_string())),
        }
    }
}
