//! Cluster state collaborators: external check definitions, whitelist tokens and check state

pub mod crds;
pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeClusterStore;
pub use crds::{KuberhealthyCheck, KuberhealthyCheckSpec, KuberhealthyState, KuberhealthyStateSpec};
pub use memory::MemoryClusterStore;

use crate::checks::CheckDefinition;
use crate::error::ClusterStateError;
use crate::status::CheckState;
use std::collections::BTreeMap;

/// Concurrently accessed external store. Implementations never assume exclusive access:
/// reads are fresh on every call and writes replace whatever was there.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_check_definition(&self, name: &str) -> Result<CheckDefinition, ClusterStateError>;

    async fn list_external_check_definitions(&self) -> Result<Vec<CheckDefinition>, ClusterStateError>;

    async fn put_uuid(&self, check_name: &str, uuid: &str) -> Result<(), ClusterStateError>;

    async fn get_uuid(&self, check_name: &str) -> Result<String, ClusterStateError>;

    async fn put_check_state(&self, check_name: &str, state: &CheckState) -> Result<(), ClusterStateError>;

    async fn get_check_state(&self, check_name: &str) -> Result<Option<CheckState>, ClusterStateError>;

    async fn list_check_states(&self) -> Result<BTreeMap<String, CheckState>, ClusterStateError>;

    async fn delete_check_state(&self, check_name: &str) -> Result<(), ClusterStateError>;
}
