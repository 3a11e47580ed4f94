//! In-process cluster state used in standalone mode and tests

use super::ClusterStore;
use crate::checks::CheckDefinition;
use crate::error::ClusterStateError;
use crate::status::CheckState;
use crate::whitelist::UuidWhitelistEntry;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryClusterStore {
    external_checks: Arc<RwLock<BTreeMap<String, CheckDefinition>>>,
    whitelist: Arc<RwLock<HashMap<String, UuidWhitelistEntry>>>,
    states: Arc<RwLock<BTreeMap<String, CheckState>>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_external_check(&self, definition: CheckDefinition) {
        self.external_checks
            .write()
            .insert(definition.name.clone(), definition);
    }

    pub fn remove_external_check(&self, name: &str) -> Option<CheckDefinition> {
        self.external_checks.write().remove(name)
    }

    pub fn whitelist_entry(&self, check_name: &str) -> Option<UuidWhitelistEntry> {
        self.whitelist.read().get(check_name).cloned()
    }
}

#[async_trait::async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn get_check_definition(&self, name: &str) -> Result<CheckDefinition, ClusterStateError> {
        self.external_checks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterStateError::not_found("check definition", name))
    }

    async fn list_external_check_definitions(&self) -> Result<Vec<CheckDefinition>, ClusterStateError> {
        Ok(self.external_checks.read().values().cloned().collect())
    }

    async fn put_uuid(&self, check_name: &str, uuid: &str) -> Result<(), ClusterStateError> {
        self.whitelist.write().insert(
            check_name.to_string(),
            UuidWhitelistEntry::new(check_name, uuid),
        );
        Ok(())
    }

    async fn get_uuid(&self, check_name: &str) -> Result<String, ClusterStateError> {
        self.whitelist
            .read()
            .get(check_name)
            .map(|entry| entry.current_uuid.clone())
            .ok_or_else(|| ClusterStateError::not_found("whitelist entry", check_name))
    }

    async fn put_check_state(&self, check_name: &str, state: &CheckState) -> Result<(), ClusterStateError> {
        self.states
            .write()
            .insert(check_name.to_string(), state.clone());
        Ok(())
    }

    async fn get_check_state(&self, check_name: &str) -> Result<Option<CheckState>, ClusterStateError> {
        Ok(self.states.read().get(check_name).cloned())
    }

    async fn list_check_states(&self) -> Result<BTreeMap<String, CheckState>, ClusterStateError> {
        Ok(self.states.read().clone())
    }

    async fn delete_check_state(&self, check_name: &str) -> Result<(), ClusterStateError> {
        self.states.write().remove(check_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_uuid_supersedes_previous_token() {
        let store = MemoryClusterStore::new();

        store.put_uuid("dns-check", "abc-123").await.unwrap();
        store.put_uuid("dns-check", "xyz-789").await.unwrap();

        assert_eq!(store.get_uuid("dns-check").await.unwrap(), "xyz-789");
        let entry = store.whitelist_entry("dns-check").unwrap();
        assert_eq!(entry.check_name, "dns-check");
        assert_eq!(entry.current_uuid, "xyz-789");
    }

    #[tokio::test]
    async fn test_missing_entries_are_not_found() {
        let store = MemoryClusterStore::new();

        assert!(store.get_uuid("nope").await.unwrap_err().is_not_found());
        assert!(store.get_check_definition("nope").await.unwrap_err().is_not_found());
        assert!(store.get_check_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_external_definitions_round_trip() {
        let store = MemoryClusterStore::new();
        let definition = CheckDefinition::external(
            "ssl-expiry",
            "registry.local/ssl:1",
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        store.upsert_external_check(definition.clone());
        assert_eq!(store.list_external_check_definitions().await.unwrap(), vec![definition.clone()]);
        assert_eq!(store.get_check_definition("ssl-expiry").await.unwrap(), definition);

        store.remove_external_check("ssl-expiry");
        assert!(store.list_external_check_definitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_state_lifecycle() {
        let store = MemoryClusterStore::new();
        let state = CheckState::healthy("kh-0", true);

        store.put_check_state("dns", &state).await.unwrap();
        assert_eq!(store.get_check_state("dns").await.unwrap(), Some(state));
        assert_eq!(store.list_check_states().await.unwrap().len(), 1);

        store.delete_check_state("dns").await.unwrap();
        assert!(store.list_check_states().await.unwrap().is_empty());
    }
}
