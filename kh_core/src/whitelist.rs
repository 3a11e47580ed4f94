//! Rotating per-check UUID tokens that authenticate external check reports

use crate::cluster::ClusterStore;
use crate::error::ClusterStateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UuidWhitelistEntry {
    pub check_name: String,
    pub current_uuid: String,
    pub issued_at: DateTime<Utc>,
}

impl UuidWhitelistEntry {
    pub fn new(check_name: impl Into<String>, current_uuid: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            current_uuid: current_uuid.into(),
            issued_at: Utc::now(),
        }
    }
}

type TokenGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Issues and verifies tokens. Verification always reads cluster state, since a concurrent
/// re-activation may have rotated the token since the last call.
#[derive(Clone)]
pub struct UuidWhitelist {
    store: Arc<dyn ClusterStore>,
    generator: TokenGenerator,
}

impl UuidWhitelist {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self {
            store,
            generator: Arc::new(|| Uuid::new_v4().to_string()),
        }
    }

    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Arc::new(generator);
        self
    }

    /// Persists a fresh token for `check_name`, replacing (not merging with) any previous one.
    pub async fn issue_token(&self, check_name: &str) -> Result<UuidWhitelistEntry, ClusterStateError> {
        let entry = UuidWhitelistEntry::new(check_name, (self.generator)());
        self.store.put_uuid(check_name, &entry.current_uuid).await?;

        info!(check = %check_name, "Issued new whitelist UUID");
        Ok(entry)
    }

    pub async fn verify(&self, check_name: &str, submitted_uuid: &str) -> Result<bool, ClusterStateError> {
        let current = match self.store.get_uuid(check_name).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                warn!(check = %check_name, "No whitelist UUID exists for check");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let verified = !current.is_empty() && current == submitted_uuid;
        debug!(check = %check_name, verified, "Verified submitted UUID");
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryClusterStore;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn scripted_whitelist(store: Arc<MemoryClusterStore>, tokens: &[&str]) -> UuidWhitelist {
        let queue = Mutex::new(tokens.iter().map(|t| t.to_string()).collect::<VecDeque<_>>());
        UuidWhitelist::new(store).with_generator(move || queue.lock().pop_front().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_verify_matches_only_latest_token() {
        let store = Arc::new(MemoryClusterStore::new());
        let whitelist = scripted_whitelist(store.clone(), &["abc-123", "xyz-789"]);

        let first = whitelist.issue_token("dns-check").await.unwrap();
        assert_eq!(first.current_uuid, "abc-123");
        assert!(whitelist.verify("dns-check", "abc-123").await.unwrap());

        whitelist.issue_token("dns-check").await.unwrap();
        assert!(!whitelist.verify("dns-check", "abc-123").await.unwrap());
        assert!(whitelist.verify("dns-check", "xyz-789").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_unknown_check_is_rejected() {
        let store = Arc::new(MemoryClusterStore::new());
        let whitelist = UuidWhitelist::new(store);

        assert!(!whitelist.verify("ghost", "abc-123").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_token_never_verifies() {
        let store = Arc::new(MemoryClusterStore::new());
        store.put_uuid("dns-check", "").await.unwrap();
        let whitelist = UuidWhitelist::new(store);

        assert!(!whitelist.verify("dns-check", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_default_tokens_are_unique_uuids() {
        let store = Arc::new(MemoryClusterStore::new());
        let whitelist = UuidWhitelist::new(store.clone());

        let a = whitelist.issue_token("dns-check").await.unwrap();
        let b = whitelist.issue_token("dns-check").await.unwrap();

        assert_ne!(a.current_uuid, b.current_uuid);
        assert!(Uuid::parse_str(&b.current_uuid).is_ok());
        assert_eq!(store.get_uuid("dns-check").await.unwrap(), b.current_uuid);
    }
}
