//! `KuberhealthyCheck` and `KuberhealthyState` custom resources

use crate::checks::{CheckDefinition, CheckSpec};
use crate::error::ClusterStateError;
use crate::status::CheckState;
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_enabled() -> bool {
    true
}

fn default_run_interval_seconds() -> u64 {
    600
}

fn default_timeout_seconds() -> u64 {
    300
}

/// An external check. `currentUUID` is the whitelist token the checker pod must present.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "comcast.github.io",
    version = "v1",
    kind = "KuberhealthyCheck",
    plural = "khchecks",
    shortname = "khc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KuberhealthyCheckSpec {
    pub image: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default = "default_run_interval_seconds")]
    pub run_interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "currentUUID", default)]
    pub current_uuid: String,
}

/// Current result of one check, readable by every replica.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "comcast.github.io",
    version = "v1",
    kind = "KuberhealthyState",
    plural = "khstates",
    shortname = "khs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KuberhealthyStateSpec {
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub authoritative_pod: String,
    #[serde(default, rename = "runUUID")]
    pub run_uuid: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl TryFrom<&KuberhealthyCheck> for CheckDefinition {
    type Error = ClusterStateError;

    fn try_from(check: &KuberhealthyCheck) -> Result<Self, Self::Error> {
        let name = check.name_any();
        if check.spec.image.is_empty() {
            return Err(ClusterStateError::Invalid(format!("khcheck '{}' has no image", name)));
        }

        let run_interval = Duration::from_secs(check.spec.run_interval_seconds.max(1));
        let definition = CheckDefinition::new(
            name,
            CheckSpec::External {
                image: check.spec.image.clone(),
                run_interval,
                timeout: Duration::from_secs(check.spec.timeout_seconds),
                env: check.spec.env.clone(),
            },
        )
        .with_enabled(check.spec.enabled)
        .with_mandatory(check.spec.mandatory);

        definition
            .validate()
            .map_err(|e| ClusterStateError::Invalid(e.to_string()))?;

        Ok(definition)
    }
}

impl From<&CheckState> for KuberhealthyStateSpec {
    fn from(state: &CheckState) -> Self {
        Self {
            ok: state.ok,
            errors: state.errors.clone(),
            last_run: state.last_run.map(|t| t.to_rfc3339()),
            mandatory: state.mandatory,
            authoritative_pod: state.authoritative_instance.clone(),
            run_uuid: state.run_uuid.clone(),
            details: state.details.clone(),
        }
    }
}

impl From<&KuberhealthyStateSpec> for CheckState {
    fn from(spec: &KuberhealthyStateSpec) -> Self {
        let last_run = spec
            .last_run
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Self {
            ok: spec.ok,
            errors: spec.errors.clone(),
            last_run,
            mandatory: spec.mandatory,
            authoritative_instance: spec.authoritative_pod.clone(),
            run_uuid: spec.run_uuid.clone(),
            details: spec.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckCategory;

    fn khcheck(name: &str, image: &str) -> KuberhealthyCheck {
        KuberhealthyCheck::new(
            name,
            KuberhealthyCheckSpec {
                image: image.to_string(),
                enabled: true,
                mandatory: true,
                run_interval_seconds: 120,
                timeout_seconds: 30,
                env: BTreeMap::from([("TARGET".to_string(), "https://example.com".to_string())]),
                current_uuid: String::new(),
            },
        )
    }

    #[test]
    fn test_khcheck_converts_to_external_definition() {
        let definition = CheckDefinition::try_from(&khcheck("ssl-expiry", "registry.local/ssl:1")).unwrap();

        assert_eq!(definition.name, "ssl-expiry");
        assert_eq!(definition.category(), CheckCategory::External);
        assert!(definition.enabled);
        assert!(definition.mandatory);
        assert_eq!(definition.run_interval, Duration::from_secs(120));
        match definition.spec {
            CheckSpec::External { image, timeout, env, .. } => {
                assert_eq!(image, "registry.local/ssl:1");
                assert_eq!(timeout, Duration::from_secs(30));
                assert_eq!(env.get("TARGET").map(String::as_str), Some("https://example.com"));
            }
            other => panic!("unexpected spec {:?}", other),
        }
    }

    #[test]
    fn test_khcheck_without_image_is_rejected() {
        assert!(CheckDefinition::try_from(&khcheck("ssl-expiry", "")).is_err());
    }

    #[test]
    fn test_khcheck_spec_deserializes_defaults() {
        let spec: KuberhealthyCheckSpec =
            serde_json::from_value(serde_json::json!({ "image": "busybox", "currentUUID": "abc-123" })).unwrap();

        assert!(spec.enabled);
        assert!(!spec.mandatory);
        assert_eq!(spec.run_interval_seconds, 600);
        assert_eq!(spec.timeout_seconds, 300);
        assert_eq!(spec.current_uuid, "abc-123");
    }

    #[test]
    fn test_state_spec_preserves_check_state() {
        let state = CheckState::unhealthy("kh-0", true, vec!["nxdomain".to_string()])
            .with_run_uuid("abc-123");

        let spec = KuberhealthyStateSpec::from(&state);
        let restored = CheckState::from(&spec);

        assert!(!restored.ok);
        assert_eq!(restored.errors, state.errors);
        assert_eq!(restored.run_uuid.as_deref(), Some("abc-123"));
        assert_eq!(restored.authoritative_instance, "kh-0");
        assert_eq!(
            restored.last_run.map(|t| t.timestamp()),
            state.last_run.map(|t| t.timestamp())
        );
    }
}
