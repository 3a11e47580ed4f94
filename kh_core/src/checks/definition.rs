//! Check definitions and their per-category parameters

use crate::error::CheckError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

lazy_static! {
    static ref CHECK_NAME_RE: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$")
        .expect("check name pattern is valid");
}

pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckCategory {
    ComponentStatus,
    DaemonSet,
    PodRestart,
    PodStatus,
    Dns,
    External,
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckCategory::ComponentStatus => write!(f, "component-status"),
            CheckCategory::DaemonSet => write!(f, "daemonset"),
            CheckCategory::PodRestart => write!(f, "pod-restart"),
            CheckCategory::PodStatus => write!(f, "pod-status"),
            CheckCategory::Dns => write!(f, "dns"),
            CheckCategory::External => write!(f, "external"),
        }
    }
}

/// Category-specific parameters. The variant determines the check's category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum CheckSpec {
    ComponentStatus,
    DaemonSet {
        namespace: String,
        pause_image_override: Option<String>,
    },
    PodRestart {
        namespaces: Vec<String>,
    },
    PodStatus {
        namespaces: Vec<String>,
    },
    Dns {
        endpoints: Vec<String>,
    },
    External {
        image: String,
        run_interval: Duration,
        timeout: Duration,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl CheckSpec {
    pub fn category(&self) -> CheckCategory {
        match self {
            CheckSpec::ComponentStatus => CheckCategory::ComponentStatus,
            CheckSpec::DaemonSet { .. } => CheckCategory::DaemonSet,
            CheckSpec::PodRestart { .. } => CheckCategory::PodRestart,
            CheckSpec::PodStatus { .. } => CheckCategory::PodStatus,
            CheckSpec::Dns { .. } => CheckCategory::Dns,
            CheckSpec::External { .. } => CheckCategory::External,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckDefinition {
    pub name: String,
    pub enabled: bool,
    pub mandatory: bool,
    pub run_interval: Duration,
    pub spec: CheckSpec,
}

impl CheckDefinition {
    /// Builds an enabled, mandatory definition running on the default interval.
    pub fn new(name: impl Into<String>, spec: CheckSpec) -> Self {
        let run_interval = match &spec {
            CheckSpec::External { run_interval, .. } => *run_interval,
            _ => DEFAULT_RUN_INTERVAL,
        };

        Self {
            name: name.into(),
            enabled: true,
            mandatory: true,
            run_interval,
            spec,
        }
    }

    /// External check discovered in cluster state.
    pub fn external(
        name: impl Into<String>,
        image: impl Into<String>,
        run_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let mut definition = Self::new(
            name,
            CheckSpec::External {
                image: image.into(),
                run_interval,
                timeout,
                env: BTreeMap::new(),
            },
        );
        definition.mandatory = false;
        definition
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn with_run_interval(mut self, run_interval: Duration) -> Self {
        self.run_interval = run_interval;
        self
    }

    pub fn category(&self) -> CheckCategory {
        self.spec.category()
    }

    pub fn is_external(&self) -> bool {
        self.category() == CheckCategory::External
    }

    pub fn validate(&self) -> Result<(), CheckError> {
        validate_check_name(&self.name)
    }
}

pub fn validate_check_name(name: &str) -> Result<(), CheckError> {
    if CHECK_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(CheckError::InvalidName(name.to_string()))
    }
}
