//! Per-check state and the aggregate cluster health served by the status API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckState {
    pub ok: bool,
    pub errors: Vec<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub mandatory: bool,
    pub authoritative_instance: String,
    /// Token the reporting external check presented; `None` for in-process probes.
    pub run_uuid: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl CheckState {
    pub fn healthy(authoritative_instance: impl Into<String>, mandatory: bool) -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            last_run: Some(Utc::now()),
            mandatory,
            authoritative_instance: authoritative_instance.into(),
            run_uuid: None,
            details: None,
        }
    }

    pub fn unhealthy(
        authoritative_instance: impl Into<String>,
        mandatory: bool,
        errors: Vec<String>,
    ) -> Self {
        Self {
            ok: false,
            errors,
            ..Self::healthy(authoritative_instance, mandatory)
        }
    }

    pub fn with_run_uuid(mut self, run_uuid: impl Into<String>) -> Self {
        self.run_uuid = Some(run_uuid.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatus {
    pub ok: bool,
    pub errors: Vec<String>,
    pub check_details: BTreeMap<String, CheckState>,
    pub current_master: Option<String>,
    pub instance: String,
    pub is_master: bool,
}

impl AggregateStatus {
    pub fn new(instance: impl Into<String>, is_master: bool) -> Self {
        let instance = instance.into();
        Self {
            ok: true,
            errors: Vec::new(),
            check_details: BTreeMap::new(),
            current_master: is_master.then(|| instance.clone()),
            instance,
            is_master,
        }
    }

    /// Only failing mandatory checks flip the overall status; every failure is listed.
    pub fn add_check(&mut self, name: String, state: CheckState) {
        if !state.ok {
            if state.mandatory {
                self.ok = false;
            }
            if state.errors.is_empty() {
                self.errors.push(format!("{}: check failed", name));
            }
            for error in &state.errors {
                self.errors.push(format!("{}: {}", name, error));
            }
        }

        self.check_details.insert(name, state);
    }

    pub fn from_states(
        instance: impl Into<String>,
        is_master: bool,
        states: BTreeMap<String, CheckState>,
    ) -> Self {
        let mut status = Self::new(instance, is_master);
        for (name, state) in states {
            status.add_check(name, state);
        }
        status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStatus {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ReportStatus {
    /// A healthy report must not carry errors and a failing one must explain itself.
    pub fn consistency_error(&self) -> Option<&'static str> {
        match (self.ok, self.errors.is_empty()) {
            (true, false) => Some("status reported ok but included errors"),
            (false, true) => Some("status reported failure without any errors"),
            _ => None,
        }
    }
}

/// Result submission from an external check process.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReport {
    #[validate(length(min = 1, max = 63, message = "checkName must be between 1 and 63 characters"))]
    pub check_name: String,
    #[validate(length(min = 1, message = "uuid is required"))]
    pub uuid: String,
    pub status: ReportStatus,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
