use crate::checks::{CheckDefinition, CheckSpec};
use crate::orchestrator::OrchestratorSettings;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "kuberhealthy";
pub const ENV_PREFIX: &str = "KH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub instance: InstanceConfig,
    pub election: ElectionConfig,
    pub checks: ChecksConfig,
    pub orchestrator: OrchestratorConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElectionBackend {
    Kubernetes,
    Standalone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub backend: ElectionBackend,
    pub force_master: bool,
    pub debug: bool,
    pub lease_name: String,
    pub lease_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    pub component_status: bool,
    pub daemonset: bool,
    pub pod_restart: bool,
    pub pod_status: bool,
    pub dns: bool,
    pub external: bool,
    pub pod_check_namespaces: Vec<String>,
    pub dns_endpoints: Vec<String>,
    pub daemonset_namespace: String,
    /// Empty means the daemonset check uses its own default pause image.
    pub ds_pause_image_override: String,
    /// Empty means the in-cluster service address is derived from the instance namespace.
    pub reporting_url: String,
    pub run_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub master_poll_interval_seconds: u64,
    pub rescan_interval_seconds: u64,
    pub stop_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    pub grace_period_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    Kubernetes,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub backend: ClusterBackend,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            instance: InstanceConfig::default(),
            election: ElectionConfig::default(),
            checks: ChecksConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        let name = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "kuberhealthy-local".to_string());
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());

        Self { name, namespace }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            backend: ElectionBackend::Kubernetes,
            force_master: false,
            debug: false,
            lease_name: "kuberhealthy-master".to_string(),
            lease_duration_seconds: 60,
        }
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            component_status: false,
            daemonset: false,
            pod_restart: false,
            pod_status: false,
            dns: true,
            external: true,
            pod_check_namespaces: vec!["kube-system".to_string()],
            dns_endpoints: vec!["kubernetes.default".to_string()],
            daemonset_namespace: "kuberhealthy".to_string(),
            ds_pause_image_override: String::new(),
            reporting_url: String::new(),
            run_interval_seconds: 60,
            probe_timeout_seconds: 10,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            master_poll_interval_seconds: 10,
            rescan_interval_seconds: 15,
            stop_timeout_seconds: 30,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::Kubernetes,
        }
    }
}

impl AppConfig {
    /// Defaults, then `kuberhealthy.toml` in the working directory if present, then `KH__*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(path, None)
    }

    fn build(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(CONFIG_FILE_NAME).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("checks.pod_check_namespaces")
                .with_list_parse_key("checks.dns_endpoints")
                .source(env),
        );

        let app_config: AppConfig = builder.build()?.try_deserialize()?;
        app_config.validate()?;

        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port cannot be 0".to_string()));
        }

        if self.instance.name.is_empty() {
            return Err(ConfigError::Message("Instance name cannot be empty".to_string()));
        }

        if self.instance.namespace.is_empty() {
            return Err(ConfigError::Message("Instance namespace cannot be empty".to_string()));
        }

        if self.orchestrator.master_poll_interval_seconds == 0 || self.orchestrator.rescan_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Orchestrator intervals must be greater than 0".to_string(),
            ));
        }

        if self.orchestrator.stop_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Check stop timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown.grace_period_seconds == 0 {
            return Err(ConfigError::Message(
                "Shutdown grace period must be greater than 0".to_string(),
            ));
        }

        // A master that misses a renewal keeps running checks for up to one poll interval and
        // then one stop timeout; the lease must not expire before that.
        if self.election.backend == ElectionBackend::Kubernetes
            && self.election.lease_duration_seconds
                <= self.orchestrator.master_poll_interval_seconds + self.orchestrator.stop_timeout_seconds
        {
            return Err(ConfigError::Message(
                "Lease duration must be longer than the master poll interval plus the check stop timeout"
                    .to_string(),
            ));
        }

        if self.checks.run_interval_seconds == 0 || self.checks.probe_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Check run interval and probe timeout must be greater than 0".to_string(),
            ));
        }

        if self.checks.dns && self.checks.dns_endpoints.is_empty() {
            return Err(ConfigError::Message(
                "DNS check is enabled but no endpoints are configured".to_string(),
            ));
        }

        if (self.checks.pod_restart || self.checks.pod_status) && self.checks.pod_check_namespaces.is_empty() {
            return Err(ConfigError::Message(
                "Pod checks are enabled but no namespaces are configured".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_period_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.stop_timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.checks.probe_timeout_seconds)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.election.lease_duration_seconds)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            master_poll_interval: Duration::from_secs(self.orchestrator.master_poll_interval_seconds),
            rescan_interval: Duration::from_secs(self.orchestrator.rescan_interval_seconds),
            discover_external: self.checks.external,
        }
    }

    /// Address external checker pods post their reports to.
    pub fn reporting_url(&self) -> String {
        if self.checks.reporting_url.is_empty() {
            format!(
                "http://kuberhealthy.{}.svc.cluster.local/externalCheckStatus",
                self.instance.namespace
            )
        } else {
            self.checks.reporting_url.clone()
        }
    }

    /// Built-in checks switched on by the `checks` flags. All of them are mandatory.
    pub fn check_definitions(&self) -> Vec<CheckDefinition> {
        let checks = &self.checks;
        let mut specs = Vec::new();

        if checks.component_status {
            specs.push(("component-status", CheckSpec::ComponentStatus));
        }
        if checks.daemonset {
            specs.push((
                "daemonset",
                CheckSpec::DaemonSet {
                    namespace: checks.daemonset_namespace.clone(),
                    pause_image_override: Some(checks.ds_pause_image_override.clone())
                        .filter(|image| !image.is_empty()),
                },
            ));
        }
        if checks.pod_restart {
            specs.push((
                "pod-restarts",
                CheckSpec::PodRestart {
                    namespaces: checks.pod_check_namespaces.clone(),
                },
            ));
        }
        if checks.pod_status {
            specs.push((
                "pod-status",
                CheckSpec::PodStatus {
                    namespaces: checks.pod_check_namespaces.clone(),
                },
            ));
        }
        if checks.dns {
            specs.push((
                "dns-status-internal",
                CheckSpec::Dns {
                    endpoints: checks.dns_endpoints.clone(),
                },
            ));
        }

        let run_interval = Duration::from_secs(checks.run_interval_seconds);
        specs
            .into_iter()
            .map(|(name, spec)| CheckDefinition::new(name, spec).with_run_interval(run_interval))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckCategory;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.grace_period(), Duration::from_secs(300));
        assert_eq!(config.orchestrator.rescan_interval_seconds, 15);
        assert_eq!(config.election.lease_name, "kuberhealthy-master");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.shutdown.grace_period_seconds = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.election.lease_duration_seconds = 5;
        assert!(config.validate().is_err());

        config.election.backend = ElectionBackend::Standalone;
        assert!(config.validate().is_ok());

        config = AppConfig::default();
        config.checks.dns_endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_outlasts_poll_and_stop() {
        let mut config = AppConfig::default();
        assert!(
            config.election.lease_duration_seconds
                > config.orchestrator.master_poll_interval_seconds + config.orchestrator.stop_timeout_seconds
        );

        config.election.lease_duration_seconds = 15;
        assert!(config.validate().is_err());

        config.election.lease_duration_seconds = 40;
        assert!(config.validate().is_err());

        config.election.lease_duration_seconds = 41;
        assert!(config.validate().is_ok());

        config.orchestrator.stop_timeout_seconds = 45;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::build(
            None,
            env(&[
                ("KH__SERVER__PORT", "9090"),
                ("KH__CHECKS__POD_RESTART", "true"),
                ("KH__CHECKS__DNS_ENDPOINTS", "kubernetes.default,example.com"),
                ("KH__SHUTDOWN__GRACE_PERIOD_SECONDS", "60"),
                ("KH__CLUSTER__BACKEND", "memory"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert!(config.checks.pod_restart);
        assert_eq!(config.checks.dns_endpoints, vec!["kubernetes.default", "example.com"]);
        assert_eq!(config.grace_period(), Duration::from_secs(60));
        assert_eq!(config.cluster.backend, ClusterBackend::Memory);
    }

    #[test]
    fn test_file_source_is_layered_under_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 7070\n\n[election]\nbackend = \"standalone\"\nforce_master = true\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = AppConfig::build(Some(file.path()), env(&[("KH__SERVER__PORT", "7171")])).unwrap();

        assert_eq!(config.server.port, 7171);
        assert_eq!(config.election.backend, ElectionBackend::Standalone);
        assert!(config.election.force_master);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(AppConfig::load_from(Some(Path::new("/nonexistent/kuberhealthy.toml"))).is_err());
    }

    #[test]
    fn test_check_definitions_follow_flags() {
        let mut config = AppConfig::default();
        let names: Vec<String> = config.check_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["dns-status-internal"]);

        config.checks.daemonset = true;
        config.checks.pod_status = true;
        config.checks.ds_pause_image_override = "registry.local/pause:3.9".to_string();
        config.checks.run_interval_seconds = 120;

        let definitions = config.check_definitions();
        assert_eq!(definitions.len(), 3);
        assert!(definitions.iter().all(|d| d.mandatory && d.enabled));
        assert!(definitions.iter().all(|d| d.run_interval == Duration::from_secs(120)));

        let daemonset = definitions
            .iter()
            .find(|d| d.category() == CheckCategory::DaemonSet)
            .unwrap();
        assert_eq!(
            daemonset.spec,
            CheckSpec::DaemonSet {
                namespace: "kuberhealthy".to_string(),
                pause_image_override: Some("registry.local/pause:3.9".to_string()),
            }
        );
    }

    #[test]
    fn test_reporting_url_defaults_to_service_address() {
        let mut config = AppConfig::default();
        config.instance.namespace = "kuberhealthy".to_string();
        assert_eq!(
            config.reporting_url(),
            "http://kuberhealthy.kuberhealthy.svc.cluster.local/externalCheckStatus"
        );

        config.checks.reporting_url = "http://10.0.0.5:8080/externalCheckStatus".to_string();
        assert_eq!(config.reporting_url(), "http://10.0.0.5:8080/externalCheckStatus");
    }
}
