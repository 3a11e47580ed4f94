pub mod definition;
pub mod dns;
pub mod executor;
pub mod external;
pub mod pod_launcher;
pub mod probe;
pub mod registry;

pub use definition::{validate_check_name, CheckCategory, CheckDefinition, CheckSpec, DEFAULT_RUN_INTERVAL};
pub use dns::DnsProbe;
pub use executor::{CheckExecutor, StopHandle, StopSignal};
pub use external::{ExternalReportWatchdog, ReportDeadline};
pub use pod_launcher::ExternalPodLauncher;
pub use probe::{Probe, ProbeExecutor, ProbeFactory, ProbeOutcome};
pub use registry::{CheckRegistry, RunningCheck};
