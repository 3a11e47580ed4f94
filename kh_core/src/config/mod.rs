pub mod settings;

pub use settings::{
    AppConfig, ChecksConfig, ClusterBackend, ElectionBackend, LogFormat, LoggingConfig,
};
