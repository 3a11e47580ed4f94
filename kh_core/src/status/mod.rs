pub mod models;

pub use models::{AggregateStatus, CheckState, ExternalReport, ReportStatus};
