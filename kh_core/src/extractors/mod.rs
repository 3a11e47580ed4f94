pub mod json;

pub use json::{ReportJson, ReportJsonRejection};
