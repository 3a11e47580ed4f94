use crate::handlers::status::{handle_external_report, handle_healthz, handle_status};
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub const STATUS_PATH: &str = "/status";
pub const EXTERNAL_REPORT_PATH: &str = "/externalCheckStatus";

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_status))
        .route(STATUS_PATH, get(handle_status))
        .route("/healthz", get(handle_healthz))
        .route(EXTERNAL_REPORT_PATH, post(handle_external_report))
}
