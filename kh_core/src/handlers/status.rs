//! Aggregate status and external check report handlers

use crate::{
    checks::validate_check_name,
    error::{AppError, CheckError, Result},
    extractors::ReportJson,
    status::{AggregateStatus, CheckState, ExternalReport},
    AppState,
};
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use tracing::{debug, info, warn};
use validator::Validate;

/// Current health of every check. Served from cluster state so every replica answers the same.
pub async fn handle_status(State(state): State<AppState>) -> Result<Json<AggregateStatus>> {
    let states = state.store.list_check_states().await?;
    let is_master = state.orchestrator.is_master();

    let status = AggregateStatus::from_states(state.instance.as_str(), is_master, states);
    debug!(ok = status.ok, checks = status.check_details.len(), "Serving aggregate status");

    Ok(Json(status))
}

pub async fn handle_healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "app": state.app_name,
        "version": state.version,
        "instance": state.instance,
        "isMaster": state.orchestrator.is_master(),
    }))
}

/// Accepts a result from an external check. The report is only recorded when its UUID matches
/// the token currently issued for the check.
pub async fn handle_external_report(
    State(state): State<AppState>,
    ReportJson(report): ReportJson<ExternalReport>,
) -> Result<impl IntoResponse> {
    report.validate()?;
    validate_check_name(&report.check_name)?;
    if let Some(reason) = report.status.consistency_error() {
        return Err(AppError::BadRequest(reason.to_string()));
    }

    let verified = state.whitelist.verify(&report.check_name, &report.uuid).await?;
    if !verified {
        warn!(check = %report.check_name, "Rejected external check report with invalid UUID");
        return Err(CheckError::Verification(report.check_name).into());
    }

    let mandatory = match state.store.get_check_definition(&report.check_name).await {
        Ok(definition) => definition.mandatory,
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e.into()),
    };

    let mut check_state = if report.status.ok {
        CheckState::healthy(state.instance.as_str(), mandatory)
    } else {
        CheckState::unhealthy(state.instance.as_str(), mandatory, report.status.errors)
    }
    .with_run_uuid(report.uuid);
    if let Some(details) = report.details {
        check_state = check_state.with_details(details);
    }

    state.store.put_check_state(&report.check_name, &check_state).await?;
    info!(check = %report.check_name, ok = check_state.ok, "Recorded external check report");

    Ok(Json(json!({ "accepted": true })))
}
