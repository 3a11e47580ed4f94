//! Application error types and handling

use crate::checks::CheckCategory;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Failures reading or writing the external cluster state store.
#[derive(Error, Debug)]
pub enum ClusterStateError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Cluster state backend error: {0}")]
    Backend(String),

    #[error("Invalid cluster state object: {0}")]
    Invalid(String),
}

impl ClusterStateError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ClusterStateError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterStateError::NotFound { .. })
    }
}

/// Errors raised while registering, starting, stopping or verifying checks.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Check '{0}' is already active")]
    AlreadyActive(String),

    #[error("Check '{0}' is not registered")]
    UnknownCheck(String),

    #[error("Check '{0}' is disabled")]
    CheckDisabled(String),

    #[error("Invalid check name '{0}': must be a lowercase DNS-1123 label")]
    InvalidName(String),

    #[error("No probe available for {category} check '{name}'")]
    NoProbe { name: String, category: CheckCategory },

    #[error("Failed to activate check '{name}': {reason}")]
    Activation { name: String, reason: String },

    #[error("Check '{name}' did not stop within {timeout:?}")]
    DeactivationTimeout { name: String, timeout: Duration },

    #[error("UUID verification failed for check '{0}'")]
    Verification(String),

    #[error(transparent)]
    ClusterState(#[from] ClusterStateError),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    InternalServerError,

    #[error("Cluster state error: {0}")]
    ClusterState(#[from] ClusterStateError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CheckError> for AppError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Verification(name) => {
                AppError::Forbidden(format!("UUID verification failed for check '{}'", name))
            }
            CheckError::InvalidName(_) => AppError::BadRequest(err.to_string()),
            CheckError::ClusterState(inner) => AppError::ClusterState(inner),
            other => AppError::Other(anyhow::anyhow!(other)),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::InternalServerError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::ClusterState(err) => {
                tracing::error!("Cluster state error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cluster state unavailable".to_string())
            }
            AppError::JsonError(err) => {
                tracing::error!("JSON error: {:?}", err);
                (StatusCode::BAD_REQUEST, "Invalid JSON data".to_string())
            }
            AppError::Other(err) => {
                tracing::error!("Unexpected error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
