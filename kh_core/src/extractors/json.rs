//! JSON extractor for check reports; every rejection becomes a 400 with a JSON error body

use axum::{
    async_trait,
    body::Body,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;

pub struct ReportJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ReportJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ReportJsonRejection;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ReportJson(value)),
            Err(rejection) => Err(ReportJsonRejection::from(rejection)),
        }
    }
}

#[derive(Debug)]
pub enum ReportJsonRejection {
    MissingContentType,
    Syntax(String),
    Schema(String),
    Other(String),
}

impl From<JsonRejection> for ReportJsonRejection {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => ReportJsonRejection::MissingContentType,
            JsonRejection::JsonSyntaxError(e) => ReportJsonRejection::Syntax(e.body_text()),
            JsonRejection::JsonDataError(e) => ReportJsonRejection::Schema(e.body_text()),
            other => ReportJsonRejection::Other(other.body_text()),
        }
    }
}

impl IntoResponse for ReportJsonRejection {
    fn into_response(self) -> Response {
        let message = match &self {
            ReportJsonRejection::MissingContentType => "Expected request with `Content-Type: application/json`".to_string(),
            ReportJsonRejection::Syntax(msg) if msg.contains("EOF while parsing") => {
                "Empty or incomplete JSON request".to_string()
            }
            ReportJsonRejection::Syntax(_) => "Invalid JSON format".to_string(),
            ReportJsonRejection::Schema(msg) => msg.clone(),
            ReportJsonRejection::Other(_) => "Failed to parse JSON request".to_string(),
        };

        tracing::debug!(rejection = %self, "Rejected malformed check report");

        let status = StatusCode::BAD_REQUEST;
        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for ReportJsonRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportJsonRejection::MissingContentType => write!(f, "Missing JSON content type"),
            ReportJsonRejection::Syntax(msg) => write!(f, "Invalid JSON: {}", msg),
            ReportJsonRejection::Schema(msg) => write!(f, "Invalid report: {}", msg),
            ReportJsonRejection::Other(msg) => write!(f, "JSON error: {}", msg),
        }
    }
}

impl std::error::Error for ReportJsonRejection {}
