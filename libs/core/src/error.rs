use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Stable, machine-readable error kinds surfaced from the core.
#[derive(Debug, Error)]
pub enum ServiceHubError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("external service failure: {0}")]
    ExternalService(String),
    #[error("business rule violated: {0}")]
    BusinessRule(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceHubError {
    /// Stable code used by the problem-details body and by CLI error reporting.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceHubError::Validation(_) => "VALIDATION",
            ServiceHubError::NotFound(_) => "NOT_FOUND",
            ServiceHubError::Conflict(_) => "CONFLICT",
            ServiceHubError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceHubError::Forbidden(_) => "FORBIDDEN",
            ServiceHubError::RateLimited(_) => "RATE_LIMITED",
            ServiceHubError::Timeout(_) => "TIMEOUT",
            ServiceHubError::ExternalService(_) => "EXTERNAL_SERVICE",
            ServiceHubError::BusinessRule(_) => "BUSINESS_RULE",
            ServiceHubError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceHubError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceHubError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceHubError::Conflict(_) => StatusCode::CONFLICT,
            ServiceHubError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceHubError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceHubError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceHubError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceHubError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ServiceHubError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceHubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// RFC 7807-flavored problem body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    pub code: &'static str,
    pub message: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ServiceHubError {
    fn into_response(self) -> Response {
        let trace_id = uuid::Uuid::new_v4().to_string();
        tracing::warn!(code = self.code(), trace_id = %trace_id, "request failed: {self}");
        let body = ProblemDetails {
            code: self.code(),
            message: self.to_string(),
            trace_id,
            details: None,
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceHubError>;
