//! The HTTP error envelope: `{error: <tag>, details: <string>}` with the
//! status mapping of the API contract.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use osa_domain::error::Error;

pub struct ApiError {
    pub status: StatusCode,
    pub tag: &'static str,
    pub details: String,
}

impl ApiError {
    pub fn new(status: StatusCode, tag: &'static str, details: impl Into<String>) -> Self {
        Self {
            status,
            tag,
            details: details.into(),
        }
    }

    pub fn invalid(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", details)
    }

    pub fn not_found(details: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", details)
    }

    pub fn tool_error(details: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "tool_error", details)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Blocked(_) | Error::ToolNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Provider { .. } | Error::Http(_) | Error::ContextOverflow => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Cancelled => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            tag: e.api_tag(),
            details: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.tag,
                "details": self.details,
            })),
        )
            .into_response()
    }
}
