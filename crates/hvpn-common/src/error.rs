//! HTTP error taxonomy shared by every service boundary.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to HTTP callers.
///
/// Internal failures (probe timeouts, sync failures) never reach this type;
/// they are absorbed and retried by the background tasks that own them.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed registration, route or push input.
    #[error("{0}")]
    Validation(String),
    /// A protected endpoint was called without a bearer token.
    #[error("missing bearer token")]
    Unauthorized,
    /// A bearer token was supplied but does not match.
    #[error("{0}")]
    Forbidden(String),
    /// The identity is already held by another registrant.
    #[error("{0}")]
    Conflict(String),
    /// The caller exceeded its request budget.
    #[error("rate limit exceeded")]
    RateLimited,
    /// No relay matches and no fallback is configured.
    #[error("no relay available")]
    NoRelayAvailable,
    /// Unexpected server-side failure.
    #[error("internal error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NoRelayAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}
