//! API error types and responses.
//!
//! Authentication failures are deliberately uniform on the wire: the client
//! sees `401 {"message": "Unauthenticated"}` whatever the cause, and the cause
//! goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use fastgeoapi_auth::AuthError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No strategy authenticated the request.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Nothing is registered under the requested name.
    #[error("not found")]
    NotFound,

    /// The upstream service could not be reached.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: &'static str,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Never includes internal detail.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::BadRequest(_) => "Bad Request",
            Self::NotFound => "Not Found",
            Self::BadGateway(_) => "Bad Gateway",
            Self::Internal(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            message: self.message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_upstream() {
            tracing::error!(error = %err, kind = err.kind(), "Identity provider unavailable");
        } else {
            tracing::debug!(error = %err, kind = err.kind(), "Authentication failed");
        }
        Self::Unauthenticated
    }
}
