//! Health check endpoint.
//!
//! Served outside the context mount, so it never passes the gateway.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::config::AuthMode;
use crate::state::GatewayState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Active authentication strategy.
    pub auth: &'static str,
    /// Whether the MCP mount is enabled.
    pub mcp: bool,
}

/// Health check handler.
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "auth": "jwks",
///   "mcp": false
/// }
/// ```
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let auth = match state.mode {
        AuthMode::Disabled => "none",
        AuthMode::Opa => "opa",
        AuthMode::Jwks => "jwks",
        AuthMode::ApiKey => "api_key",
    };

    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        auth,
        mcp: state.config.mcp.enabled,
    };

    (StatusCode::OK, Json(response))
}
