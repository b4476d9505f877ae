//! Internal endpoints for the MCP tool server.
//!
//! Mounted only with the layered MCP verifier. The tool server records the
//! upstream token it obtained for an outer token's `jti` here, and forgets it
//! when the session ends. Every call must carry the internal key.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::mcp::McpBridge;
use crate::state::GatewayState;

/// Collection path for upstream token registrations.
pub const UPSTREAM_TOKENS_PATH: &str = "/internal/upstream-tokens";

/// Item path for a single registration, keyed by outer `jti`.
pub const UPSTREAM_TOKEN_PATH: &str = "/internal/upstream-tokens/:jti";

/// Upstream token registration.
///
/// ```text
/// POST /internal/upstream-tokens
/// x-mcp-internal-key: <key>
///
/// { "jti": "outer-jti", "token": "upstream", "expires_at": 1767225600 }
///
/// Response: 204 No Content
/// ```
#[derive(Debug, Deserialize)]
pub struct UpstreamTokenRequest {
    /// `jti` of the outer token.
    pub jti: String,
    /// Upstream token recorded for it.
    pub token: String,
    /// Unix time after which the mapping stops resolving.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Reject requests that do not carry the internal key.
pub async fn require_internal_key(
    State(bridge): State<Arc<McpBridge>>,
    request: Request,
    next: Next,
) -> Response {
    if bridge.admits(request.headers()) {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "Internal endpoint called without the internal key");
    ApiError::Unauthenticated.into_response()
}

/// Record an upstream token for an outer `jti`.
pub async fn record_upstream_token(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<UpstreamTokenRequest>,
) -> Result<StatusCode, ApiError> {
    let store = state.upstream_tokens.as_ref().ok_or(ApiError::NotFound)?;

    if body.jti.is_empty() || body.token.is_empty() {
        return Err(ApiError::BadRequest("jti and token must be non-empty".into()));
    }

    match body.expires_at {
        Some(expires_at) => store.insert_until(&body.jti, &body.token, expires_at),
        None => store.insert(&body.jti, &body.token),
    }

    tracing::debug!(jti = %body.jti, "Recorded upstream token");
    Ok(StatusCode::NO_CONTENT)
}

/// Forget the upstream token recorded for `jti`.
pub async fn forget_upstream_token(
    State(state): State<Arc<GatewayState>>,
    Path(jti): Path<String>,
) -> Result<StatusCode, ApiError> {
    let store = state.upstream_tokens.as_ref().ok_or(ApiError::NotFound)?;

    store
        .remove(&jti)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ApiError::NotFound)
}
