//! OAuth 2.0 protected resource metadata (RFC 9728) for the MCP mount.
//!
//! Bearer challenges on `/mcp` point clients here to discover which
//! authorization server issues tokens for it.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Path of the metadata document.
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Path-suffixed variant for the MCP resource (RFC 9728 section 3.1).
pub const MCP_PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource/mcp";

/// Protected resource metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedResourceMetadata {
    /// Identifier of the protected resource, `{APP_URI}/mcp`.
    pub resource: String,
    /// Issuers whose tokens the resource accepts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,
    /// Scopes required on the resource.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    /// Always `["header"]`.
    pub bearer_methods_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    /// Metadata for the MCP mount, or `None` when `APP_URI` is unknown.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Option<Self> {
        Some(Self {
            resource: config.mcp.resource_uri()?,
            authorization_servers: config.auth.expected_issuer.iter().cloned().collect(),
            scopes_supported: config.mcp.scopes.clone(),
            bearer_methods_supported: vec!["header".into()],
        })
    }
}

/// Serve the metadata document.
///
/// ```text
/// GET /.well-known/oauth-protected-resource
///
/// Response: 200 OK
/// {
///   "resource": "https://geo.example.com/mcp",
///   "authorization_servers": ["https://idp.example.com/realms/geo"],
///   "bearer_methods_supported": ["header"]
/// }
/// ```
pub async fn protected_resource(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<ProtectedResourceMetadata>, ApiError> {
    ProtectedResourceMetadata::from_config(&state.config)
        .map(Json)
        .ok_or(ApiError::NotFound)
}
