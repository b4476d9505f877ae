//! Gateway application state.
//!
//! Everything here is assembled once at startup and read-only afterwards.

use std::sync::Arc;

use fastgeoapi_auth::{
    ApiKeyAuthentication, AuthProvider, ClaimsTokenVerifier, JwksAuthentication, JwksClient,
    LayeredTokenVerifier, MemoryUpstreamTokenStore, TokenVerifier, TrustingUpstreamTokenVerifier,
};
use fastgeoapi_core::{CoreError, Result};

use crate::auth::AuthGateway;
use crate::bearer::BearerGuard;
use crate::config::{AuthMode, GatewayConfig, McpVerifier};
use crate::mcp::McpBridge;

/// Shared application state for the gateway.
#[derive(Debug)]
pub struct GatewayState {
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// Resolved authentication mode.
    pub mode: AuthMode,
    /// Gate in front of the mounted API; `None` when authentication is disabled.
    pub gateway: Option<Arc<AuthGateway>>,
    /// Bearer guard for the MCP mount.
    pub bearer: Option<Arc<BearerGuard>>,
    /// Internal key holder; present iff MCP integration is enabled.
    pub bridge: Option<Arc<McpBridge>>,
    /// Outer `jti` to upstream token mapping; present iff the layered MCP
    /// verifier is selected.
    pub upstream_tokens: Option<Arc<MemoryUpstreamTokenStore>>,
}

impl GatewayState {
    /// Build the state for the configured mode.
    ///
    /// # Errors
    ///
    /// Fails on any configuration error, and in OPA mode, whose policy
    /// strategy must be supplied through [`GatewayState::with_provider`].
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let mode = config.validate()?;

        let provider = match mode {
            AuthMode::Disabled => None,
            AuthMode::Jwks => Some(AuthProvider::new().with_strategy(
                JwksAuthentication::with_fetcher(config.jwks_config()?, jwks_client(&config)?),
            )),
            AuthMode::ApiKey => Some(
                AuthProvider::new().with_strategy(ApiKeyAuthentication::new(config.api_key()?)),
            ),
            AuthMode::Opa => {
                return Err(CoreError::invalid(
                    "OPA_ENABLED",
                    "no built-in policy engine strategy; supply one with an AuthProvider",
                ))
            }
        };

        Self::with_provider(config, provider)
    }

    /// Build the state around a caller-supplied provider.
    ///
    /// # Errors
    ///
    /// Fails on any configuration error.
    pub fn with_provider(config: GatewayConfig, provider: Option<AuthProvider>) -> Result<Self> {
        let mode = config.validate()?;

        let bridge = if config.mcp.enabled {
            Some(Arc::new(McpBridge::new()?))
        } else {
            None
        };

        let gateway = provider
            .map(|provider| {
                AuthGateway::new(provider, &config.context, &config.public_endpoints(mode))
                    .map_err(|e| CoreError::invalid("FASTGEOAPI_SKIP_ENDPOINTS", e.to_string()))
            })
            .transpose()?
            .map(|gateway| match &bridge {
                Some(bridge) => gateway.with_internal_bypass(bridge.key().clone()),
                None => gateway,
            })
            .map(Arc::new);

        let upstream_tokens = (config.mcp.enabled && config.mcp.verifier == McpVerifier::Layered)
            .then(|| Arc::new(MemoryUpstreamTokenStore::new()));

        let bearer = if config.mcp.enabled {
            bearer_guard(&config, upstream_tokens.as_ref())?
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            gateway,
            bearer,
            bridge,
            upstream_tokens,
        })
    }
}

fn jwks_client(config: &GatewayConfig) -> Result<Arc<JwksClient>> {
    JwksClient::new(config.jwks_cache_ttl())
        .map(Arc::new)
        .map_err(|e| CoreError::Internal(e.to_string()))
}

/// Bearer verification for the MCP mount, when a JWKS endpoint is configured.
fn bearer_guard(
    config: &GatewayConfig,
    upstream_tokens: Option<&Arc<MemoryUpstreamTokenStore>>,
) -> Result<Option<Arc<BearerGuard>>> {
    if config.auth.jwks_endpoint.is_none() {
        tracing::warn!("MCP enabled without OAUTH2_JWKS_ENDPOINT; the MCP mount is unauthenticated");
        return Ok(None);
    }

    let strategy = JwksAuthentication::with_fetcher(config.jwks_config()?, jwks_client(config)?);
    let client_id = config.mcp.client_id.clone().unwrap_or_default();

    let verifier: Arc<dyn TokenVerifier> = match upstream_tokens {
        Some(store) => Arc::new(LayeredTokenVerifier::new(
            strategy,
            Arc::clone(store),
            TrustingUpstreamTokenVerifier::new(client_id, config.mcp.scopes.clone()),
        )),
        None => Arc::new(ClaimsTokenVerifier::new(strategy, client_id)),
    };

    let guard = BearerGuard::new(verifier)
        .with_resource_metadata_url(config.mcp.resource_metadata_url())
        .with_required_scopes(config.mcp.scopes.clone());

    Ok(Some(Arc::new(guard)))
}
