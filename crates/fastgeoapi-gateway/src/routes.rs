//! Router configuration.
//!
//! This module sets up the Axum router with all mounts and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use fastgeoapi_core::Result;

use crate::auth::authenticate;
use crate::bearer::require_bearer;
use crate::handlers::health;
use crate::handlers::internal::{self, UPSTREAM_TOKENS_PATH, UPSTREAM_TOKEN_PATH};
use crate::handlers::well_known::{self, MCP_PROTECTED_RESOURCE_PATH, PROTECTED_RESOURCE_PATH};
use crate::handlers::proxy::{self, Upstream};
use crate::state::GatewayState;

/// Path of the MCP mount.
pub const MCP_PATH: &str = "/mcp";

/// Create the gateway router.
///
/// # Mounts
///
/// - `GET /health` - Health check (public)
/// - `{context}/*` - `api`, behind the authentication gateway
/// - `/mcp/*` - `mcp`, behind the bearer guard when one is configured
/// - `GET /.well-known/oauth-protected-resource[/mcp]` - RFC 9728 metadata
///   for a guarded MCP mount with a known `APP_URI`
/// - `POST /internal/upstream-tokens`, `DELETE /internal/upstream-tokens/{jti}` -
///   upstream token registrations for the layered verifier (internal key only)
pub fn create_router(state: GatewayState, api: Router, mcp: Option<Router>) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;
    let context = state.config.context.clone();

    let api = match &state.gateway {
        Some(gateway) => api.layer(from_fn_with_state(Arc::clone(gateway), authenticate)),
        None => api,
    };

    let mut router = Router::new().route("/health", get(health::health));

    if let Some(mcp) = mcp {
        let mcp = match &state.bearer {
            Some(guard) => mcp.layer(from_fn_with_state(Arc::clone(guard), require_bearer)),
            None => mcp,
        };
        router = router.nest_service(MCP_PATH, mcp);

        if state.bearer.is_some() && state.config.mcp.app_uri.is_some() {
            router = router
                .route(PROTECTED_RESOURCE_PATH, get(well_known::protected_resource))
                .route(MCP_PROTECTED_RESOURCE_PATH, get(well_known::protected_resource));
        }
    }

    if let (Some(bridge), Some(_)) = (&state.bridge, &state.upstream_tokens) {
        let registrations = Router::new()
            .route(UPSTREAM_TOKENS_PATH, post(internal::record_upstream_token))
            .route(UPSTREAM_TOKEN_PATH, delete(internal::forget_upstream_token))
            .route_layer(from_fn_with_state(
                Arc::clone(bridge),
                internal::require_internal_key,
            ));
        router = router.merge(registrations);
    }

    router = if context.is_empty() {
        router.fallback_service(api)
    } else {
        router.nest_service(&context, api)
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(Arc::new(state))
}

/// Router that forwards everything to `upstream`.
#[must_use]
pub fn proxy_router(upstream: Upstream) -> Router {
    Router::new()
        .fallback(proxy::forward)
        .with_state(Arc::new(upstream))
}

/// Build the full application from configuration.
///
/// The API mount forwards to `PYGEOAPI_BASEURL`; the MCP mount, when enabled,
/// forwards to `MCP_UPSTREAM_URL` and presents the internal key upstream.
///
/// # Errors
///
/// Fails on configuration errors or if an HTTP client cannot be created.
pub fn build_app(state: GatewayState) -> Result<Router> {
    let config = &state.config;
    let timeout = config.request_timeout();

    let api = match &config.upstream_url {
        Some(url) => proxy_router(Upstream::new(url.clone(), timeout, config.max_body_bytes)?),
        None => {
            tracing::warn!("PYGEOAPI_BASEURL not set; the API mount has no upstream");
            Router::new()
        }
    };

    let mcp = match (&config.mcp.upstream_url, &state.bridge) {
        (Some(url), Some(bridge)) => Some(proxy_router(
            Upstream::new(url.clone(), timeout, config.max_body_bytes)?
                .with_bridge(Arc::clone(bridge)),
        )),
        _ => None,
    };

    Ok(create_router(state, api, mcp))
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
