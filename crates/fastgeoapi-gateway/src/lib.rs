//! Authenticating HTTP gateway for fastgeoapi.
//!
//! The gateway mounts a pygeoapi backend under a context path and, optionally,
//! an MCP tool server under `/mcp`. It handles:
//!
//! - Authentication of the mounted API (JWKS bearer tokens or an API key)
//! - An internal-key bypass so the MCP tool server can call back into the API
//! - RFC 6750 bearer challenges on the MCP mount, with RFC 9728 resource metadata
//! - Upstream token registrations from the tool server for the layered verifier
//! - Forwarding to the upstream services
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Clients                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    fastgeoapi-gateway                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │ AuthGateway │ │ BearerGuard │ │   Upstream proxy    │    │
//! │  │ ({context}) │ │   (/mcp)    │ │                     │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │ pygeoapi │   │ IdP JWKS │   │   MCP    │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fastgeoapi_gateway::{build_app, GatewayConfig, GatewayState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env()?;
//! let listen_addr = config.listen_addr();
//!
//! let state = GatewayState::from_config(config)?;
//! let app = build_app(state)?;
//!
//! let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod bearer;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mcp;
pub mod routes;
pub mod state;

pub use auth::{AuthGateway, AuthUser, Decision};
pub use bearer::{BearerChallenge, BearerGuard};
pub use config::{AuthMode, GatewayConfig, McpVerifier};
pub use error::ApiError;
pub use mcp::{McpBridge, INTERNAL_KEY_HEADER};
pub use routes::{build_app, create_router};
pub use state::GatewayState;
