//! Bearer-token authentication for fastgeoapi.
//!
//! This crate holds everything between an inbound `Authorization` header and a
//! verified set of claims:
//!
//! - JWKS fetching with an optional TTL cache
//! - JWT validation with key-set driven algorithm selection
//! - Pluggable authentication strategies (JWKS bearer tokens, API keys)
//! - Token verifiers for the MCP-facing path
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌────────────────────────┐
//! │   Gateway        │────▶│  AuthProvider          │
//! │   (HTTP)         │     │  strategies, in order  │
//! └──────────────────┘     └───────────┬────────────┘
//!                                      │
//!                          ┌───────────▼────────────┐
//!                          │  JwksAuthentication    │
//!                          └─────┬────────────┬─────┘
//!                                │            │
//!                   ┌────────────▼───┐  ┌─────▼──────────┐
//!                   │  JwksClient    │  │ TokenValidator │
//!                   └────────┬───────┘  └────────────────┘
//!                            │ HTTPS
//!                   ┌────────▼───────┐
//!                   │  IdP JWKS      │
//!                   └────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fastgeoapi_auth::{JwksAuthentication, JwksConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = JwksConfig::new("https://idp.example.com/.well-known/jwks.json")
//!     .with_audience("https://api.example.com")
//!     .with_issuer("https://idp.example.com");
//!
//! let strategy = JwksAuthentication::new(config)?;
//!
//! let token = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9...";
//! let claims = strategy.decode_token(token).await?;
//!
//! println!("Subject: {:?}", claims.sub());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod jwks;
pub mod jwt;
pub mod provider;
pub mod strategy;
pub mod verifier;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{AuthError, Result};
pub use jwks::{JwksClient, JwksFetcher, JsonWebKey, KeySet};
pub use jwt::{Claims, TokenValidator};
pub use provider::{anchored, AuthMethod, AuthProvider, Injectable};
pub use strategy::{
    bearer_token, ApiKeyAuthentication, AuthOutcome, AuthenticationStrategy, JwksAuthentication,
};
pub use verifier::{
    AccessToken, ClaimsTokenVerifier, JwtVerify, LayeredTokenVerifier, MemoryUpstreamTokenStore,
    TokenVerifier, TrustingUpstreamTokenVerifier, UpstreamToken, UpstreamTokenStore,
};

/// Where to fetch signing keys and which claims to enforce.
///
/// An unset audience or issuer disables that check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwksConfig {
    /// JWKS endpoint.
    pub jwks_uri: String,
    /// Required member of the `aud` claim.
    pub expected_audience: Option<String>,
    /// Required value of the `iss` claim.
    pub expected_issuer: Option<String>,
}

impl JwksConfig {
    /// Configuration with no audience or issuer checks.
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            expected_audience: None,
            expected_issuer: None,
        }
    }

    /// Require `audience` in the `aud` claim.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Require `iss` to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }
}
