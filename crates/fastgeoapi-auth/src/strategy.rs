//! Authentication strategies.
//!
//! A strategy looks at the request head and either produces [`Claims`],
//! asks the gateway to redirect the client, or fails with an [`AuthError`].

use std::sync::Arc;

use async_trait::async_trait;
use fastgeoapi_core::SharedSecret;
use http::header::{HeaderName, AUTHORIZATION};
use http::request::Parts;
use http::HeaderMap;
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::jwks::{JwksClient, JwksFetcher, KeySet};
use crate::jwt::{Claims, TokenValidator};
use crate::provider::AuthMethod;
use crate::JwksConfig;

/// Default header carrying an API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Result of a successful strategy run.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// The request is authenticated.
    Authenticated(Claims),
    /// The client must be sent elsewhere (e.g., to a login page).
    Redirect(String),
}

/// A way of authenticating a request.
#[async_trait]
pub trait AuthenticationStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Authenticate a request.
    ///
    /// `accepted` is the provider's allow-list of credential types.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] describing why the request is not authenticated.
    async fn authenticate(&self, request: &Parts, accepted: &[AuthMethod]) -> Result<AuthOutcome>;
}

#[async_trait]
impl<T: AuthenticationStrategy + ?Sized> AuthenticationStrategy for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn authenticate(&self, request: &Parts, accepted: &[AuthMethod]) -> Result<AuthOutcome> {
        (**self).authenticate(request, accepted).await
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Any other scheme, an empty token
/// or a non-ASCII header value yields `None`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Bearer-token authentication against a remote JWKS.
pub struct JwksAuthentication<F = JwksClient> {
    config: JwksConfig,
    fetcher: F,
    validator: TokenValidator,
}

impl JwksAuthentication<JwksClient> {
    /// Create a strategy that fetches keys on every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: JwksConfig) -> Result<Self> {
        Ok(Self::with_fetcher(config, JwksClient::new(None)?))
    }
}

impl<F: JwksFetcher> JwksAuthentication<F> {
    /// Create a strategy around a specific key fetcher.
    pub fn with_fetcher(config: JwksConfig, fetcher: F) -> Self {
        Self {
            config,
            fetcher,
            validator: TokenValidator::new(),
        }
    }

    /// Replace the token validator (e.g., to allow clock leeway).
    #[must_use]
    pub fn with_validator(mut self, validator: TokenValidator) -> Self {
        self.validator = validator;
        self
    }

    /// The JWKS configuration.
    pub const fn config(&self) -> &JwksConfig {
        &self.config
    }

    /// Fetch the key set from the configured URI.
    ///
    /// # Errors
    ///
    /// Propagates [`AuthError::NetworkFailure`] and [`AuthError::ParseFailure`].
    pub async fn get_jwks(&self) -> Result<Arc<KeySet>> {
        self.fetcher.fetch(&self.config.jwks_uri).await
    }

    /// Fetch the key set and validate `token` against it.
    ///
    /// # Errors
    ///
    /// Any fetch or validation failure.
    pub async fn decode_token(&self, token: &str) -> Result<Claims> {
        let keys = self.get_jwks().await?;
        self.validator.decode(token, &keys, &self.config)
    }
}

impl<F> std::fmt::Debug for JwksAuthentication<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksAuthentication")
            .field("config", &self.config)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F: JwksFetcher> AuthenticationStrategy for JwksAuthentication<F> {
    fn name(&self) -> &'static str {
        "jwks"
    }

    async fn authenticate(&self, request: &Parts, accepted: &[AuthMethod]) -> Result<AuthOutcome> {
        if !accepted.contains(&AuthMethod::AccessToken) {
            return Err(AuthError::MethodNotAccepted(
                AuthMethod::AccessToken.as_str().to_string(),
            ));
        }

        let token = bearer_token(&request.headers).ok_or(AuthError::MissingToken)?;
        let claims = self.decode_token(token).await?;

        tracing::debug!(sub = ?claims.sub(), "Bearer token validated");
        Ok(AuthOutcome::Authenticated(claims))
    }
}

/// Static API key authentication.
///
/// The key is compared in constant time. A matching request gets a fixed
/// `api-key` identity.
#[derive(Debug)]
pub struct ApiKeyAuthentication {
    header: HeaderName,
    key: SharedSecret,
}

impl ApiKeyAuthentication {
    /// Accept `key` in the [`API_KEY_HEADER`] header.
    #[must_use]
    pub fn new(key: SharedSecret) -> Self {
        Self {
            header: HeaderName::from_static(API_KEY_HEADER),
            key,
        }
    }

    /// Read the key from a different header.
    #[must_use]
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    fn identity() -> Claims {
        let mut claims = Map::new();
        claims.insert("sub".into(), Value::from("api-key"));
        claims.insert("client_id".into(), Value::from("api-key"));
        Claims::from(claims)
    }
}

#[async_trait]
impl AuthenticationStrategy for ApiKeyAuthentication {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn authenticate(&self, request: &Parts, _accepted: &[AuthMethod]) -> Result<AuthOutcome> {
        let presented = request
            .headers
            .get(&self.header)
            .ok_or(AuthError::MissingToken)?;

        if self.key.matches(presented.as_bytes()) {
            Ok(AuthOutcome::Authenticated(Self::identity()))
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }
}
