//! Composition of strategies, accepted methods and injectables.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use regex::Regex;

use crate::jwt::Claims;
use crate::strategy::AuthenticationStrategy;

/// A credential type a provider is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// OpenID Connect ID token.
    IdToken,
    /// OAuth 2.0 access token.
    AccessToken,
}

impl AuthMethod {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdToken => "id_token",
            Self::AccessToken => "access_token",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile `pattern` so that it only matches at the start of the input.
///
/// # Errors
///
/// Returns the regex compile error.
pub fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})"))
}

/// A request enricher run after successful authentication.
///
/// The gateway writes each extracted value to a request header named by
/// [`Injectable::key`] before forwarding.
#[async_trait]
pub trait Injectable: Send + Sync {
    /// Header name the extracted values are written to.
    fn key(&self) -> &str;

    /// Paths this injectable ignores.
    fn skip_endpoints(&self) -> &[Regex] {
        &[]
    }

    /// Returns `true` unless `path` matches one of [`Injectable::skip_endpoints`].
    fn applies_to(&self, path: &str) -> bool {
        !self.skip_endpoints().iter().any(|re| re.is_match(path))
    }

    /// Values to inject for this request.
    async fn extract(&self, request: &Parts, claims: &Claims) -> Vec<String>;
}

/// Authentication configuration for the gateway.
///
/// Strategies are tried in insertion order; the first one that succeeds wins.
#[derive(Clone)]
pub struct AuthProvider {
    strategies: Vec<Arc<dyn AuthenticationStrategy>>,
    accepted_methods: Vec<AuthMethod>,
    injectables: Vec<Arc<dyn Injectable>>,
}

impl AuthProvider {
    /// A provider with no strategies that accepts ID and access tokens.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            accepted_methods: vec![AuthMethod::IdToken, AuthMethod::AccessToken],
            injectables: Vec::new(),
        }
    }

    /// Append a strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl AuthenticationStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Append an already shared strategy.
    #[must_use]
    pub fn with_shared_strategy(mut self, strategy: Arc<dyn AuthenticationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Replace the accepted-method allow-list.
    #[must_use]
    pub fn with_accepted_methods(mut self, methods: impl IntoIterator<Item = AuthMethod>) -> Self {
        self.accepted_methods = methods.into_iter().collect();
        self
    }

    /// Append an injectable.
    #[must_use]
    pub fn with_injectable(mut self, injectable: impl Injectable + 'static) -> Self {
        self.injectables.push(Arc::new(injectable));
        self
    }

    /// Configured strategies, in evaluation order.
    #[must_use]
    pub fn strategies(&self) -> &[Arc<dyn AuthenticationStrategy>] {
        &self.strategies
    }

    /// Accepted credential types.
    #[must_use]
    pub fn accepted_methods(&self) -> &[AuthMethod] {
        &self.accepted_methods
    }

    /// Configured injectables.
    #[must_use]
    pub fn injectables(&self) -> &[Arc<dyn Injectable>] {
        &self.injectables
    }
}

impl Default for AuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategies: Vec<_> = self.strategies.iter().map(|s| s.name()).collect();
        let injectables: Vec<_> = self.injectables.iter().map(|i| i.key()).collect();
        f.debug_struct("AuthProvider")
            .field("strategies", &strategies)
            .field("accepted_methods", &self.accepted_methods)
            .field("injectables", &injectables)
            .finish()
    }
}
