//! Token verifiers for the MCP-facing bearer path.
//!
//! These return `Option<AccessToken>` rather than a `Result`: `None` means
//! "unauthenticated" and is turned into an RFC 6750 challenge by the caller.
//!
//! Opaque upstream tokens are only trusted behind an outer JWT. The
//! [`TrustingUpstreamTokenVerifier`] accepts an [`UpstreamToken`], which can
//! only be constructed inside this crate by [`LayeredTokenVerifier`] after the
//! outer JWT has been verified.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::Result;
use crate::jwks::JwksFetcher;
use crate::jwt::Claims;
use crate::strategy::JwksAuthentication;

/// A verified access token.
///
/// Two tokens are equal iff their `token` strings are equal.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The raw token as presented.
    pub token: String,
    /// The client the token was issued to.
    pub client_id: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Expiry as a Unix timestamp, if known.
    pub expires_at: Option<i64>,
}

impl AccessToken {
    /// Returns `true` if `scope` was granted.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl PartialEq for AccessToken {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for AccessToken {}

impl Hash for AccessToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

/// Verifies a bearer token presented on the MCP path.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`. `None` means the request is unauthenticated.
    async fn verify_token(&self, token: &str) -> Option<AccessToken>;
}

#[async_trait]
impl<T: TokenVerifier + ?Sized> TokenVerifier for Arc<T> {
    async fn verify_token(&self, token: &str) -> Option<AccessToken> {
        (**self).verify_token(token).await
    }
}

/// Full JWT verification producing claims.
#[async_trait]
pub trait JwtVerify: Send + Sync {
    /// Verify a JWT, including signature, expiry, audience and issuer.
    ///
    /// # Errors
    ///
    /// Any verification failure.
    async fn verify_jwt(&self, token: &str) -> Result<Claims>;
}

#[async_trait]
impl<F: JwksFetcher> JwtVerify for JwksAuthentication<F> {
    async fn verify_jwt(&self, token: &str) -> Result<Claims> {
        self.decode_token(token).await
    }
}

#[async_trait]
impl<T: JwtVerify + ?Sized> JwtVerify for Arc<T> {
    async fn verify_jwt(&self, token: &str) -> Result<Claims> {
        (**self).verify_jwt(token).await
    }
}

/// Verifies a JWT and projects its claims into an [`AccessToken`].
#[derive(Debug)]
pub struct ClaimsTokenVerifier<V> {
    verify: V,
    client_id: String,
}

impl<V: JwtVerify> ClaimsTokenVerifier<V> {
    /// `client_id` is used when the token names no client.
    pub fn new(verify: V, client_id: impl Into<String>) -> Self {
        Self {
            verify,
            client_id: client_id.into(),
        }
    }

    /// Build an [`AccessToken`] from verified claims.
    ///
    /// The client is `client_id`, then `azp`, then the configured id.
    #[must_use]
    pub fn project(&self, token: &str, claims: &Claims) -> AccessToken {
        let client_id = claims
            .client_id()
            .or_else(|| claims.azp())
            .unwrap_or(self.client_id.as_str())
            .to_string();

        AccessToken {
            token: token.to_string(),
            client_id,
            scopes: claims.scopes(),
            expires_at: claims.exp(),
        }
    }
}

#[async_trait]
impl<V: JwtVerify> TokenVerifier for ClaimsTokenVerifier<V> {
    async fn verify_token(&self, token: &str) -> Option<AccessToken> {
        match self.verify.verify_jwt(token).await {
            Ok(claims) => Some(self.project(token, &claims)),
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind(), "Token verification failed");
                None
            }
        }
    }
}

/// An opaque token recovered from behind a verified outer JWT.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamToken<'a>(&'a str);

impl<'a> UpstreamToken<'a> {
    pub(crate) fn new(token: &'a str) -> Option<Self> {
        (!token.is_empty()).then_some(Self(token))
    }

    /// The opaque token.
    #[must_use]
    pub const fn as_str(&self) -> &'a str {
        self.0
    }
}

/// Accepts any upstream token.
///
/// The upstream token was already validated during the OAuth code exchange;
/// expiry is governed by the outer JWT, so `expires_at` is always `None`.
#[derive(Debug, Clone)]
pub struct TrustingUpstreamTokenVerifier {
    client_id: String,
    scopes: Vec<String>,
}

impl TrustingUpstreamTokenVerifier {
    /// Tokens are attributed to `client_id` with `scopes`.
    pub fn new(client_id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scopes,
        }
    }

    /// Wrap the upstream token. Never fails.
    #[must_use]
    pub fn verify_token(&self, token: UpstreamToken<'_>) -> AccessToken {
        AccessToken {
            token: token.as_str().to_string(),
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            expires_at: None,
        }
    }
}

/// Maps an outer JWT's `jti` to the upstream token it wraps.
#[async_trait]
pub trait UpstreamTokenStore: Send + Sync {
    /// Look up the upstream token for `jti`.
    async fn upstream_token(&self, jti: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
struct StoredToken {
    token: String,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// In-memory [`UpstreamTokenStore`].
///
/// Entries recorded with an expiry stop resolving once it passes and are
/// dropped on the next write.
#[derive(Debug, Default)]
pub struct MemoryUpstreamTokenStore {
    tokens: RwLock<HashMap<String, StoredToken>>,
}

impl MemoryUpstreamTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the upstream token for `jti`, with no expiry of its own.
    pub fn insert(&self, jti: impl Into<String>, token: impl Into<String>) {
        self.record(jti.into(), token.into(), None);
    }

    /// Record the upstream token for `jti` until the Unix time `expires_at`.
    ///
    /// This is normally the `exp` of the outer JWT.
    pub fn insert_until(&self, jti: impl Into<String>, token: impl Into<String>, expires_at: i64) {
        self.record(jti.into(), token.into(), Some(expires_at));
    }

    fn record(&self, jti: String, token: String, expires_at: Option<i64>) {
        let now = Utc::now().timestamp();
        let mut tokens = self.tokens.write();
        tokens.retain(|_, stored| stored.live(now));
        tokens.insert(jti, StoredToken { token, expires_at });
    }

    /// Forget `jti`, returning its upstream token.
    pub fn remove(&self, jti: &str) -> Option<String> {
        self.tokens.write().remove(jti).map(|stored| stored.token)
    }

    /// Drop every expired entry, returning how many were dropped.
    pub fn prune_expired(&self) -> usize {
        self.prune_at(Utc::now().timestamp())
    }

    fn prune_at(&self, now: i64) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, stored| stored.live(now));
        before - tokens.len()
    }

    /// Number of entries held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[async_trait]
impl UpstreamTokenStore for MemoryUpstreamTokenStore {
    async fn upstream_token(&self, jti: &str) -> Option<String> {
        let now = Utc::now().timestamp();
        self.tokens
            .read()
            .get(jti)
            .filter(|stored| stored.live(now))
            .map(|stored| stored.token.clone())
    }
}

#[async_trait]
impl<T: UpstreamTokenStore + ?Sized> UpstreamTokenStore for Arc<T> {
    async fn upstream_token(&self, jti: &str) -> Option<String> {
        (**self).upstream_token(jti).await
    }
}

/// Verifies an outer JWT, then trusts the upstream token it refers to.
///
/// The resulting [`AccessToken`] carries the upstream token and takes its
/// expiry from the outer JWT.
#[derive(Debug)]
pub struct LayeredTokenVerifier<V, S> {
    outer: V,
    store: S,
    trusting: TrustingUpstreamTokenVerifier,
}

impl<V: JwtVerify, S: UpstreamTokenStore> LayeredTokenVerifier<V, S> {
    /// Compose an outer verifier, a token store and the trusting verifier.
    pub fn new(outer: V, store: S, trusting: TrustingUpstreamTokenVerifier) -> Self {
        Self {
            outer,
            store,
            trusting,
        }
    }
}

#[async_trait]
impl<V: JwtVerify, S: UpstreamTokenStore> TokenVerifier for LayeredTokenVerifier<V, S> {
    async fn verify_token(&self, token: &str) -> Option<AccessToken> {
        let claims = match self.outer.verify_jwt(token).await {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind(), "Outer token verification failed");
                return None;
            }
        };

        let Some(jti) = claims.jti() else {
            tracing::debug!("Outer token has no jti");
            return None;
        };

        let upstream = self.store.upstream_token(jti).await?;
        let upstream = UpstreamToken::new(&upstream)?;

        let mut access = self.trusting.verify_token(upstream);
        access.expires_at = claims.exp();
        Some(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::testing::{self, StaticJwks, TEST_AUDIENCE, TEST_ISSUER};
    use crate::JwksConfig;
    use serde_json::{json, Map, Value};
    use std::collections::HashSet;

    struct FixedClaims(Value);

    #[async_trait]
    impl JwtVerify for FixedClaims {
        async fn verify_jwt(&self, _token: &str) -> Result<Claims> {
            match &self.0 {
                Value::Object(map) => Ok(Claims::from(map.clone())),
                _ => Err(AuthError::DecodeFailure("not an object".into())),
            }
        }
    }

    fn claims_verifier(claims: Value) -> ClaimsTokenVerifier<FixedClaims> {
        ClaimsTokenVerifier::new(FixedClaims(claims), "configured-client")
    }

    fn jwks_strategy() -> JwksAuthentication<StaticJwks> {
        let config = JwksConfig::new(testing::TEST_JWKS_URI)
            .with_audience(TEST_AUDIENCE)
            .with_issuer(TEST_ISSUER);
        JwksAuthentication::with_fetcher(config, StaticJwks::signing())
    }

    #[test]
    fn access_token_identity_is_the_token_string() {
        let a = AccessToken {
            token: "t".into(),
            client_id: "a".into(),
            scopes: vec![],
            expires_at: None,
        };
        let b = AccessToken {
            token: "t".into(),
            client_id: "b".into(),
            scopes: vec!["read".into()],
            expires_at: Some(1),
        };
        assert_eq!(a, b);
        assert_eq!(HashSet::from([a, b]).len(), 1);
    }

    #[tokio::test]
    async fn projection_prefers_client_id_then_azp() {
        let verifier = claims_verifier(json!({
            "client_id": "cid", "azp": "azp", "scope": "read write", "exp": 1_900_000_000
        }));
        let token = verifier.verify_token("tok").await.unwrap();
        assert_eq!(token.client_id, "cid");
        assert_eq!(token.scopes, vec!["read", "write"]);
        assert_eq!(token.expires_at, Some(1_900_000_000));
        assert!(token.has_scope("write"));

        let verifier = claims_verifier(json!({"azp": "azp"}));
        assert_eq!(verifier.verify_token("tok").await.unwrap().client_id, "azp");

        let verifier = claims_verifier(json!({}));
        let token = verifier.verify_token("tok").await.unwrap();
        assert_eq!(token.client_id, "configured-client");
        assert!(token.scopes.is_empty());
        assert_eq!(token.expires_at, None);
    }

    #[tokio::test]
    async fn verification_failure_is_none() {
        let verifier = claims_verifier(Value::Null);
        assert!(verifier.verify_token("tok").await.is_none());
    }

    #[tokio::test]
    async fn jwks_backed_claims_verifier() {
        let verifier = ClaimsTokenVerifier::new(jwks_strategy(), "configured-client");

        let mut raw = testing::valid_claims();
        raw["scope"] = json!("mcp:tools");
        let token = testing::mint_token(&raw).unwrap();

        let access = verifier.verify_token(&token).await.unwrap();
        assert_eq!(access.token, token);
        assert!(access.has_scope("mcp:tools"));

        assert!(verifier.verify_token("garbage").await.is_none());
    }

    #[test]
    fn upstream_token_rejects_empty() {
        assert!(UpstreamToken::new("").is_none());
        assert_eq!(UpstreamToken::new("opaque").unwrap().as_str(), "opaque");
    }

    #[test]
    fn trusting_verifier_accepts_any_upstream_token() {
        let verifier = TrustingUpstreamTokenVerifier::new("client", vec!["read".into()]);
        for raw in ["gho_abc123", "x", "not a jwt at all"] {
            let token = verifier.verify_token(UpstreamToken::new(raw).unwrap());
            assert_eq!(token.token, raw);
            assert_eq!(token.client_id, "client");
            assert_eq!(token.scopes, vec!["read"]);
            assert_eq!(token.expires_at, None);
        }
    }

    #[tokio::test]
    async fn layered_verifier_resolves_upstream_token() {
        let store = Arc::new(MemoryUpstreamTokenStore::new());
        let raw = testing::valid_claims();
        let jti = raw["jti"].as_str().unwrap().to_string();
        store.insert(jti.clone(), "gho_upstream");

        let verifier = LayeredTokenVerifier::new(
            jwks_strategy(),
            Arc::clone(&store),
            TrustingUpstreamTokenVerifier::new("client", vec![]),
        );

        let outer = testing::mint_token(&raw).unwrap();
        let access = verifier.verify_token(&outer).await.unwrap();
        assert_eq!(access.token, "gho_upstream");
        assert_eq!(access.expires_at, raw["exp"].as_i64());

        assert!(verifier.verify_token("gho_upstream").await.is_none());

        store.remove(&jti);
        assert!(verifier.verify_token(&outer).await.is_none());
    }

    #[tokio::test]
    async fn expired_upstream_entries_stop_resolving() {
        let store = MemoryUpstreamTokenStore::new();
        let now = Utc::now().timestamp();
        store.insert_until("old", "gho_old", now - 1);
        store.insert_until("fresh", "gho_fresh", now + 3600);
        store.insert("forever", "gho_forever");

        assert_eq!(store.upstream_token("old").await, None);
        assert_eq!(store.upstream_token("fresh").await.as_deref(), Some("gho_fresh"));
        assert_eq!(store.upstream_token("forever").await.as_deref(), Some("gho_forever"));
    }

    #[test]
    fn writes_and_prune_drop_expired_entries() {
        let store = MemoryUpstreamTokenStore::new();
        let now = Utc::now().timestamp();
        store.insert_until("a", "1", now - 10);
        store.insert_until("b", "2", now - 10);
        assert_eq!(store.len(), 1, "second write dropped the first expired entry");

        store.insert_until("c", "3", now + 3600);
        assert_eq!(store.len(), 1);

        assert_eq!(store.prune_at(now + 7200), 1);
        assert!(store.is_empty());
        assert_eq!(store.prune_expired(), 0);
    }

    #[tokio::test]
    async fn layered_verifier_requires_jti_and_non_empty_upstream() {
        let store = MemoryUpstreamTokenStore::new();
        store.insert("empty", "");
        let mut no_jti = Map::new();
        no_jti.insert("sub".into(), json!("user"));

        let verifier = LayeredTokenVerifier::new(
            FixedClaims(Value::Object(no_jti)),
            store,
            TrustingUpstreamTokenVerifier::new("client", vec![]),
        );
        assert!(verifier.verify_token("outer").await.is_none());

        let store = MemoryUpstreamTokenStore::new();
        store.insert("empty", "");
        let verifier = LayeredTokenVerifier::new(
            FixedClaims(json!({"jti": "empty"})),
            store,
            TrustingUpstreamTokenVerifier::new("client", vec![]),
        );
        assert!(verifier.verify_token("outer").await.is_none());
    }
}
