//! JWKS (JSON Web Key Set) fetching and optional caching.
//!
//! By default every call to [`JwksFetcher::fetch`] performs one outbound GET.
//! A [`JwksClient`] built with a TTL keeps an immutable snapshot per URI and
//! refetches once the snapshot is older than the TTL. The cache lock is never
//! held across the network call, so concurrent refetches may race; the last
//! writer wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::Jwk;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AuthError, Result};

/// Connect timeout for JWKS requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for JWKS requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A single key from a JWKS document.
#[derive(Debug, Clone)]
pub struct JsonWebKey {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Advertised algorithm, if any.
    pub alg: Option<String>,
    /// Key ID.
    pub kid: Option<String>,
    /// Key use (e.g., "sig").
    pub key_use: Option<String>,
    /// The parsed key material.
    pub jwk: Jwk,
}

/// An ordered collection of keys fetched from a JWKS endpoint.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<JsonWebKey>,
}

/// JWKS document shape; keys stay raw until each is parsed on its own.
#[derive(Debug, Deserialize)]
struct RawKeySet {
    keys: Vec<Value>,
}

impl KeySet {
    /// Parse a JWKS document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ParseFailure`] if the body is not JSON, has no
    /// `keys` array, or any key is not a valid JWK.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let raw: RawKeySet =
            serde_json::from_slice(body).map_err(|e| AuthError::ParseFailure(e.to_string()))?;

        let keys = raw
            .keys
            .into_iter()
            .map(Self::parse_key)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { keys })
    }

    /// Parse a JWKS document that is already a JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`KeySet::from_slice`].
    pub fn from_value(document: &Value) -> Result<Self> {
        let body =
            serde_json::to_vec(document).map_err(|e| AuthError::ParseFailure(e.to_string()))?;
        Self::from_slice(&body)
    }

    fn parse_key(value: Value) -> Result<JsonWebKey> {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);

        let kty = field("kty")
            .ok_or_else(|| AuthError::ParseFailure("key without kty".to_string()))?;
        let alg = field("alg");
        let kid = field("kid");
        let key_use = field("use");

        let jwk: Jwk = serde_json::from_value(value)
            .map_err(|e| AuthError::ParseFailure(format!("invalid {kty} key: {e}")))?;

        Ok(JsonWebKey {
            kty,
            alg,
            kid,
            key_use,
            jwk,
        })
    }

    /// All keys, in document order.
    #[must_use]
    pub fn keys(&self) -> &[JsonWebKey] {
        &self.keys
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The distinct, non-null `alg` values across all keys, in first-seen order.
    #[must_use]
    pub fn algorithms(&self) -> Vec<&str> {
        let mut algorithms: Vec<&str> = Vec::new();
        for alg in self.keys.iter().filter_map(|k| k.alg.as_deref()) {
            if !algorithms.contains(&alg) {
                algorithms.push(alg);
            }
        }
        algorithms
    }

    /// Keys that may have signed a token with the given header `kid`.
    ///
    /// With a `kid`, only keys carrying that exact `kid` qualify. Without one,
    /// every key qualifies.
    pub fn candidates<'a>(&'a self, kid: Option<&'a str>) -> impl Iterator<Item = &'a JsonWebKey> {
        self.keys
            .iter()
            .filter(move |key| match kid {
                Some(kid) => key.kid.as_deref() == Some(kid),
                None => true,
            })
    }
}

/// Something that can produce the key set published at a URI.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch the key set at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkFailure`] on transport failure or non-2xx
    /// status, [`AuthError::ParseFailure`] on a malformed document.
    async fn fetch(&self, uri: &str) -> Result<Arc<KeySet>>;
}

#[async_trait]
impl<T: JwksFetcher + ?Sized> JwksFetcher for Arc<T> {
    async fn fetch(&self, uri: &str) -> Result<Arc<KeySet>> {
        (**self).fetch(uri).await
    }
}

/// Cached key set with its fetch time.
struct CachedKeySet {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

/// HTTP JWKS client.
pub struct JwksClient {
    client: reqwest::Client,
    cache_ttl: Option<Duration>,
    cache: RwLock<HashMap<String, CachedKeySet>>,
}

impl JwksClient {
    /// Create a client. `cache_ttl` of `None` fetches on every call.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(cache_ttl: Option<Duration>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::NetworkFailure(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, cache_ttl))
    }

    /// Create a client around an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, cache_ttl: Option<Duration>) -> Self {
        Self {
            client,
            cache_ttl: cache_ttl.filter(|ttl| !ttl.is_zero()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The configured cache TTL, if caching is enabled.
    #[must_use]
    pub const fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    fn cached(&self, uri: &str, ttl: Duration) -> Option<Arc<KeySet>> {
        let cache = self.cache.read();
        cache
            .get(uri)
            .filter(|entry| entry.fetched_at.elapsed() < ttl)
            .map(|entry| Arc::clone(&entry.keys))
    }

    async fn fetch_uncached(&self, uri: &str) -> Result<KeySet> {
        tracing::info!(url = %uri, "Fetching JSON Web Key Set");

        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::NetworkFailure(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))?;

        let keys = KeySet::from_slice(&body)?;
        tracing::debug!(count = keys.len(), algorithms = ?keys.algorithms(), "Parsed JWKS");
        Ok(keys)
    }
}

#[async_trait]
impl JwksFetcher for JwksClient {
    async fn fetch(&self, uri: &str) -> Result<Arc<KeySet>> {
        let Some(ttl) = self.cache_ttl else {
            return self.fetch_uncached(uri).await.map(Arc::new);
        };

        if let Some(keys) = self.cached(uri, ttl) {
            return Ok(keys);
        }

        let keys = Arc::new(self.fetch_uncached(uri).await?);
        self.cache.write().insert(
            uri.to_string(),
            CachedKeySet {
                keys: Arc::clone(&keys),
                fetched_at: Instant::now(),
            },
        );
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parse_rsa_key_set() {
        let keys = KeySet::from_value(&testing::signing_jwks()).unwrap();
        assert_eq!(keys.len(), 1);
        let key = &keys.keys()[0];
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        assert_eq!(key.kid.as_deref(), Some(testing::TEST_KID));
        assert_eq!(key.key_use.as_deref(), Some("sig"));
    }

    #[test]
    fn algorithms_are_distinct_and_skip_missing() {
        let doc = testing::jwks_document(vec![
            testing::rsa_jwk(testing::SIGNING_KEY_N, Some("RS256"), Some("a")),
            testing::rsa_jwk(testing::FOREIGN_KEY_N, None, Some("b")),
            testing::rsa_jwk(testing::FOREIGN_KEY_N, Some("RS256"), Some("c")),
        ]);
        let keys = KeySet::from_value(&doc).unwrap();
        assert_eq!(keys.algorithms(), vec!["RS256"]);
    }

    #[test]
    fn candidates_filter_by_kid() {
        let doc = testing::jwks_document(vec![
            testing::rsa_jwk(testing::SIGNING_KEY_N, Some("RS256"), Some("a")),
            testing::rsa_jwk(testing::FOREIGN_KEY_N, Some("RS256"), Some("b")),
        ]);
        let keys = KeySet::from_value(&doc).unwrap();
        assert_eq!(keys.candidates(Some("b")).count(), 1);
        assert_eq!(keys.candidates(Some("zzz")).count(), 0);
        assert_eq!(keys.candidates(None).count(), 2);
    }

    #[test]
    fn reject_non_jwks_documents() {
        assert!(matches!(
            KeySet::from_slice(b"not json"),
            Err(AuthError::ParseFailure(_))
        ));
        assert!(matches!(
            KeySet::from_value(&json!({"issuer": "x"})),
            Err(AuthError::ParseFailure(_))
        ));
        assert!(matches!(
            KeySet::from_value(&json!({"keys": [{"alg": "RS256"}]})),
            Err(AuthError::ParseFailure(_))
        ));
    }

    #[tokio::test]
    async fn fetch_without_cache_hits_endpoint_every_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(testing::signing_jwks()))
            .expect(2)
            .mount(&server)
            .await;

        let client = JwksClient::new(None).unwrap();
        let uri = format!("{}/.well-known/jwks.json", server.uri());
        client.fetch(&uri).await.unwrap();
        client.fetch(&uri).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_with_cache_reuses_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(testing::signing_jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let client = JwksClient::new(Some(Duration::from_secs(300))).unwrap();
        let uri = format!("{}/.well-known/jwks.json", server.uri());
        let first = client.fetch(&uri).await.unwrap();
        let second = client.fetch(&uri).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(testing::signing_jwks()))
            .expect(2)
            .mount(&server)
            .await;

        let client = JwksClient::new(Some(Duration::from_millis(50))).unwrap();
        let uri = format!("{}/.well-known/jwks.json", server.uri());
        client.fetch(&uri).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        client.fetch(&uri).await.unwrap();
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let client = JwksClient::new(Some(Duration::ZERO)).unwrap();
        assert!(client.cache_ttl().is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = JwksClient::new(None).unwrap();
        let result = client.fetch(&format!("{}/jwks", server.uri())).await;
        assert!(matches!(result, Err(AuthError::NetworkFailure(_))));
    }

    #[tokio::test]
    async fn malformed_body_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = JwksClient::new(None).unwrap();
        let result = client.fetch(&format!("{}/jwks", server.uri())).await;
        assert!(matches!(result, Err(AuthError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_failure() {
        let client = JwksClient::new(None).unwrap();
        let result = client.fetch("http://127.0.0.1:9/jwks").await;
        assert!(matches!(result, Err(AuthError::NetworkFailure(_))));
    }
}
