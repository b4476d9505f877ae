//! Authentication gateway middleware and extractors.
//!
//! Every request to the mounted API passes through [`authenticate`], which
//! walks a fixed sequence:
//!
//! 1. `OPTIONS` requests and allow-listed paths are forwarded untouched.
//! 2. With the internal bypass enabled, a request carrying the exact internal
//!    key is forwarded untouched. The source address plays no part.
//! 3. Strategies run in order. The first to authenticate wins; a redirect is
//!    sent straight to the client.
//! 4. Otherwise the request is rejected with `401 {"message":"Unauthenticated"}`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, OriginalUri, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use regex::Regex;

use fastgeoapi_auth::{anchored, AuthOutcome, AuthProvider, Claims};
use fastgeoapi_core::SharedSecret;

use crate::error::ApiError;
use crate::mcp::INTERNAL_KEY_HEADER;

/// The authenticated caller, available to handlers behind the gateway.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Claims produced by the winning strategy.
    pub claims: Claims,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

/// What the gateway decided for a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Allow-listed path or `OPTIONS`; no authentication.
    Skip,
    /// Correct internal key; no authentication.
    InternalBypass,
    /// A strategy authenticated the request.
    Authenticated(Claims),
    /// A strategy asked for a redirect.
    Redirect(String),
    /// No strategy authenticated the request.
    Rejected,
}

/// Gate in front of the mounted API.
#[derive(Debug)]
pub struct AuthGateway {
    provider: AuthProvider,
    skip: Vec<Regex>,
    bypass: Option<SharedSecret>,
}

impl AuthGateway {
    /// Build a gateway whose allow-list is `patterns` under `context`.
    ///
    /// Each pattern is prefixed with the escaped context and anchored at the
    /// start of the path.
    ///
    /// # Errors
    ///
    /// Returns the compile error of the first invalid pattern.
    pub fn new<I, P>(provider: AuthProvider, context: &str, patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let context = regex::escape(context);
        let skip = patterns
            .into_iter()
            .map(|p| anchored(&format!("{context}{}", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            provider,
            skip,
            bypass: None,
        })
    }

    /// Enable the internal bypass with `key`.
    ///
    /// Without this call the internal key header is never examined.
    #[must_use]
    pub fn with_internal_bypass(mut self, key: SharedSecret) -> Self {
        self.bypass = Some(key);
        self
    }

    /// Returns `true` if the internal bypass is enabled.
    #[must_use]
    pub const fn bypass_enabled(&self) -> bool {
        self.bypass.is_some()
    }

    fn is_skipped(&self, method: &Method, path: &str) -> bool {
        method == Method::OPTIONS || self.skip.iter().any(|re| re.is_match(path))
    }

    fn is_internal(&self, parts: &Parts) -> bool {
        let Some(key) = &self.bypass else {
            return false;
        };
        parts
            .headers
            .get(INTERNAL_KEY_HEADER)
            .is_some_and(|presented| key.matches(presented.as_bytes()))
    }

    /// Decide what to do with a request.
    pub async fn decide(&self, parts: &Parts) -> Decision {
        let path = request_path(parts);

        if self.is_skipped(&parts.method, path) {
            tracing::trace!(%path, "Skipping authentication");
            return Decision::Skip;
        }

        if self.is_internal(parts) {
            tracing::debug!(%path, "Internal request bypassed authentication");
            return Decision::InternalBypass;
        }

        let accepted = self.provider.accepted_methods();
        for strategy in self.provider.strategies() {
            match strategy.authenticate(parts, accepted).await {
                Ok(AuthOutcome::Authenticated(claims)) => return Decision::Authenticated(claims),
                Ok(AuthOutcome::Redirect(location)) => return Decision::Redirect(location),
                Err(e) => {
                    if e.is_upstream() {
                        tracing::error!(strategy = strategy.name(), error = %e, "Authentication backend failed");
                    } else {
                        tracing::debug!(strategy = strategy.name(), kind = e.kind(), error = %e, "Strategy rejected request");
                    }
                }
            }
        }

        tracing::warn!(%path, method = %parts.method, "Unauthenticated request");
        Decision::Rejected
    }

    /// Write injectable values into request headers.
    async fn inject(&self, parts: &mut Parts, claims: &Claims) {
        let path = request_path(parts).to_string();

        for injectable in self.provider.injectables() {
            if !injectable.applies_to(&path) {
                continue;
            }

            let values = injectable.extract(parts, claims).await;
            if values.is_empty() {
                continue;
            }

            let name = HeaderName::try_from(injectable.key());
            let value = HeaderValue::try_from(values.join(","));
            match (name, value) {
                (Ok(name), Ok(value)) => {
                    parts.headers.insert(name, value);
                }
                _ => tracing::warn!(key = injectable.key(), "Injectable produced an invalid header"),
            }
        }
    }
}

/// The full request path, before any nesting stripped a prefix.
fn request_path(parts: &Parts) -> &str {
    parts
        .extensions
        .get::<OriginalUri>()
        .map_or_else(|| parts.uri.path(), |uri| uri.0.path())
}

/// Authentication middleware for the mounted API.
pub async fn authenticate(
    State(gateway): State<Arc<AuthGateway>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    match gateway.decide(&parts).await {
        Decision::Skip | Decision::InternalBypass => {
            next.run(Request::from_parts(parts, body)).await
        }
        Decision::Authenticated(claims) => {
            gateway.inject(&mut parts, &claims).await;
            parts.extensions.insert(AuthUser { claims });
            next.run(Request::from_parts(parts, body)).await
        }
        Decision::Redirect(location) => Redirect::temporary(&location).into_response(),
        Decision::Rejected => ApiError::Unauthenticated.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::ConnectInfo;
    use axum::http::Request as HttpRequest;
    use fastgeoapi_auth::{
        ApiKeyAuthentication, AuthError, AuthMethod, AuthenticationStrategy, Injectable,
    };
    use serde_json::Map;

    use crate::config::DEFAULT_SKIP_ENDPOINTS;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl AuthenticationStrategy for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn authenticate(&self, _: &Parts, _: &[AuthMethod]) -> fastgeoapi_auth::Result<AuthOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::MissingToken)
        }
    }

    struct Fixed(AuthOutcome);

    #[async_trait]
    impl AuthenticationStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn authenticate(&self, _: &Parts, _: &[AuthMethod]) -> fastgeoapi_auth::Result<AuthOutcome> {
            Ok(self.0.clone())
        }
    }

    struct Sub;

    #[async_trait]
    impl Injectable for Sub {
        fn key(&self) -> &str {
            "x-user-sub"
        }

        async fn extract(&self, _: &Parts, claims: &Claims) -> Vec<String> {
            claims.sub().map(str::to_string).into_iter().collect()
        }
    }

    fn claims(sub: &str) -> Claims {
        let mut map = Map::new();
        map.insert("sub".into(), sub.into());
        Claims::from(map)
    }

    fn parts(method: Method, path: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = HttpRequest::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn gateway(provider: AuthProvider) -> AuthGateway {
        AuthGateway::new(provider, "/geoapi", DEFAULT_SKIP_ENDPOINTS).unwrap()
    }

    #[tokio::test]
    async fn allow_listed_paths_skip_everything() {
        let counting = Arc::new(Counting::default());
        let key = SharedSecret::generate();
        let gateway = gateway(
            AuthProvider::new().with_shared_strategy(Arc::clone(&counting) as Arc<dyn AuthenticationStrategy>),
        )
        .with_internal_bypass(key.clone());

        for path in [
            "/geoapi/openapi",
            "/geoapi/openapi?f=json",
            "/geoapi/openapi.json",
            "/geoapi/docs",
            "/geoapi/docs/oauth2-redirect",
            "/geoapi/redoc",
        ] {
            let request = parts(Method::GET, path, &[(INTERNAL_KEY_HEADER, key.expose())]);
            assert_eq!(gateway.decide(&request).await, Decision::Skip, "{path}");
        }
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skip_patterns_are_anchored_to_context() {
        let gateway = gateway(AuthProvider::new());
        for path in ["/geoapi/collections", "/other/geoapi/docs", "/docs", "/geoapixopenapi"] {
            let request = parts(Method::GET, path, &[]);
            assert_eq!(gateway.decide(&request).await, Decision::Rejected, "{path}");
        }
    }

    #[tokio::test]
    async fn options_is_always_forwarded() {
        let gateway = gateway(AuthProvider::new());
        let request = parts(Method::OPTIONS, "/geoapi/collections", &[]);
        assert_eq!(gateway.decide(&request).await, Decision::Skip);
    }

    #[tokio::test]
    async fn internal_bypass_iff_enabled_and_key_correct() {
        let key = SharedSecret::generate();
        let wrong = SharedSecret::generate();

        for enabled in [false, true] {
            for correct in [false, true] {
                for source in ["127.0.0.1:40000", "10.0.3.17:40000", "203.0.113.9:443"] {
                    let mut gateway = gateway(
                        AuthProvider::new()
                            .with_strategy(ApiKeyAuthentication::new(SharedSecret::generate())),
                    );
                    if enabled {
                        gateway = gateway.with_internal_bypass(key.clone());
                    }

                    let presented = if correct { key.expose() } else { wrong.expose() };
                    let mut request = parts(
                        Method::GET,
                        "/geoapi/collections",
                        &[(INTERNAL_KEY_HEADER, presented)],
                    );
                    let addr: SocketAddr = source.parse().unwrap();
                    request.extensions.insert(ConnectInfo(addr));

                    let expected = if enabled && correct {
                        Decision::InternalBypass
                    } else {
                        Decision::Rejected
                    };
                    assert_eq!(
                        gateway.decide(&request).await,
                        expected,
                        "enabled={enabled} correct={correct} source={source}"
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn internal_key_requires_exact_match() {
        let key = SharedSecret::new("Internal-Key-0123456789").unwrap();
        let gateway = gateway(AuthProvider::new()).with_internal_bypass(key);

        for presented in [
            "internal-key-0123456789",
            "Internal-Key-012345678",
            "Internal-Key-0123456789x",
            " Internal-Key-0123456789",
            "Internal",
            "",
        ] {
            let request = parts(
                Method::GET,
                "/geoapi/collections",
                &[(INTERNAL_KEY_HEADER, presented)],
            );
            assert_eq!(gateway.decide(&request).await, Decision::Rejected, "{presented:?}");
        }

        let request = parts(
            Method::GET,
            "/geoapi/collections",
            &[(INTERNAL_KEY_HEADER, "Internal-Key-0123456789")],
        );
        assert_eq!(gateway.decide(&request).await, Decision::InternalBypass);
    }

    #[tokio::test]
    async fn first_successful_strategy_wins() {
        let counting = Arc::new(Counting::default());
        let gateway = gateway(
            AuthProvider::new()
                .with_shared_strategy(Arc::clone(&counting) as Arc<dyn AuthenticationStrategy>)
                .with_strategy(Fixed(AuthOutcome::Authenticated(claims("alice"))))
                .with_strategy(Fixed(AuthOutcome::Authenticated(claims("bob")))),
        );

        let request = parts(Method::GET, "/geoapi/collections", &[]);
        assert_eq!(
            gateway.decide(&request).await,
            Decision::Authenticated(claims("alice"))
        );
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirect_short_circuits() {
        let counting = Arc::new(Counting::default());
        let gateway = gateway(
            AuthProvider::new()
                .with_strategy(Fixed(AuthOutcome::Redirect("https://login.example.com".into())))
                .with_shared_strategy(Arc::clone(&counting) as Arc<dyn AuthenticationStrategy>),
        );

        let request = parts(Method::GET, "/geoapi/collections", &[]);
        assert_eq!(
            gateway.decide(&request).await,
            Decision::Redirect("https://login.example.com".into())
        );
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn injectables_write_headers() {
        let gateway = gateway(AuthProvider::new().with_injectable(Sub));
        let mut request = parts(
            Method::GET,
            "/geoapi/collections",
            &[("x-user-sub", "spoofed")],
        );

        gateway.inject(&mut request, &claims("alice")).await;
        assert_eq!(request.headers["x-user-sub"], "alice");
    }

    #[test]
    fn invalid_skip_pattern_is_an_error() {
        assert!(AuthGateway::new(AuthProvider::new(), "/geoapi", ["/docs("]).is_err());
    }
}
