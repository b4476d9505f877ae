//! RFC 6750 bearer challenges for the MCP mount.
//!
//! A request that sends no bearer credential gets a challenge without an
//! `error` parameter. Only a credential that was sent and failed verification
//! gets `error="invalid_token"`; OAuth clients discard their stored
//! registration on that error, so it must never answer a first, token-less
//! request.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use fastgeoapi_auth::{bearer_token, AccessToken, TokenVerifier};

const MISSING_DESCRIPTION: &str =
    "Authentication required. Please authenticate to access this resource.";
const INVALID_DESCRIPTION: &str = "The provided bearer token is invalid, expired, or revoked.";

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerChallenge {
    /// No bearer credential was sent.
    Missing,
    /// A credential was sent but did not verify.
    InvalidToken,
    /// The token lacks required scopes.
    InsufficientScope(Vec<String>),
}

#[derive(Debug, Serialize)]
struct ChallengeBody {
    error: &'static str,
    error_description: String,
}

/// Verifies bearer tokens and renders RFC 6750 challenges.
pub struct BearerGuard {
    verifier: Arc<dyn TokenVerifier>,
    realm: String,
    resource_metadata_url: Option<String>,
    required_scopes: Vec<String>,
}

impl BearerGuard {
    /// A guard in realm `mcp` with no required scopes.
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            realm: "mcp".to_string(),
            resource_metadata_url: None,
            required_scopes: Vec::new(),
        }
    }

    /// Set the challenge realm.
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Advertise protected-resource metadata in every challenge.
    #[must_use]
    pub fn with_resource_metadata_url(mut self, url: Option<String>) -> Self {
        self.resource_metadata_url = url;
        self
    }

    /// Require every one of `scopes`.
    #[must_use]
    pub fn with_required_scopes(mut self, scopes: Vec<String>) -> Self {
        self.required_scopes = scopes;
        self
    }

    /// Check the request's credential.
    ///
    /// # Errors
    ///
    /// Returns the challenge to send back.
    pub async fn check(&self, headers: &HeaderMap) -> Result<AccessToken, BearerChallenge> {
        if !bearer_provided(headers) {
            return Err(BearerChallenge::Missing);
        }

        let token = bearer_token(headers).ok_or(BearerChallenge::InvalidToken)?;
        let access = self
            .verifier
            .verify_token(token)
            .await
            .ok_or(BearerChallenge::InvalidToken)?;

        let missing: Vec<String> = self
            .required_scopes
            .iter()
            .filter(|scope| !access.has_scope(scope))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BearerChallenge::InsufficientScope(missing));
        }

        Ok(access)
    }

    /// Render `challenge` as a response.
    #[must_use]
    pub fn challenge(&self, challenge: &BearerChallenge) -> Response {
        let metadata = self
            .resource_metadata_url
            .as_ref()
            .map(|url| format!(", resource_metadata=\"{url}\""))
            .unwrap_or_default();

        let (status, header, body) = match challenge {
            BearerChallenge::Missing => (
                StatusCode::UNAUTHORIZED,
                format!("Bearer realm=\"{}\"{metadata}", self.realm),
                ChallengeBody {
                    error: "unauthorized",
                    error_description: MISSING_DESCRIPTION.to_string(),
                },
            ),
            BearerChallenge::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                format!(
                    "Bearer error=\"invalid_token\", error_description=\"{INVALID_DESCRIPTION}\"{metadata}"
                ),
                ChallengeBody {
                    error: "invalid_token",
                    error_description: INVALID_DESCRIPTION.to_string(),
                },
            ),
            BearerChallenge::InsufficientScope(scopes) => {
                let description = format!("Required scope: {}", scopes.join(" "));
                (
                    StatusCode::FORBIDDEN,
                    format!(
                        "Bearer error=\"insufficient_scope\", error_description=\"{description}\"{metadata}"
                    ),
                    ChallengeBody {
                        error: "insufficient_scope",
                        error_description: description,
                    },
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        match HeaderValue::try_from(header) {
            Ok(value) => {
                response.headers_mut().insert(WWW_AUTHENTICATE, value);
            }
            Err(e) => tracing::error!(error = %e, "Unrepresentable WWW-Authenticate header"),
        }
        response
    }
}

impl std::fmt::Debug for BearerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerGuard")
            .field("realm", &self.realm)
            .field("resource_metadata_url", &self.resource_metadata_url)
            .field("required_scopes", &self.required_scopes)
            .finish_non_exhaustive()
    }
}

/// A bearer credential counts as sent once the scheme is present.
fn bearer_provided(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("bearer "))
}

/// Bearer middleware for the MCP mount.
pub async fn require_bearer(
    State(guard): State<Arc<BearerGuard>>,
    mut request: Request,
    next: Next,
) -> Response {
    match guard.check(request.headers()).await {
        Ok(access) => {
            request.extensions_mut().insert(access);
            next.run(request).await
        }
        Err(challenge) => {
            match &challenge {
                BearerChallenge::Missing => tracing::debug!("Bearer token missing"),
                other => tracing::warn!(challenge = ?other, "Bearer token refused"),
            }
            guard.challenge(&challenge)
        }
    }
}
