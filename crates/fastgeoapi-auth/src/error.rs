//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication.
///
/// Every variant is recoverable at the HTTP boundary, where it becomes a 401.
/// The `Display` text is for logs only and is never sent to clients.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer credential was supplied.
    #[error("auth token not found")]
    MissingToken,

    /// The key set advertises zero or several signing algorithms.
    #[error("malformed algorithm set: {0}")]
    MalformedAlgorithmSet(String),

    /// The token signature verified but the token has expired.
    #[error("unable to validate an expired token")]
    ExpiredToken,

    /// The token could not be decoded or its signature did not verify.
    #[error("unable to decode token: {0}")]
    DecodeFailure(String),

    /// The `aud` claim does not contain the expected audience.
    #[error("invalid audience")]
    InvalidAudience,

    /// The `iss` claim does not equal the expected issuer.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// A registered claim (`nbf`, `iat`) failed validation.
    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    /// The credential type is not in the provider's accepted methods.
    #[error("authentication method not accepted: {0}")]
    MethodNotAccepted(String),

    /// The API key did not match.
    #[error("invalid api key")]
    InvalidApiKey,

    /// The JWKS endpoint could not be reached or answered with a non-2xx status.
    #[error("JWKS fetch failed: {0}")]
    NetworkFailure(String),

    /// The JWKS document is not a valid JSON Web Key Set.
    #[error("JWKS parse failed: {0}")]
    ParseFailure(String),
}

impl AuthError {
    /// A stable, short identifier for this error, suitable for log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedAlgorithmSet(_) => "malformed_algorithm_set",
            Self::ExpiredToken => "expired_token",
            Self::DecodeFailure(_) => "decode_failure",
            Self::InvalidAudience => "invalid_audience",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidClaim(_) => "invalid_claim",
            Self::MethodNotAccepted(_) => "method_not_accepted",
            Self::InvalidApiKey => "invalid_api_key",
            Self::NetworkFailure(_) => "network_failure",
            Self::ParseFailure(_) => "parse_failure",
        }
    }

    /// Returns `true` if the failure came from the identity provider side
    /// rather than from the presented credential.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::ParseFailure(_))
    }
}
