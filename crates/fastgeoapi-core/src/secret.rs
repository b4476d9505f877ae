//! Shared secrets compared in constant time.
//!
//! A `SharedSecret` is either generated fresh at process start (the internal
//! key used for same-process calls into the protected API) or loaded from
//! configuration (the global API key). Its value never appears in `Debug`
//! output, and comparison against a candidate is exact, case-sensitive and
//! constant-time over the candidate bytes.

use std::fmt;

use base64::prelude::*;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Number of random bytes in a generated secret (256 bits).
pub const GENERATED_SECRET_BYTES: usize = 32;

/// Errors from constructing a [`SharedSecret`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// The secret was empty.
    #[error("secret must not be empty")]
    Empty,

    /// The secret has leading or trailing whitespace.
    #[error("secret must not have surrounding whitespace")]
    Padded,
}

/// An opaque shared secret.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Generate a new random secret.
    ///
    /// The value is 32 bytes from the operating system RNG, base64url encoded
    /// without padding (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; GENERATED_SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a configured secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or whitespace-padded.
    pub fn new(value: impl Into<String>) -> Result<Self, SecretError> {
        let value = value.into();
        if value.is_empty() {
            return Err(SecretError::Empty);
        }
        if value.trim() != value {
            return Err(SecretError::Padded);
        }
        Ok(Self(value))
    }

    /// Check a candidate value against this secret.
    ///
    /// Empty candidates never match. Prefixes, substrings, case variants and
    /// padded variants never match.
    #[must_use]
    pub fn matches(&self, candidate: &[u8]) -> bool {
        if candidate.is_empty() {
            return false;
        }
        self.0.as_bytes().ct_eq(candidate).into()
    }

    /// Return the secret value.
    ///
    /// Only for placing the secret on outbound internal requests.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length of the secret in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; empty secrets cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

impl TryFrom<String> for SharedSecret {
    type Error = SecretError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
