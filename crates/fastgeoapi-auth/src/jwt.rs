//! JWT validation and claims extraction.
//!
//! [`TokenValidator::decode`] is the single place where a bearer token is
//! checked against a key set. The signing algorithm is taken from the key set,
//! never from the token: a key set that advertises zero or several algorithms
//! is refused outright.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::jwks::KeySet;
use crate::JwksConfig;

/// The decoded payload of a token.
///
/// Claims are kept as the raw JSON object so that custom claims survive
/// untouched; accessors cover the registered names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Look up a claim by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Set a claim, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    /// Returns `true` if the claim is present (even if `null`).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn str_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// `sub` claim.
    #[must_use]
    pub fn sub(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    /// `iss` claim.
    #[must_use]
    pub fn iss(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    /// `jti` claim.
    #[must_use]
    pub fn jti(&self) -> Option<&str> {
        self.str_claim("jti")
    }

    /// `client_id` claim.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.str_claim("client_id")
    }

    /// `azp` claim.
    #[must_use]
    pub fn azp(&self) -> Option<&str> {
        self.str_claim("azp")
    }

    /// `scope` claim, split on whitespace.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.str_claim("scope")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// `exp` claim as whole seconds.
    #[must_use]
    pub fn exp(&self) -> Option<i64> {
        self.0.get("exp").and_then(numeric_date)
    }

    /// `aud` claim normalized to a list.
    ///
    /// A single string becomes a one-element list; a missing claim an empty one.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        match self.0.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Cognito access tokens carry `client_id` instead of `aud`.
    fn apply_client_id_audience(&mut self) {
        if self.contains("aud") {
            return;
        }
        if let Some(client_id) = self.0.get("client_id").cloned() {
            self.0.insert("aud".to_string(), client_id);
        }
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Read a JWT `NumericDate`, truncating fractional seconds.
#[allow(clippy::cast_possible_truncation)]
fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
}

/// Stateless token validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenValidator {
    leeway: u64,
}

impl TokenValidator {
    /// A validator with no clock leeway.
    #[must_use]
    pub const fn new() -> Self {
        Self { leeway: 0 }
    }

    /// A validator that tolerates `seconds` of clock skew on time claims.
    #[must_use]
    pub const fn with_leeway(seconds: u64) -> Self {
        Self { leeway: seconds }
    }

    /// Pick the one algorithm the key set advertises.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedAlgorithmSet`] if the key set advertises
    /// several distinct algorithms, none at all, or one that is not supported.
    pub fn select_algorithm(keys: &KeySet) -> Result<Algorithm> {
        let algorithms = keys.algorithms();
        match algorithms.as_slice() {
            [alg] => Algorithm::from_str(alg).map_err(|_| {
                AuthError::MalformedAlgorithmSet(format!("unsupported algorithm {alg}"))
            }),
            [] => Err(AuthError::MalformedAlgorithmSet(
                "missing algorithm".to_string(),
            )),
            several => Err(AuthError::MalformedAlgorithmSet(format!(
                "multiple algorithms: {}",
                several.join(", ")
            ))),
        }
    }

    /// Validate a token against a key set and return its claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedAlgorithmSet`] if the key set does not advertise exactly one algorithm
    /// - [`AuthError::ExpiredToken`] if the signature verifies but `exp` has passed
    /// - [`AuthError::DecodeFailure`] for any other signature or format problem
    /// - [`AuthError::InvalidAudience`] / [`AuthError::InvalidIssuer`] when configured checks fail
    /// - [`AuthError::InvalidClaim`] when `exp` is malformed, or `nbf` or `iat` is malformed or in the future
    pub fn decode(&self, token: &str, keys: &KeySet, config: &JwksConfig) -> Result<Claims> {
        let algorithm = Self::select_algorithm(keys)?;

        let mut claims = self.verify_signature(token, keys, algorithm)?;

        claims.apply_client_id_audience();

        if let Some(expected) = config.expected_audience.as_deref() {
            if !claims.audiences().contains(&expected) {
                return Err(AuthError::InvalidAudience);
            }
        }

        if let Some(expected) = config.expected_issuer.as_deref() {
            if claims.iss() != Some(expected) {
                return Err(AuthError::InvalidIssuer);
            }
        }

        self.validate_registered(&claims)?;

        Ok(claims)
    }

    fn verify_signature(&self, token: &str, keys: &KeySet, algorithm: Algorithm) -> Result<Claims> {
        let header = decode_header(token).map_err(|e| AuthError::DecodeFailure(e.to_string()))?;

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        // nbf, aud and iss are checked after the Cognito fallback
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let mut last_error = AuthError::DecodeFailure("no key matches token kid".to_string());

        for key in keys.candidates(header.kid.as_deref()) {
            let decoding_key = match DecodingKey::from_jwk(&key.jwk) {
                Ok(decoding_key) => decoding_key,
                Err(e) => {
                    last_error = AuthError::DecodeFailure(e.to_string());
                    continue;
                }
            };

            match decode::<Claims>(token, &decoding_key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                    return Err(AuthError::ExpiredToken);
                }
                Err(e) => last_error = AuthError::DecodeFailure(e.to_string()),
            }
        }

        Err(last_error)
    }

    fn validate_registered(&self, claims: &Claims) -> Result<()> {
        let now = Utc::now().timestamp();
        let leeway = i64::try_from(self.leeway).unwrap_or(i64::MAX);

        // jsonwebtoken skips an `exp` it cannot read as an unsigned integer
        if let Some(exp) = claims.get("exp") {
            let exp = numeric_date(exp).ok_or_else(|| AuthError::InvalidClaim("exp".into()))?;
            if exp.saturating_add(leeway) < now {
                return Err(AuthError::ExpiredToken);
            }
        }

        if let Some(nbf) = claims.get("nbf") {
            let nbf = numeric_date(nbf).ok_or_else(|| AuthError::InvalidClaim("nbf".into()))?;
            if nbf > now.saturating_add(leeway) {
                return Err(AuthError::InvalidClaim("token not yet valid".into()));
            }
        }

        if let Some(iat) = claims.get("iat") {
            let iat = numeric_date(iat).ok_or_else(|| AuthError::InvalidClaim("iat".into()))?;
            if iat > now.saturating_add(leeway) {
                return Err(AuthError::InvalidClaim("token issued in the future".into()));
            }
        }

        Ok(())
    }
}
