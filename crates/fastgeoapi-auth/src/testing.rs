//! Test fixtures: RSA keys, JWKS documents and token minting.
//!
//! Only compiled for tests or with the `test-utils` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use crate::error::Result;
use crate::jwks::{JwksFetcher, KeySet};

/// PKCS#1 private key whose public half is published by [`signing_jwks`].
pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/rsa_signing_key.pem");

/// PKCS#1 private key that no fixture key set trusts.
pub const FOREIGN_KEY_PEM: &str = include_str!("../fixtures/rsa_foreign_key.pem");

/// Modulus of [`SIGNING_KEY_PEM`], base64url.
pub const SIGNING_KEY_N: &str = "1GikOVDkxGJimqg5qq8xHK0Dk_JVsQ6RtnmvZsg1HidHyZe39WrGSdtffwKFh4Ju2d_aeUncCY4Io49Yd6_lVDV-uaah25kxLqc2JsnWvSrxutqGpS9715ixoWWi9DwRV5NNqWIJsIRvqphjeVvIWFa7ETqQFglAnsm7iCRI7_M4LO8f24CEzaaUmsJUXpEeF-lBdlivU7Qr0TgwKwtGTgB-NZ5Mg-ih1ymbyF_WTKoFjLPViGqwH61ThRfJ-7-0S1FLcRnRRkrdY95dqPW3E4Yh3vIDJq-Wv5qRSUTpOB6ZYF-I1hnRt-vGO4jahLhR-PIaKrvV0cgIba4N78J0PQ";

/// Modulus of [`FOREIGN_KEY_PEM`], base64url.
pub const FOREIGN_KEY_N: &str = "1qlPj64Oi5zesZisYalF3780WhmyaWFPVd4LO057L6jjSii8aKj9i7Ds-cB84A7ZwrN9YQfEF6w9OHZflurGy9jfy9IXKqQEDBfjlmgB1ELlkN-7b5K5ffuxRuYD0dd2jEg0TaMXOR9IFTu8nPXgIQ9sw_xFdxesAfWUVdRD-FHvakmWeKcZtgfL5S6FkOS17K90GVy2VOGh3YkF4r2F6l3O-51Vx9v47bc0Fv88mdvqxz_0jxlmpQIncM0Rc_TSXqEVf8h7b4SIKKCYlXg3bK8e9r8pZhOZAota4Mc9teNbYoyRqNzDp9Sru0hl_5KvkQLbiX-Ag2MZ-PTCt3R_iQ";

/// Public exponent shared by both fixture keys.
pub const RSA_EXPONENT: &str = "AQAB";

/// `kid` of the signing key.
pub const TEST_KID: &str = "test-key";

/// Issuer used by [`valid_claims`].
pub const TEST_ISSUER: &str = "https://test-idp.example.com";

/// Audience used by [`valid_claims`].
pub const TEST_AUDIENCE: &str = "https://api.example.com";

/// Placeholder JWKS URI for tests that never hit the network.
pub const TEST_JWKS_URI: &str = "https://test-idp.example.com/.well-known/jwks.json";

/// An RSA public JWK.
#[must_use]
pub fn rsa_jwk(n: &str, alg: Option<&str>, kid: Option<&str>) -> Value {
    let mut key = json!({
        "kty": "RSA",
        "use": "sig",
        "n": n,
        "e": RSA_EXPONENT,
    });
    if let Value::Object(map) = &mut key {
        if let Some(alg) = alg {
            map.insert("alg".into(), json!(alg));
        }
        if let Some(kid) = kid {
            map.insert("kid".into(), json!(kid));
        }
    }
    key
}

/// Wrap keys into a JWKS document.
#[must_use]
pub fn jwks_document(keys: Vec<Value>) -> Value {
    json!({ "keys": keys })
}

/// A single-key RS256 document trusting [`SIGNING_KEY_PEM`].
#[must_use]
pub fn signing_jwks() -> Value {
    jwks_document(vec![rsa_jwk(SIGNING_KEY_N, Some("RS256"), Some(TEST_KID))])
}

/// Claims that pass every check against [`TEST_ISSUER`] and [`TEST_AUDIENCE`].
#[must_use]
pub fn valid_claims() -> Value {
    let now = Utc::now().timestamp();
    json!({
        "sub": "user123",
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "exp": now + 3600,
        "iat": now,
        "nbf": now,
        "jti": uuid::Uuid::new_v4().to_string(),
    })
}

/// Sign `claims` with the signing key, RS256 and [`TEST_KID`].
///
/// # Errors
///
/// Returns an error if the fixture key cannot be loaded or signing fails.
pub fn mint_token(claims: &Value) -> std::result::Result<String, jsonwebtoken::errors::Error> {
    mint_token_with(SIGNING_KEY_PEM, Some(TEST_KID), Algorithm::RS256, claims)
}

/// Sign `claims` with an arbitrary PEM key, `kid` and algorithm.
///
/// # Errors
///
/// Returns an error if the key cannot be loaded or signing fails.
pub fn mint_token_with(
    pem: &str,
    kid: Option<&str>,
    algorithm: Algorithm,
    claims: &Value,
) -> std::result::Result<String, jsonwebtoken::errors::Error> {
    let mut header = Header::new(algorithm);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
    encode(&header, claims, &key)
}

/// An in-memory fetcher that serves a fixed key set and counts fetches.
#[derive(Debug)]
pub struct StaticJwks {
    keys: Arc<KeySet>,
    fetches: AtomicUsize,
}

impl StaticJwks {
    /// Serve the given key set.
    #[must_use]
    pub fn new(keys: KeySet) -> Self {
        Self {
            keys: Arc::new(keys),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Serve [`signing_jwks`].
    ///
    /// # Panics
    ///
    /// Panics if the key material in `fixtures/` no longer yields a key set
    /// that [`KeySet::from_value`] accepts.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn signing() -> Self {
        Self::new(KeySet::from_value(&signing_jwks()).expect("fixture JWKS parses"))
    }

    /// How many times [`JwksFetcher::fetch`] has been called.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JwksFetcher for StaticJwks {
    async fn fetch(&self, _uri: &str) -> Result<Arc<KeySet>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.keys))
    }
}
