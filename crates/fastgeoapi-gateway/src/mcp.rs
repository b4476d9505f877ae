//! Internal key shared between the gateway and the MCP tool server.
//!
//! The key is generated fresh at every process start. The `/mcp` mount
//! presents it on every request it forwards, so the tool server can call back
//! into the API and skip authentication there. The key is never logged or put
//! on a response.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use fastgeoapi_core::{CoreError, Result, SharedSecret};

/// Header carrying the internal key.
pub const INTERNAL_KEY_HEADER: &str = "x-mcp-internal-key";

/// Holder of the internal key.
pub struct McpBridge {
    key: SharedSecret,
}

impl McpBridge {
    /// Generate a fresh key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid header value.
    pub fn new() -> Result<Self> {
        Self::with_key(SharedSecret::generate())
    }

    /// Use an existing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid header value.
    pub fn with_key(key: SharedSecret) -> Result<Self> {
        key_value(&key)?;
        Ok(Self { key })
    }

    /// The internal key.
    #[must_use]
    pub const fn key(&self) -> &SharedSecret {
        &self.key
    }

    /// Attach the internal key to an outbound request's headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid header value.
    pub fn authorize(&self, headers: &mut HeaderMap) -> Result<()> {
        headers.insert(HeaderName::from_static(INTERNAL_KEY_HEADER), key_value(&self.key)?);
        Ok(())
    }

    /// Returns `true` if `headers` carry exactly the internal key.
    #[must_use]
    pub fn admits(&self, headers: &HeaderMap) -> bool {
        headers
            .get(INTERNAL_KEY_HEADER)
            .is_some_and(|presented| self.key.matches(presented.as_bytes()))
    }
}

impl std::fmt::Debug for McpBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpBridge").field("key", &self.key).finish()
    }
}

fn key_value(key: &SharedSecret) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(key.expose())
        .map_err(|_| CoreError::invalid(INTERNAL_KEY_HEADER, "not a valid header value"))?;
    value.set_sensitive(true);
    Ok(value)
}
