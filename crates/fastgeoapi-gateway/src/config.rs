//! Gateway configuration.
//!
//! Settings are read once at startup from the environment. `ENV_STATE`
//! (`dev` or `prod`) selects a `DEV_` or `PROD_` prefix that applies to every
//! setting except `HOST` and `PORT`.

use std::time::Duration;

use url::Url;

use fastgeoapi_auth::JwksConfig;
use fastgeoapi_core::{CoreError, Result, SharedSecret};

/// Default allow-list, relative to the context path.
pub const DEFAULT_SKIP_ENDPOINTS: &[&str] = &["/openapi", "/openapi\\.json", "/docs", "/redoc"];

/// Allow-list in API-key mode: only the OpenAPI document stays public.
pub const API_KEY_SKIP_ENDPOINTS: &[&str] = &["/openapi"];

/// Which authentication strategy fronts the mounted API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No authentication.
    Disabled,
    /// External policy engine (OPA).
    Opa,
    /// JWKS bearer tokens.
    Jwks,
    /// Static API key.
    ApiKey,
}

/// How bearer tokens on the MCP mount are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McpVerifier {
    /// The bearer is a JWT whose claims become the access token.
    #[default]
    Claims,
    /// The bearer is an outer JWT whose `jti` names an opaque upstream token.
    Layered,
}

impl std::str::FromStr for McpVerifier {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claims" => Ok(Self::Claims),
            "layered" => Ok(Self::Layered),
            other => Err(CoreError::invalid(
                "MCP_TOKEN_VERIFIER",
                format!("expected claims or layered, got {other}"),
            )),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    /// `OPA_ENABLED`.
    pub opa_enabled: bool,
    /// `JWKS_ENABLED`.
    pub jwks_enabled: bool,
    /// `API_KEY_ENABLED`.
    pub api_key_enabled: bool,
    /// `OAUTH2_JWKS_ENDPOINT`.
    pub jwks_endpoint: Option<String>,
    /// `OAUTH2_EXPECTED_AUDIENCE`.
    pub expected_audience: Option<String>,
    /// `OAUTH2_EXPECTED_ISSUER`.
    pub expected_issuer: Option<String>,
    /// `OAUTH2_JWKS_CACHE_SECONDS`; `None` or zero fetches keys per validation.
    pub jwks_cache_seconds: Option<u64>,
    /// `PYGEOAPI_KEY_GLOBAL`.
    pub api_key: Option<String>,
}

/// MCP integration settings.
#[derive(Debug, Clone, Default)]
pub struct McpSettings {
    /// `FASTGEOAPI_WITH_MCP`. Also gates the internal-key bypass.
    pub enabled: bool,
    /// `MCP_UPSTREAM_URL`.
    pub upstream_url: Option<Url>,
    /// `APP_URI`, the public base URL of this gateway.
    pub app_uri: Option<String>,
    /// `MCP_RESOURCE_METADATA_URL`.
    pub resource_metadata_url: Option<String>,
    /// `OIDC_CLIENT_ID`.
    pub client_id: Option<String>,
    /// `MCP_SCOPES`, required scopes on the MCP mount.
    pub scopes: Vec<String>,
    /// `MCP_TOKEN_VERIFIER`, `claims` (default) or `layered`.
    pub verifier: McpVerifier,
}

impl McpSettings {
    /// The public URI of the MCP mount, `{APP_URI}/mcp`.
    #[must_use]
    pub fn resource_uri(&self) -> Option<String> {
        self.app_uri
            .as_ref()
            .map(|uri| format!("{}/mcp", uri.trim_end_matches('/')))
    }

    /// The protected-resource metadata URL advertised in bearer challenges.
    ///
    /// Falls back to `{APP_URI}/.well-known/oauth-protected-resource`.
    #[must_use]
    pub fn resource_metadata_url(&self) -> Option<String> {
        self.resource_metadata_url.clone().or_else(|| {
            self.app_uri.as_ref().map(|uri| {
                format!(
                    "{}/.well-known/oauth-protected-resource",
                    uri.trim_end_matches('/')
                )
            })
        })
    }
}

/// Configuration for the gateway service.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `HOST`.
    pub host: String,
    /// `PORT`.
    pub port: u16,
    /// `FASTGEOAPI_CONTEXT`, where the geospatial API is mounted.
    pub context: String,
    /// `FASTGEOAPI_SKIP_ENDPOINTS`, patterns relative to `context`.
    /// `None` uses the default for the authentication mode.
    pub skip_endpoints: Option<Vec<String>>,
    /// `PYGEOAPI_BASEURL`.
    pub upstream_url: Option<Url>,
    /// Authentication settings.
    pub auth: AuthSettings,
    /// MCP settings.
    pub mcp: McpSettings,
    /// `LOG_LEVEL`.
    pub log_level: Option<String>,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// `MAX_BODY_BYTES`.
    pub max_body_bytes: usize,
    /// `REQUEST_TIMEOUT_SECONDS`.
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    const fn default_port() -> u16 {
        5000
    }

    fn default_context() -> String {
        "/geoapi".to_string()
    }

    const fn default_max_body() -> usize {
        10 * 1024 * 1024 // 10 MB
    }

    const fn default_request_timeout() -> u64 {
        60
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSetting`] for values that fail to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSetting`] for values that fail to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env::new(&lookup)?;

        let skip_endpoints = env
            .get("FASTGEOAPI_SKIP_ENDPOINTS")
            .map(|raw| split_list(&raw, ','));

        let auth = AuthSettings {
            opa_enabled: env.flag("OPA_ENABLED")?,
            jwks_enabled: env.flag("JWKS_ENABLED")?,
            api_key_enabled: env.flag("API_KEY_ENABLED")?,
            jwks_endpoint: env.get("OAUTH2_JWKS_ENDPOINT"),
            expected_audience: env.get("OAUTH2_EXPECTED_AUDIENCE"),
            expected_issuer: env.get("OAUTH2_EXPECTED_ISSUER"),
            jwks_cache_seconds: env.parsed("OAUTH2_JWKS_CACHE_SECONDS")?,
            api_key: env.get("PYGEOAPI_KEY_GLOBAL"),
        };

        let mcp = McpSettings {
            enabled: env.flag("FASTGEOAPI_WITH_MCP")?,
            upstream_url: env.url("MCP_UPSTREAM_URL")?,
            app_uri: env.get("APP_URI"),
            resource_metadata_url: env.get("MCP_RESOURCE_METADATA_URL"),
            client_id: env.get("OIDC_CLIENT_ID"),
            scopes: env
                .get("MCP_SCOPES")
                .map(|raw| split_list(&raw.replace(',', " "), ' '))
                .unwrap_or_default(),
            verifier: env
                .get("MCP_TOKEN_VERIFIER")
                .map(|raw| raw.parse::<McpVerifier>())
                .transpose()?
                .unwrap_or_default(),
        };

        Ok(Self {
            host: env.raw("HOST").unwrap_or_else(Self::default_host),
            port: env
                .raw("PORT")
                .map(|raw| parse_number("PORT", &raw))
                .transpose()?
                .unwrap_or_else(Self::default_port),
            context: env
                .get("FASTGEOAPI_CONTEXT")
                .map(|c| normalize_context(&c))
                .unwrap_or_else(Self::default_context),
            skip_endpoints,
            upstream_url: env.url("PYGEOAPI_BASEURL")?,
            auth,
            mcp,
            log_level: env.get("LOG_LEVEL"),
            cors_origins: env
                .get("CORS_ORIGINS")
                .map_or_else(|| vec!["*".to_string()], |raw| split_list(&raw, ',')),
            max_body_bytes: env
                .parsed("MAX_BODY_BYTES")?
                .unwrap_or_else(Self::default_max_body),
            request_timeout_seconds: env
                .parsed("REQUEST_TIMEOUT_SECONDS")?
                .unwrap_or_else(Self::default_request_timeout),
        })
    }

    /// Resolve the authentication mode.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigConflict`] if more than one strategy is enabled.
    pub fn auth_mode(&self) -> Result<AuthMode> {
        let enabled: Vec<(&str, AuthMode)> = [
            ("OPA_ENABLED", self.auth.opa_enabled, AuthMode::Opa),
            ("JWKS_ENABLED", self.auth.jwks_enabled, AuthMode::Jwks),
            ("API_KEY_ENABLED", self.auth.api_key_enabled, AuthMode::ApiKey),
        ]
        .into_iter()
        .filter(|(_, on, _)| *on)
        .map(|(name, _, mode)| (name, mode))
        .collect();

        match enabled.as_slice() {
            [] => Ok(AuthMode::Disabled),
            [(_, mode)] => Ok(*mode),
            several => {
                let names: Vec<&str> = several.iter().map(|(name, _)| *name).collect();
                Err(CoreError::ConfigConflict(format!(
                    "{} cannot be enabled together",
                    names.join(", ")
                )))
            }
        }
    }

    /// Check the configuration before the server binds.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ConfigConflict`] if several strategies are enabled
    /// - [`CoreError::MissingSetting`] if the selected mode lacks a required setting
    /// - [`CoreError::InvalidSetting`] if the JWKS endpoint is not https (loopback excepted)
    pub fn validate(&self) -> Result<AuthMode> {
        let mode = self.auth_mode()?;

        match mode {
            AuthMode::Jwks => {
                self.jwks_config()?;
            }
            AuthMode::ApiKey => {
                self.api_key()?;
            }
            AuthMode::Disabled | AuthMode::Opa => {}
        }

        if let Some(endpoint) = &self.auth.jwks_endpoint {
            check_jwks_endpoint(endpoint)?;
        }

        if self.mcp.enabled && self.mcp.upstream_url.is_none() {
            return Err(CoreError::MissingSetting("MCP_UPSTREAM_URL".into()));
        }

        if self.mcp.enabled
            && self.mcp.verifier == McpVerifier::Layered
            && self.auth.jwks_endpoint.is_none()
        {
            return Err(CoreError::MissingSetting("OAUTH2_JWKS_ENDPOINT".into()));
        }

        Ok(mode)
    }

    /// The JWKS configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingSetting`] without `OAUTH2_JWKS_ENDPOINT`.
    pub fn jwks_config(&self) -> Result<JwksConfig> {
        let endpoint = self
            .auth
            .jwks_endpoint
            .as_ref()
            .ok_or_else(|| CoreError::MissingSetting("OAUTH2_JWKS_ENDPOINT".into()))?;
        check_jwks_endpoint(endpoint)?;

        let mut config = JwksConfig::new(endpoint.clone());
        config.expected_audience.clone_from(&self.auth.expected_audience);
        config.expected_issuer.clone_from(&self.auth.expected_issuer);
        Ok(config)
    }

    /// The API key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingSetting`] without `PYGEOAPI_KEY_GLOBAL`, or
    /// [`CoreError::Secret`] for an unusable key.
    pub fn api_key(&self) -> Result<SharedSecret> {
        let key = self
            .auth
            .api_key
            .clone()
            .ok_or_else(|| CoreError::MissingSetting("PYGEOAPI_KEY_GLOBAL".into()))?;
        Ok(SharedSecret::new(key)?)
    }

    /// The JWKS cache TTL, if caching is enabled.
    #[must_use]
    pub fn jwks_cache_ttl(&self) -> Option<Duration> {
        self.auth
            .jwks_cache_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    /// Address to bind.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Allow-list patterns for `mode`, relative to the context path.
    #[must_use]
    pub fn public_endpoints(&self, mode: AuthMode) -> Vec<String> {
        if let Some(patterns) = &self.skip_endpoints {
            return patterns.clone();
        }

        let defaults = match mode {
            AuthMode::ApiKey => API_KEY_SKIP_ENDPOINTS,
            AuthMode::Disabled | AuthMode::Opa | AuthMode::Jwks => DEFAULT_SKIP_ENDPOINTS,
        };
        defaults.iter().map(|s| (*s).to_string()).collect()
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            context: Self::default_context(),
            skip_endpoints: None,
            upstream_url: None,
            auth: AuthSettings::default(),
            mcp: McpSettings::default(),
            log_level: None,
            cors_origins: vec!["*".to_string()],
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// Environment view with the `ENV_STATE` prefix applied.
struct Env<'a, F> {
    lookup: &'a F,
    prefix: &'static str,
}

impl<'a, F> Env<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: &'a F) -> Result<Self> {
        let prefix = match lookup("ENV_STATE").map(|s| s.trim().to_ascii_lowercase()) {
            None => "",
            Some(state) if state.is_empty() => "",
            Some(state) if state == "dev" => "DEV_",
            Some(state) if state == "prod" => "PROD_",
            Some(state) => {
                return Err(CoreError::invalid(
                    "ENV_STATE",
                    format!("expected dev or prod, got {state}"),
                ))
            }
        };
        Ok(Self { lookup, prefix })
    }

    /// Unprefixed, non-empty value.
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    /// Prefixed, non-empty value.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{name}", self.prefix))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, name: &str) -> Result<bool> {
        match self.get(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("false" | "0" | "no" | "off") => Ok(false),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some(other) => Err(CoreError::invalid(
                name,
                format!("expected a boolean, got {other}"),
            )),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name).map(|raw| parse_number(name, &raw)).transpose()
    }

    fn url(&self, name: &str) -> Result<Option<Url>> {
        self.get(name)
            .map(|raw| Url::parse(&raw).map_err(|e| CoreError::invalid(name, e.to_string())))
            .transpose()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::invalid(name, format!("not a number: {raw}")))
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `geoapi/` becomes `/geoapi`; `/` becomes the empty root context.
fn normalize_context(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn check_jwks_endpoint(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)
        .map_err(|e| CoreError::invalid("OAUTH2_JWKS_ENDPOINT", e.to_string()))?;

    let loopback = match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };

    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        scheme => Err(CoreError::invalid(
            "OAUTH2_JWKS_ENDPOINT",
            format!("{scheme} endpoints must be https unless on loopback"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn default_config() {
        let config = config(&[]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
        assert_eq!(config.context, "/geoapi");
        assert_eq!(config.public_endpoints(AuthMode::Jwks), DEFAULT_SKIP_ENDPOINTS);
        assert_eq!(config.mcp.verifier, McpVerifier::Claims);
        assert_eq!(config.auth_mode().unwrap(), AuthMode::Disabled);
        assert!(!config.mcp.enabled);
        assert!(config.jwks_cache_ttl().is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn env_state_prefix() {
        let config = config(&[
            ("ENV_STATE", "prod"),
            ("PORT", "8080"),
            ("PROD_FASTGEOAPI_CONTEXT", "api/"),
            ("FASTGEOAPI_CONTEXT", "/ignored"),
            ("PROD_JWKS_ENABLED", "true"),
            ("PROD_OAUTH2_JWKS_ENDPOINT", "https://idp.example.com/jwks"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.context, "/api");
        assert_eq!(config.validate().unwrap(), AuthMode::Jwks);
    }

    #[test]
    fn unknown_env_state_is_rejected() {
        assert!(matches!(
            config(&[("ENV_STATE", "staging")]),
            Err(CoreError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn two_strategies_conflict() {
        let config = config(&[
            ("JWKS_ENABLED", "true"),
            ("API_KEY_ENABLED", "1"),
            ("OAUTH2_JWKS_ENDPOINT", "https://idp.example.com/jwks"),
            ("PYGEOAPI_KEY_GLOBAL", "key"),
        ])
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::ConfigConflict(msg) if msg.contains("JWKS_ENABLED")));
    }

    #[test]
    fn opa_conflicts_with_jwks() {
        let config = config(&[("OPA_ENABLED", "yes"), ("JWKS_ENABLED", "yes")]).unwrap();
        assert!(matches!(config.auth_mode(), Err(CoreError::ConfigConflict(_))));
    }

    #[test]
    fn jwks_mode_requires_endpoint() {
        let config = config(&[("JWKS_ENABLED", "true")]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(CoreError::MissingSetting(name)) if name == "OAUTH2_JWKS_ENDPOINT"
        ));
    }

    #[test]
    fn api_key_mode_requires_key() {
        let config = config(&[("API_KEY_ENABLED", "true")]).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::MissingSetting(_))));
    }

    #[test]
    fn jwks_endpoint_must_be_https_off_loopback() {
        for endpoint in [
            "https://idp.example.com/jwks",
            "http://localhost:8080/jwks",
            "http://127.0.0.1:9000/jwks",
            "http://[::1]/jwks",
        ] {
            assert!(check_jwks_endpoint(endpoint).is_ok(), "{endpoint}");
        }
        for endpoint in ["http://idp.example.com/jwks", "ftp://idp/jwks", "not a url"] {
            assert!(check_jwks_endpoint(endpoint).is_err(), "{endpoint}");
        }
    }

    #[test]
    fn jwks_config_carries_optional_checks() {
        let config = config(&[
            ("OAUTH2_JWKS_ENDPOINT", "https://idp.example.com/jwks"),
            ("OAUTH2_EXPECTED_AUDIENCE", "https://api.example.com"),
            ("OAUTH2_JWKS_CACHE_SECONDS", "300"),
        ])
        .unwrap();

        let jwks = config.jwks_config().unwrap();
        assert_eq!(jwks.expected_audience.as_deref(), Some("https://api.example.com"));
        assert!(jwks.expected_issuer.is_none());
        assert_eq!(config.jwks_cache_ttl(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config(&[("JWKS_ENABLED", "maybe")]).is_err());
        assert!(config(&[("PORT", "http")]).is_err());
        assert!(config(&[("PYGEOAPI_BASEURL", "not a url")]).is_err());
    }

    #[test]
    fn mcp_settings() {
        let config = config(&[
            ("FASTGEOAPI_WITH_MCP", "true"),
            ("MCP_UPSTREAM_URL", "http://localhost:8001/"),
            ("APP_URI", "https://geo.example.com/"),
            ("MCP_SCOPES", "mcp:read, mcp:write"),
        ])
        .unwrap();

        assert!(config.mcp.enabled);
        assert_eq!(config.mcp.scopes, vec!["mcp:read", "mcp:write"]);
        assert_eq!(
            config.mcp.resource_metadata_url().as_deref(),
            Some("https://geo.example.com/.well-known/oauth-protected-resource")
        );
        assert_eq!(config.validate().unwrap(), AuthMode::Disabled);
    }

    #[test]
    fn mcp_requires_upstream() {
        let config = config(&[("FASTGEOAPI_WITH_MCP", "true")]).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::MissingSetting(_))));
    }

    #[test]
    fn skip_endpoints_and_root_context() {
        let config = config(&[
            ("FASTGEOAPI_SKIP_ENDPOINTS", "/openapi, /health ,"),
            ("FASTGEOAPI_CONTEXT", "/"),
        ])
        .unwrap();
        assert_eq!(
            config.public_endpoints(AuthMode::ApiKey),
            vec!["/openapi", "/health"]
        );
        assert_eq!(config.context, "");
    }

    #[test]
    fn api_key_mode_keeps_only_openapi_public() {
        let config = config(&[]).unwrap();
        assert_eq!(config.public_endpoints(AuthMode::ApiKey), vec!["/openapi"]);
        assert_eq!(config.public_endpoints(AuthMode::Disabled).len(), 4);
    }

    #[test]
    fn mcp_token_verifier_setting() {
        let layered = config(&[
            ("FASTGEOAPI_WITH_MCP", "true"),
            ("MCP_UPSTREAM_URL", "http://localhost:8001"),
            ("MCP_TOKEN_VERIFIER", "Layered"),
        ])
        .unwrap();
        assert_eq!(layered.mcp.verifier, McpVerifier::Layered);
        assert!(matches!(
            layered.validate(),
            Err(CoreError::MissingSetting(name)) if name == "OAUTH2_JWKS_ENDPOINT"
        ));

        let unknown = config(&[("MCP_TOKEN_VERIFIER", "trusting")]);
        assert!(matches!(
            unknown,
            Err(CoreError::InvalidSetting { name, .. }) if name == "MCP_TOKEN_VERIFIER"
        ));
    }
}
