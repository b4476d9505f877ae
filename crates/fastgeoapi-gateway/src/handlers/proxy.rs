//! Forwarding to upstream services.
//!
//! The mounted geospatial API and the MCP tool server both run behind the
//! gateway. Requests reaching this handler have already passed the gateway's
//! authentication; they are forwarded with their method, path, query, headers
//! and body. Hop-by-hop headers, `Host` and the internal key never cross.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::response::Response;
use url::Url;

use fastgeoapi_core::{CoreError, Result};

use crate::error::ApiError;
use crate::mcp::{McpBridge, INTERNAL_KEY_HEADER};

/// An upstream service.
#[derive(Debug)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
    max_body_bytes: usize,
    bridge: Option<Arc<McpBridge>>,
}

impl Upstream {
    /// Forward to `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base: Url, timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to create upstream client: {e}")))?;

        Ok(Self {
            client,
            base,
            max_body_bytes,
            bridge: None,
        })
    }

    /// Present the internal key on every forwarded request.
    ///
    /// Used for the MCP tool server so it can call back into the API.
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<McpBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// The absolute upstream URL for a request path and query.
    #[must_use]
    pub fn target(&self, path_and_query: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path_and_query.trim_start_matches('/')
        )
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Copy headers that may cross the proxy.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name.as_str() == INTERNAL_KEY_HEADER
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Forward a request upstream and relay the response.
///
/// # Errors
///
/// Returns [`ApiError::BadGateway`] if the upstream cannot be reached.
pub async fn forward(
    State(upstream): State<Arc<Upstream>>,
    request: Request,
) -> std::result::Result<Response, ApiError> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let target = upstream.target(path_and_query);

    let body = to_bytes(body, upstream.max_body_bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read request body: {e}")))?;

    let mut headers = forwardable(&parts.headers);
    if let Some(bridge) = &upstream.bridge {
        bridge
            .authorize(&mut headers)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    tracing::debug!(method = %parts.method, target = %target, "Forwarding request");

    let response = upstream
        .client
        .request(parts.method, &target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(target = %target, error = %e, "Upstream request failed");
            ApiError::BadGateway(e.to_string())
        })?;

    let status = response.status();
    let response_headers = forwardable(response.headers());
    let bytes = response.bytes().await.map_err(|e| {
        tracing::error!(target = %target, error = %e, "Upstream response failed");
        ApiError::BadGateway(e.to_string())
    })?;

    let mut relayed = Response::new(Body::from(bytes));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = response_headers;
    Ok(relayed)
}
