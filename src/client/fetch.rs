//! Upstream fragment fetching.
//!
//! One HTTP call per fragment, with a headers deadline, a single fallback
//! retry, transparent gzip decoding, and asset discovery from the response's
//! `Link` header. Connections are pooled per upstream authority and the pool
//! is shared across requests; clone the client freely.
//!
//! # Forwarding Policy
//!
//! Only an allowlisted subset of the incoming request's headers reaches
//! upstreams: `referer`, `accept-language`, `user-agent`, and any `x-*`
//! header not explicitly blocked. `cookie` and `authorization` are forwarded
//! only when the fragment is marked `public`. `accept-encoding: gzip` is
//! always set.
//!
//! # Upstream Contract
//!
//! Any status below 500 is success, including redirects: the composer never
//! follows them, a primary fragment's `Location` propagates to the outer
//! response instead. Statuses of 500 and above, network errors, and timeouts
//! are failures and arm the fallback request when `fallback-src` is set.

use crate::client::config::ClientConfig;
use crate::client::decode::GzipDecodeStream;
use crate::error::{Result, WeaveError};
use crate::protocol::link::fragment_assets;
use crate::types::{FragmentBody, FragmentDescriptor, FragmentResponse, RequestContext};
use futures::{StreamExt, TryStreamExt};
use http::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// HTTP client for fragment upstreams.
///
/// # Examples
///
/// ```
/// use weave_axum_http::client::{ClientConfig, FragmentClient};
///
/// // Default configuration
/// let client = FragmentClient::new();
///
/// // Custom configuration
/// let config = ClientConfig {
///     connect_timeout: std::time::Duration::from_secs(2),
///     ..Default::default()
/// };
/// let client = FragmentClient::with_config(config);
/// ```
#[derive(Clone)]
pub struct FragmentClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl FragmentClient {
    /// Client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Client with custom configuration.
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(config.pool_idle_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("http client initialization");
        FragmentClient {
            http,
            config: Arc::new(config),
        }
    }

    /// Fetch a fragment, retrying once against `fallback-src` on failure.
    ///
    /// Returns as soon as response headers arrive; the body is a stream.
    pub async fn fetch(
        &self,
        descriptor: &FragmentDescriptor,
        ctx: &RequestContext,
        max_asset_links: usize,
    ) -> Result<FragmentResponse> {
        let src = descriptor
            .src
            .clone()
            .ok_or_else(|| WeaveError::FragmentFetch("fragment has no src".to_string()))?;

        match self.attempt(&src, descriptor, ctx, max_asset_links).await {
            Err(err) if err.is_fragment_failure() => match &descriptor.fallback_src {
                Some(fallback) => {
                    tracing::warn!(src = %src, error = %err, "fragment failed, trying fallback");
                    self.attempt(fallback, descriptor, ctx, max_asset_links).await
                }
                None => Err(err),
            },
            other => other,
        }
    }

    async fn attempt(
        &self,
        url: &str,
        descriptor: &FragmentDescriptor,
        ctx: &RequestContext,
        max_asset_links: usize,
    ) -> Result<FragmentResponse> {
        let headers = forward_headers(&ctx.headers, descriptor.public, &self.config);
        let deadline = Duration::from_millis(descriptor.timeout_ms);

        let response = timeout(deadline, self.http.get(url).headers(headers).send())
            .await
            .map_err(|_| WeaveError::FragmentTimeout(descriptor.timeout_ms))?
            .map_err(|err| WeaveError::FragmentFetch(err.to_string()))?;

        let status = response.status().as_u16();
        if status >= 500 {
            return Err(WeaveError::FragmentHttp(status));
        }

        let headers = response.headers().clone();
        let assets = fragment_assets(&headers, ctx.host.as_deref(), max_asset_links);
        let gzipped = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

        let raw = response
            .bytes_stream()
            .map_err(|err| WeaveError::FragmentFetch(err.to_string()))
            .boxed();
        let body: FragmentBody = if gzipped {
            GzipDecodeStream::new(raw).boxed()
        } else {
            raw
        };

        Ok(FragmentResponse {
            status,
            headers,
            assets,
            body,
        })
    }
}

impl Default for FragmentClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the forwarding policy to the incoming request's headers.
pub fn forward_headers(incoming: &HeaderMap, public: bool, config: &ClientConfig) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in incoming {
        let name_str = name.as_str();
        let allowed = config.forward_headers.iter().any(|h| h == name_str)
            || (name_str.starts_with("x-")
                && !config.blocked_headers.iter().any(|h| h == name_str))
            || (public && (name_str == "cookie" || name_str == "authorization"));
        if allowed {
            out.append(name.clone(), value.clone());
        }
    }
    out.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("referer", HeaderValue::from_static("http://shop.local/"));
        headers.insert("accept-language", HeaderValue::from_static("de"));
        headers.insert("user-agent", HeaderValue::from_static("test-agent"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("x-wrong-header", HeaderValue::from_static("nope"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("host", HeaderValue::from_static("shop.local"));
        headers
    }

    #[test]
    fn test_allowlist_forwarded() {
        let out = forward_headers(&incoming(), false, &ClientConfig::default());
        assert_eq!(out.get("referer").unwrap(), "http://shop.local/");
        assert_eq!(out.get("accept-language").unwrap(), "de");
        assert_eq!(out.get("user-agent").unwrap(), "test-agent");
        assert_eq!(out.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_blocked_and_private_headers_dropped() {
        let out = forward_headers(&incoming(), false, &ClientConfig::default());
        assert!(out.get("x-wrong-header").is_none());
        assert!(out.get("cookie").is_none());
        assert!(out.get("authorization").is_none());
        assert!(out.get("host").is_none());
    }

    #[test]
    fn test_public_fragment_gets_credentials() {
        let out = forward_headers(&incoming(), true, &ClientConfig::default());
        assert_eq!(out.get("cookie").unwrap(), "session=1");
        assert_eq!(out.get("authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn test_accept_encoding_always_set() {
        let out = forward_headers(&HeaderMap::new(), false, &ClientConfig::default());
        assert_eq!(out.get("accept-encoding").unwrap(), "gzip");
    }

    #[test]
    fn test_client_is_cloneable() {
        let client = FragmentClient::new();
        let _clone = client.clone();
    }
}
