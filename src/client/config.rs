//! Fragment client configuration.

use std::time::Duration;

/// Configuration for [`crate::client::FragmentClient`].
///
/// # Examples
///
/// ```
/// use weave_axum_http::client::ClientConfig;
///
/// let config = ClientConfig {
///     pool_idle_timeout: std::time::Duration::from_secs(30),
///     ..Default::default()
/// };
/// assert!(config.blocked_headers.contains(&"x-wrong-header".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Headers copied from the incoming request onto every upstream request.
    /// `x-*` headers are forwarded in addition to this list.
    pub forward_headers: Vec<String>,
    /// `x-*` headers that are never forwarded.
    pub blocked_headers: Vec<String>,
    /// How long pooled upstream connections stay idle before closing.
    pub pool_idle_timeout: Duration,
    /// TCP connect timeout, separate from the per-fragment headers deadline.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            forward_headers: vec![
                "referer".to_string(),
                "accept-language".to_string(),
                "user-agent".to_string(),
            ],
            blocked_headers: vec!["x-wrong-header".to_string()],
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
