//! Error types and result handling for the composer.
//!
//! The error set is closed: every failure the composer can encounter maps to
//! one of the variants below. Template errors surface to the client as the
//! outer response (404 or 500 with a presentable body); fragment errors are
//! traced and otherwise swallowed into collapsed regions, unless the failing
//! fragment is the primary one.

use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WeaveError>;

/// All errors produced by the composer core.
#[derive(Debug, Clone, Error)]
pub enum WeaveError {
    /// The template source has no template for the requested key. Maps to an
    /// outer 404.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The template source failed for any other reason. Maps to an outer 500.
    #[error("template error: {0}")]
    Template(String),

    /// The context provider failed.
    #[error("context error: {0}")]
    Context(String),

    /// A fragment did not produce response headers within its deadline.
    #[error("fragment timed out after {0} ms")]
    FragmentTimeout(u64),

    /// A fragment request failed at the network level.
    #[error("fragment fetch failed: {0}")]
    FragmentFetch(String),

    /// A fragment responded with a server error status.
    #[error("fragment returned HTTP {0}")]
    FragmentHttp(u16),

    /// A fragment body declared gzip but could not be decoded. The body is
    /// terminated cleanly; this variant is only ever logged and traced.
    #[error("gzip decode failed: {0}")]
    Decode(String),

    /// A header value could not be parsed.
    #[error("invalid header: {0}")]
    HeaderParse(String),

    /// The downstream client went away while the response was streaming.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl WeaveError {
    /// The outer HTTP status this error maps to when it terminates a request.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            WeaveError::TemplateNotFound(_) => 404,
            _ => 500,
        }
    }

    /// A message safe to send in the HTTP response body.
    ///
    /// Template and context errors carry host-authored text; fragment errors
    /// collapse to a generic line so upstream URLs never leak to clients.
    #[must_use]
    pub fn presentable(&self) -> String {
        match self {
            WeaveError::TemplateNotFound(msg) | WeaveError::Template(msg) => msg.clone(),
            WeaveError::Context(msg) => msg.clone(),
            _ => "Internal Server Error".to_string(),
        }
    }

    /// Whether this error is a per-fragment failure, i.e. one that arms the
    /// fallback request and is swallowed for non-primary fragments.
    #[must_use]
    pub fn is_fragment_failure(&self) -> bool {
        matches!(
            self,
            WeaveError::FragmentTimeout(_)
                | WeaveError::FragmentFetch(_)
                | WeaveError::FragmentHttp(_)
        )
    }

    /// Short machine-readable kind, used as the failure tag on trace events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WeaveError::TemplateNotFound(_) => "template-not-found",
            WeaveError::Template(_) => "template-error",
            WeaveError::Context(_) => "context-error",
            WeaveError::FragmentTimeout(_) => "fragment-timeout",
            WeaveError::FragmentFetch(_) => "fragment-fetch-error",
            WeaveError::FragmentHttp(_) => "fragment-http-error",
            WeaveError::Decode(_) => "decode-error",
            WeaveError::HeaderParse(_) => "header-parse-error",
            WeaveError::ClientDisconnected => "client-disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(WeaveError::TemplateNotFound("x".into()).status_code(), 404);
        assert_eq!(WeaveError::Template("x".into()).status_code(), 500);
        assert_eq!(WeaveError::FragmentTimeout(100).status_code(), 500);
    }

    #[test]
    fn test_fragment_failures() {
        assert!(WeaveError::FragmentTimeout(1).is_fragment_failure());
        assert!(WeaveError::FragmentHttp(502).is_fragment_failure());
        assert!(!WeaveError::TemplateNotFound("x".into()).is_fragment_failure());
        assert!(!WeaveError::ClientDisconnected.is_fragment_failure());
    }

    #[test]
    fn test_presentable_hides_fragment_details() {
        let err = WeaveError::FragmentFetch("http://secret.internal/x refused".into());
        assert_eq!(err.presentable(), "Internal Server Error");

        let err = WeaveError::TemplateNotFound("no template for /missing".into());
        assert_eq!(err.presentable(), "no template for /missing");
    }
}
