//! Span helpers for request and fragment tracing.
//!
//! One server span per composed request, one client span per fragment fetch.
//! Tracing is best-effort by construction: nothing here returns an error and
//! a missing subscriber simply makes every call a no-op.

use crate::error::WeaveError;
use crate::types::{FragmentDescriptor, RequestContext};
use tracing::field::Empty;
use tracing::Span;

/// Server span covering one composed request.
pub fn request_span(ctx: &RequestContext) -> Span {
    tracing::info_span!(
        "compose",
        http.url = %ctx.path,
        span.kind = "server",
        http.status_code = Empty,
        error = Empty,
    )
}

/// Mark the request span failed with the outer status it produced.
pub fn record_request_error(span: &Span, err: &WeaveError) {
    span.record("error", true);
    span.record("http.status_code", err.status_code());
}

/// Client span covering one fragment fetch, fallback attempt included.
pub fn fragment_span(descriptor: &FragmentDescriptor) -> Span {
    tracing::info_span!(
        "fragment",
        http.url = descriptor.src.as_deref().unwrap_or(""),
        span.kind = "client",
        id = %descriptor.override_key(),
        primary = descriptor.primary,
        deferred = descriptor.is_async,
        public = descriptor.public,
        fallback = descriptor.fallback_src.is_some(),
        timeout_ms = descriptor.timeout_ms,
        error = Empty,
    )
}

/// Mark a fragment span failed and log the failure kind as an event.
pub fn record_fragment_error(span: &Span, err: &WeaveError) {
    span.record("error", true);
    let _guard = span.enter();
    tracing::warn!(kind = err.kind(), error = %err, "fragment failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn test_spans_build_without_subscriber() {
        let ctx = RequestContext {
            path: "/index".to_string(),
            host: None,
            headers: HeaderMap::new(),
        };
        let span = request_span(&ctx);
        record_request_error(&span, &WeaveError::Template("boom".to_string()));

        let descriptor = FragmentDescriptor::from_attrs(&[], 0);
        let span = fragment_span(&descriptor);
        record_fragment_error(&span, &WeaveError::FragmentTimeout(100));
    }
}
