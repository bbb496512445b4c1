//! Axum-facing composition entry point.
//!
//! [`Composer`] ties the host configuration, template source, context
//! provider, tag handler, and fragment client together. Wire it into a
//! service either through [`Composer::router`] (every unmatched route
//! composes) or by calling [`Composer::serve_request`] from your own
//! handler.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use weave_axum_http::{Composer, ComposerConfig, StaticTemplates};
//!
//! let mut templates = StaticTemplates::new();
//! templates.insert("/", "<body><fragment src=\"http://a/1\"></fragment></body>");
//!
//! let composer = Arc::new(Composer::new(ComposerConfig::default(), Arc::new(templates)));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, composer.router()).await?;
//! ```

use crate::client::FragmentClient;
use crate::error::WeaveError;
use crate::parser::{ParseOptions, TemplateParser};
use crate::server::config::{
    ComposerConfig, ContextProvider, NoContext, NoTagHandler, TagHandler, TemplateSource,
};
use crate::server::orchestrator;
use crate::types::RequestContext;
use axum::body::Body;
use axum::Router;
use http::{header, Request, Response, StatusCode};
use std::sync::Arc;

/// The streaming layout composer.
///
/// Cheap to share behind an `Arc`; all mutable state is per-request.
pub struct Composer {
    pub(crate) config: Arc<ComposerConfig>,
    pub(crate) parser: TemplateParser,
    pub(crate) templates: Arc<dyn TemplateSource>,
    pub(crate) context: Arc<dyn ContextProvider>,
    pub(crate) tags: Arc<dyn TagHandler>,
    pub(crate) client: FragmentClient,
}

impl Composer {
    /// Composer over a template source, with no context provider and no
    /// custom-tag handler.
    #[must_use]
    pub fn new(config: ComposerConfig, templates: Arc<dyn TemplateSource>) -> Self {
        let parser = TemplateParser::new(ParseOptions {
            handled_tags: config.handled_tags.clone(),
            max_asset_links: config.max_asset_links,
        });
        Composer {
            config: Arc::new(config),
            parser,
            templates,
            context: Arc::new(NoContext),
            tags: Arc::new(NoTagHandler),
            client: FragmentClient::new(),
        }
    }

    /// Replace the context provider.
    #[must_use]
    pub fn with_context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    /// Replace the custom-tag handler.
    #[must_use]
    pub fn with_tag_handler(mut self, tags: Arc<dyn TagHandler>) -> Self {
        self.tags = tags;
        self
    }

    /// Replace the fragment client (e.g. with custom forwarding policy).
    #[must_use]
    pub fn with_client(mut self, client: FragmentClient) -> Self {
        self.client = client;
        self
    }

    /// The template parser this composer uses, for hosts that pre-parse.
    #[must_use]
    pub fn parser(&self) -> &TemplateParser {
        &self.parser
    }

    /// Compose a response for one incoming request.
    ///
    /// Never fails: template and primary errors map to their outer status
    /// with a presentable body.
    pub async fn serve_request(&self, request: Request<Body>) -> Response<Body> {
        let (parts, _body) = request.into_parts();
        let ctx = RequestContext::from_parts(&parts);
        match orchestrator::compose(self, ctx).await {
            Ok(response) => response,
            Err(err) => error_response(&err),
        }
    }

    /// A router whose fallback composes every request.
    #[must_use]
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(move |request: Request<Body>| {
            let composer = self.clone();
            async move { composer.serve_request(request).await }
        })
    }
}

fn error_response(err: &WeaveError) -> Response<Body> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(err.presentable()))
        .unwrap_or_else(|_| Response::default())
}
