//! Host configuration and collaborator traits.
//!
//! The composer core stays agnostic of where templates, request context, and
//! custom-tag content come from: hosts plug those in through the
//! [`TemplateSource`], [`ContextProvider`], and [`TagHandler`] traits.
//! Built-in implementations cover the common cases: [`StaticTemplates`]
//! memoizes parsed templates behind a lock, [`NoContext`] supplies no
//! overrides, and [`NoTagHandler`] renders nothing for delegated tags.

use crate::error::{Result, WeaveError};
use crate::parser::TemplateParser;
use crate::protocol::pipe::{default_pipe_attributes, PipeAttributes};
use crate::types::{
    ContextOverrides, FragmentDescriptor, ParsedTemplate, RequestContext, TagEvent,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use http::header::{HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::HeaderMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a fragment and its index range to the attribute object serialized
/// into `start`/`end` hooks.
pub type PipeAttributesFn =
    Arc<dyn Fn(&FragmentDescriptor, (usize, usize)) -> PipeAttributes + Send + Sync>;

/// Selects which of a fragment's response headers propagate to the outer
/// response when the fragment is primary.
pub type FilterResponseHeadersFn =
    Arc<dyn Fn(&FragmentDescriptor, &HeaderMap) -> Vec<(HeaderName, HeaderValue)> + Send + Sync>;

/// Where templates come from.
///
/// Implementations receive the parser so they can cache parsed output;
/// parsing is pure, so a cached [`ParsedTemplate`] is safe to share across
/// requests.
pub trait TemplateSource: Send + Sync {
    /// Resolve and parse the template for a request.
    fn fetch_template<'a>(
        &'a self,
        ctx: &'a RequestContext,
        parser: &'a TemplateParser,
    ) -> BoxFuture<'a, Result<Arc<ParsedTemplate>>>;
}

/// Supplies per-request fragment attribute overrides, keyed by fragment id.
pub trait ContextProvider: Send + Sync {
    /// Fetch the override map for a request.
    fn fetch_context<'a>(&'a self, ctx: &'a RequestContext)
        -> BoxFuture<'a, Result<ContextOverrides>>;
}

/// Renders tags listed in [`ComposerConfig::handled_tags`].
///
/// The returned stream may interleave raw output chunks with dynamically
/// produced fragments; the orchestrator fetches those like async fragments
/// and drains their bodies after the document body.
pub trait TagHandler: Send + Sync {
    /// Produce the event stream for one tag occurrence.
    fn handle_tag(
        &self,
        ctx: &RequestContext,
        name: &str,
        attrs: &[(String, Option<String>)],
    ) -> BoxStream<'static, TagEvent>;
}

/// Composer host configuration.
///
/// # Examples
///
/// ```
/// use weave_axum_http::server::ComposerConfig;
///
/// let config = ComposerConfig {
///     max_asset_links: 3,
///     amd_loader_url: Some("http://cdn.local/loader.js".to_string()),
///     ..Default::default()
/// };
/// assert_eq!(config.pipe_instance_name, "p");
/// ```
#[derive(Clone)]
pub struct ComposerConfig {
    /// URL of the external client-runtime loader script. When set (and no
    /// [`Self::pipe_definition`] is given) it is emitted as a `<script src>`
    /// tag and announced in the outer `Link` preload header.
    pub amd_loader_url: Option<String>,
    /// Inline client-runtime bytes, injected verbatim inside a `<script>`
    /// tag. Replaces the external loader and suppresses the preload header.
    pub pipe_definition: Option<Bytes>,
    /// Client-side global the hooks call into. Default `p`.
    pub pipe_instance_name: String,
    /// Cap on stylesheets and on fragment-scripts used per fragment.
    /// Default 1.
    pub max_asset_links: usize,
    /// Additional tag names delegated to the host's [`TagHandler`].
    pub handled_tags: Vec<String>,
    /// Hook building the attribute object for `start`/`end` calls.
    pub pipe_attributes: PipeAttributesFn,
    /// Hook selecting primary response headers to propagate.
    pub filter_response_headers: FilterResponseHeadersFn,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        ComposerConfig {
            amd_loader_url: None,
            pipe_definition: None,
            pipe_instance_name: "p".to_string(),
            max_asset_links: 1,
            handled_tags: Vec::new(),
            pipe_attributes: Arc::new(default_pipe_attributes),
            filter_response_headers: Arc::new(default_filter_response_headers),
        }
    }
}

impl std::fmt::Debug for ComposerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposerConfig")
            .field("amd_loader_url", &self.amd_loader_url)
            .field("pipe_instance_name", &self.pipe_instance_name)
            .field("max_asset_links", &self.max_asset_links)
            .field("handled_tags", &self.handled_tags)
            .finish_non_exhaustive()
    }
}

/// Default header filter: propagate `Location` and every `Set-Cookie`.
pub fn default_filter_response_headers(
    _descriptor: &FragmentDescriptor,
    headers: &HeaderMap,
) -> Vec<(HeaderName, HeaderValue)> {
    let mut out = Vec::new();
    for name in [LOCATION, SET_COOKIE] {
        for value in headers.get_all(&name) {
            out.push((name.clone(), value.clone()));
        }
    }
    out
}

/// In-memory template source with parse memoization.
///
/// Templates are registered up front; the first request for a path parses it
/// and caches the result, later requests share the `Arc`. The registry is
/// keyed by request path with the query string stripped.
///
/// # Examples
///
/// ```
/// use weave_axum_http::server::StaticTemplates;
///
/// let mut templates = StaticTemplates::new();
/// templates.insert("/", "<body><fragment src=\"http://a/1\"></fragment></body>");
/// ```
#[derive(Default)]
pub struct StaticTemplates {
    sources: HashMap<String, (Bytes, Option<Bytes>)>,
    cache: RwLock<HashMap<String, Arc<ParsedTemplate>>>,
}

impl StaticTemplates {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base template for a path.
    pub fn insert(&mut self, path: impl Into<String>, base: impl Into<Bytes>) {
        self.sources.insert(path.into(), (base.into(), None));
    }

    /// Register a base template with a child template for slot composition.
    pub fn insert_with_child(
        &mut self,
        path: impl Into<String>,
        base: impl Into<Bytes>,
        child: impl Into<Bytes>,
    ) {
        self.sources
            .insert(path.into(), (base.into(), Some(child.into())));
    }
}

impl TemplateSource for StaticTemplates {
    fn fetch_template<'a>(
        &'a self,
        ctx: &'a RequestContext,
        parser: &'a TemplateParser,
    ) -> BoxFuture<'a, Result<Arc<ParsedTemplate>>> {
        Box::pin(async move {
            let key = ctx.path.split('?').next().unwrap_or(&ctx.path).to_string();
            if let Some(cached) = self.cache.read().get(&key) {
                return Ok(cached.clone());
            }
            let Some((base, child)) = self.sources.get(&key) else {
                return Err(WeaveError::TemplateNotFound(format!(
                    "no template for {key}"
                )));
            };
            let parsed = Arc::new(parser.parse(base, child.as_deref()));
            for warning in &parsed.warnings {
                tracing::warn!(template = %key, "{warning}");
            }
            self.cache.write().insert(key, parsed.clone());
            Ok(parsed)
        })
    }
}

/// Context provider that never overrides anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn fetch_context<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Result<ContextOverrides>> {
        Box::pin(async { Ok(ContextOverrides::new()) })
    }
}

/// Context provider returning the same override map for every request.
#[derive(Debug, Clone, Default)]
pub struct StaticContext(pub ContextOverrides);

impl ContextProvider for StaticContext {
    fn fetch_context<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Result<ContextOverrides>> {
        Box::pin(async { Ok(self.0.clone()) })
    }
}

/// Tag handler producing no output for any delegated tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTagHandler;

impl TagHandler for NoTagHandler {
    fn handle_tag(
        &self,
        _ctx: &RequestContext,
        _name: &str,
        _attrs: &[(String, Option<String>)],
    ) -> BoxStream<'static, TagEvent> {
        Box::pin(futures::stream::empty())
    }
}
