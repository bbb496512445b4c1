//! Core composer types.
//!
//! The data model mirrors the composition pipeline: the parser produces a
//! [`ParsedTemplate`] holding an ordered list of [`Instruction`]s, each
//! fragment instruction carries a [`FragmentDescriptor`], and the fetcher
//! resolves every descriptor into a [`FragmentResponse`] whose `Link` assets
//! become [`AssetEntry`] values.
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`FragmentDescriptor`] | One fragment placeholder, post attribute parsing |
//! | [`Instruction`] | A step in the ordered render plan |
//! | [`ParsedTemplate`] | Pure parse output, safe to memoize across requests |
//! | [`AssetEntry`] | A stylesheet or script discovered via `Link` headers |
//! | [`RequestContext`] | The slice of the incoming request the composer needs |
//! | [`FragmentResponse`] | Status, headers, assets, and streaming body |
//! | [`TagEvent`] | One event from a host custom-tag handler stream |

use crate::error::Result;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::HeaderMap;
use std::collections::HashMap;

/// Default headers deadline for a fragment fetch, in milliseconds.
pub const DEFAULT_FRAGMENT_TIMEOUT_MS: u64 = 3000;

/// A fragment placeholder parsed from the template.
///
/// Built once by the parser from tag attributes, then cloned and overridden
/// per request when the context provider supplies overrides, so the parsed
/// template itself is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDescriptor {
    /// Explicit `id` attribute; `None` falls back to the pipe index.
    pub id: Option<String>,
    /// Upstream URL. Required unless the tag is custom-handled.
    pub src: Option<String>,
    /// Retry URL used once after a failed fetch.
    pub fallback_src: Option<String>,
    /// The first primary fragment in parser order supplies the outer status
    /// and curated headers.
    pub primary: bool,
    /// Async fragments emit an inline placeholder; their body drains after
    /// the document body.
    pub is_async: bool,
    /// Public fragments may receive `cookie`/`authorization` headers and have
    /// their response headers filtered by the host.
    pub public: bool,
    /// Headers deadline in milliseconds.
    pub timeout_ms: u64,
    /// First pipe index of this fragment's reserved contiguous span.
    pub index: usize,
}

impl FragmentDescriptor {
    /// Build a descriptor from parsed tag attributes and a reserved index.
    ///
    /// Boolean attributes (`primary`, `async`, `public`) follow HTML
    /// semantics: present means true, whatever the value.
    pub fn from_attrs(attrs: &[(String, Option<String>)], index: usize) -> Self {
        let mut descriptor = FragmentDescriptor {
            id: None,
            src: None,
            fallback_src: None,
            primary: false,
            is_async: false,
            public: false,
            timeout_ms: DEFAULT_FRAGMENT_TIMEOUT_MS,
            index,
        };
        for (name, value) in attrs {
            descriptor.apply_attr(name, value.as_deref());
        }
        descriptor
    }

    /// Apply a single attribute, from the template or a context override.
    pub fn apply_attr(&mut self, name: &str, value: Option<&str>) {
        match name {
            "id" => self.id = value.map(str::to_string),
            "src" => self.src = value.map(str::to_string),
            "fallback-src" => self.fallback_src = value.map(str::to_string),
            "primary" => self.primary = boolean_attr(value),
            "async" => self.is_async = boolean_attr(value),
            "public" => self.public = boolean_attr(value),
            "timeout" => {
                if let Some(ms) = value.and_then(|v| v.parse().ok()) {
                    self.timeout_ms = ms;
                }
            }
            _ => {}
        }
    }

    /// Apply context overrides keyed by attribute name. Overrides win over
    /// template attributes.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, String>) {
        for (name, value) in overrides {
            self.apply_attr(name, Some(value));
        }
    }

    /// Key under which the context provider addresses this fragment:
    /// the explicit id, or the pipe index rendered as a string.
    #[must_use]
    pub fn override_key(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.index.to_string())
    }

    /// The contiguous pipe-index span `[lo, hi]` this fragment occupies given
    /// its (already capped) fragment-script count.
    #[must_use]
    pub fn index_range(&self, script_count: usize) -> (usize, usize) {
        (self.index, self.index + script_count.saturating_sub(1))
    }
}

/// HTML boolean attribute: present (with any value except explicit "false")
/// means enabled.
fn boolean_attr(value: Option<&str>) -> bool {
    !matches!(value, Some("false"))
}

/// Relation of an asset discovered through a fragment's `Link` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRel {
    /// `rel="stylesheet"` - loaded via `p.loadCSS` and preloaded as `style`.
    Stylesheet,
    /// `rel="fragment-script"` - passed to `p.start`/`p.end` and preloaded as
    /// `script`.
    FragmentScript,
}

/// One asset reference from a fragment's `Link` (or `X-AMZ-Meta-Link`) header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    /// Absolute asset URL.
    pub href: String,
    /// Stylesheet or fragment script.
    pub rel: AssetRel,
    /// True when the asset's origin differs from the incoming request's
    /// `Host`.
    pub crossorigin: bool,
}

/// A step in the parsed render plan.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Raw template bytes passed through verbatim.
    Literal(Bytes),
    /// A sync fragment: body streams at this document position.
    Fragment(FragmentDescriptor),
    /// An async fragment: a placeholder is emitted here, the body drains
    /// after the document body.
    AsyncPlaceholder(FragmentDescriptor),
    /// A tag delegated to the host's tag handler at render time.
    CustomTag {
        /// Lowercased tag name.
        name: String,
        /// Attributes in source order.
        attrs: Vec<(String, Option<String>)>,
    },
}

/// Which shell elements the source template declared.
///
/// The assembler always emits a full `<html><head><body>` shell; this records
/// what the template itself contained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellState {
    /// `<html>` appeared in the source.
    pub had_html: bool,
    /// `<head>` appeared in the source.
    pub had_head: bool,
    /// `<body>` appeared in the source.
    pub had_body: bool,
}

/// Pure output of the template parser.
///
/// Contains no per-request state, so hosts may memoize it and render it
/// concurrently; context overrides are applied to descriptor clones.
#[derive(Debug, Clone, Default)]
pub struct ParsedTemplate {
    /// Doctype line preserved ahead of `<html>`, if the template had one.
    pub doctype: Option<Bytes>,
    /// Instructions rendered inside `<head>`.
    pub head: Vec<Instruction>,
    /// Instructions rendered inside `<body>`.
    pub body: Vec<Instruction>,
    /// Shell elements present in the source.
    pub shell: ShellState,
    /// Pipe counter value after parse-time reservations; render-time dynamic
    /// fragments continue from here.
    pub next_index: usize,
    /// Host-visible parse warnings (e.g. duplicate default slot).
    pub warnings: Vec<String>,
}

impl ParsedTemplate {
    /// All fragment descriptors in parser-emission order.
    pub fn fragments(&self) -> impl Iterator<Item = &FragmentDescriptor> {
        self.head.iter().chain(self.body.iter()).filter_map(|i| match i {
            Instruction::Fragment(d) | Instruction::AsyncPlaceholder(d) => Some(d),
            _ => None,
        })
    }
}

/// Per-fragment attribute overrides supplied by the context provider, keyed
/// by fragment id.
pub type ContextOverrides = HashMap<String, HashMap<String, String>>;

/// The slice of the incoming request the composer threads through parsing,
/// fetching, and tracing.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request path and query, used as the template key and the trace URL.
    pub path: String,
    /// The incoming `Host` header, used for same-origin asset detection.
    pub host: Option<String>,
    /// All incoming headers; the fetcher forwards an allowlisted subset.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Extract the composer-relevant parts of an incoming request.
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let host = parts
            .headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        RequestContext {
            path,
            host,
            headers: parts.headers.clone(),
        }
    }
}

/// Streaming body of a fragment response, already gzip-decoded if the
/// upstream declared `content-encoding: gzip`.
pub type FragmentBody = BoxStream<'static, Result<Bytes>>;

/// A resolved fragment fetch: headers have arrived, the body is a stream.
pub struct FragmentResponse {
    /// Upstream status code.
    pub status: u16,
    /// Upstream response headers.
    pub headers: HeaderMap,
    /// Assets parsed from the `Link`/`X-AMZ-Meta-Link` header, capped per rel.
    pub assets: Vec<AssetEntry>,
    /// Decoded body stream.
    pub body: FragmentBody,
}

impl FragmentResponse {
    /// The fragment-script assets, in header order.
    pub fn scripts(&self) -> Vec<AssetEntry> {
        self.assets
            .iter()
            .filter(|a| a.rel == AssetRel::FragmentScript)
            .cloned()
            .collect()
    }

    /// The stylesheet assets, in header order.
    pub fn stylesheets(&self) -> Vec<AssetEntry> {
        self.assets
            .iter()
            .filter(|a| a.rel == AssetRel::Stylesheet)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for FragmentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentResponse")
            .field("status", &self.status)
            .field("assets", &self.assets)
            .finish_non_exhaustive()
    }
}

/// One event emitted by a host custom-tag handler.
#[derive(Debug)]
pub enum TagEvent {
    /// Bytes written straight into the output at the tag's position.
    Chunk(Bytes),
    /// A dynamically produced fragment, fetched and drained like an async
    /// fragment. The orchestrator assigns its pipe index.
    Fragment(FragmentDescriptor),
}
