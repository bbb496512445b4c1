#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # Streaming composition model
//!
//! A request flows through three subsystems:
//!
//! 1. **Parse** - the template source resolves the request to template bytes
//!    and the parser flattens them into an ordered instruction list
//!    ([`ParsedTemplate`]). Parsing is pure and memoizable.
//! 2. **Orchestrate** - every fragment fetch is spawned eagerly. The first
//!    primary fragment's headers decide the outer status; then the render
//!    walk streams sync bodies in document order and queues async bodies for
//!    the drain region.
//! 3. **Assemble** - output bytes flow through a channel into the response
//!    body: shell, head content, runtime scripts, body content, drained
//!    async regions, closing tags.
//!
//! ## Streaming guarantees
//!
//! - The client receives the shell and each sync fragment's bytes as they
//!   arrive; the page is never buffered whole.
//! - Sync fragment bytes appear in document order; a slow fragment at
//!   position *i* delays positions after *i* but nothing before it.
//! - Async fragment bodies appear after the document body in completion
//!   order, bracketed by the same hooks, and are stitched into their inline
//!   placeholders by the client runtime.
//! - Every fragment region is bracketed by `start`/`end` hooks (or a
//!   placeholder), even on failure, so client-side bookkeeping always
//!   completes.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use weave_axum_http::{Composer, ComposerConfig, StaticTemplates};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut templates = StaticTemplates::new();
//!     templates.insert(
//!         "/",
//!         "<html><body>\
//!          <fragment src=\"http://fragments.local/header\"></fragment>\
//!          <fragment async src=\"http://fragments.local/feed\"></fragment>\
//!          </body></html>",
//!     );
//!
//!     let composer = Arc::new(Composer::new(
//!         ComposerConfig::default(),
//!         Arc::new(templates),
//!     ));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     axum::serve(listener, composer.router()).await.unwrap();
//! }
//! ```
//!
//! ## Module Structure
//!
//! - **[types]** - descriptors, instructions, parsed templates
//! - **[error]** - error types and result handling
//! - **[parser]** - tokenizer, slots, instruction building
//! - **[protocol]** - `Link` asset parsing, pipe hooks and indices
//! - **[client]** - upstream fetching, timeouts, fallback, gzip
//! - **[server]** - orchestration, assembly, Axum integration
//! - **[trace]** - request and fragment spans

pub mod client;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod server;
pub mod trace;
pub mod types;

pub use client::{ClientConfig, FragmentClient};
pub use error::{Result, WeaveError};
pub use parser::{ParseOptions, TemplateParser};
pub use server::{
    Composer, ComposerConfig, ContextProvider, NoContext, NoTagHandler, StaticContext,
    StaticTemplates, TagHandler, TemplateSource,
};
pub use types::{
    AssetEntry, AssetRel, ContextOverrides, FragmentDescriptor, FragmentResponse, Instruction,
    ParsedTemplate, RequestContext, TagEvent,
};
