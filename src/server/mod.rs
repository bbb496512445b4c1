//! Server-side composition: orchestration, assembly, and Axum integration.
//!
//! # Module Organization
//!
//! ```text
//! server/
//! ├── config       - ComposerConfig, host collaborator traits, built-ins
//! ├── orchestrator - render walk, primary propagation, drain queue
//! ├── assembler    - output channel and document shell
//! └── handler      - Composer and router wiring
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Composer`] | Ties everything together; one per service |
//! | [`ComposerConfig`] | Every host option |
//! | [`StaticTemplates`] | Built-in memoizing template source |
//! | [`TemplateSource`] | Where templates come from |
//! | [`ContextProvider`] | Per-request fragment overrides |
//! | [`TagHandler`] | Host-rendered custom tags |

mod assembler;
mod config;
mod handler;
mod orchestrator;

pub use config::{
    default_filter_response_headers, ComposerConfig, ContextProvider, FilterResponseHeadersFn,
    NoContext, NoTagHandler, PipeAttributesFn, StaticContext, StaticTemplates, TagHandler,
    TemplateSource,
};
pub use handler::Composer;
