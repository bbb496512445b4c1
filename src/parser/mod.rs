//! Template parsing: tokenizer, slot composition, and instruction building.
//!
//! # Module Organization
//!
//! ```text
//! parser/
//! ├── tokenizer - byte-level tag/text tokenization
//! ├── slots     - child-template slot map
//! └── template  - instruction-list builder and shell resolution
//! ```
//!
//! Parsing is pure: [`TemplateParser::parse`] has no per-request inputs, so
//! hosts can memoize its output and render it concurrently. See
//! [`crate::server::StaticTemplates`] for the built-in memoizing source.

pub mod slots;
pub mod template;
pub mod tokenizer;

pub use slots::{build_slot_map, SlotMap, DEFAULT_SLOT};
pub use template::{ParseOptions, TemplateParser};
pub use tokenizer::{is_void_element, tokenize, Tag, TagKind, Token};
