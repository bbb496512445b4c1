//! Wire-level concerns shared by the fetcher and the orchestrator.
//!
//! # Module Organization
//!
//! ```text
//! protocol/
//! ├── link - Link / X-AMZ-Meta-Link asset parsing, preload formatting
//! └── pipe - pipe index planning and client-hook serialization
//! ```
//!
//! # Examples
//!
//! ```
//! use weave_axum_http::protocol::{PipePlanner, placeholder};
//!
//! let mut planner = PipePlanner::new(1);
//! let lo = planner.reserve();
//! assert_eq!(placeholder("p", lo), "<script data-pipe>p.placeholder(0)</script>");
//! ```

pub mod link;
pub mod pipe;

pub use link::{format_preload_header, fragment_assets, is_same_origin};
pub use pipe::{
    default_pipe_attributes, end_region, load_css, placeholder, start_region, PipeAttributes,
    PipePlanner,
};
