//! Fragment fetching: upstream HTTP calls, timeouts, fallbacks, and gzip.
//!
//! # Module Organization
//!
//! ```text
//! client/
//! ├── fetch  - FragmentClient and the forwarding policy
//! ├── decode - streaming gzip decode
//! └── config - client configuration
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`FragmentClient`] | Pooled upstream HTTP client |
//! | [`GzipDecodeStream`] | Inflating body-stream adapter |
//! | [`ClientConfig`] | Forwarding policy and pool knobs |

mod config;
mod decode;
mod fetch;

pub use config::ClientConfig;
pub use decode::GzipDecodeStream;
pub use fetch::{forward_headers, FragmentClient};
