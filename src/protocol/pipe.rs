//! Pipe index planning and client-hook serialization.
//!
//! Every fragment region in the output is bracketed by calls into the
//! client-side pipe runtime: `start`/`end` around sync bodies, `placeholder`
//! for async fragments, and `loadCSS` per stylesheet. The hooks carry stable
//! integer indices so the browser can match a drained async body back to its
//! reserved slot.
//!
//! # Hook Formats
//!
//! | Region | Bytes |
//! |--------|-------|
//! | Sync, no script | `<script data-pipe>p.start(i)</script>BODY<script data-pipe>p.end(i)</script>` |
//! | Sync, N scripts | N nested `p.start(i, "url", attrs)` calls, body, N `p.end` in reverse |
//! | Async inline | `<script data-pipe>p.placeholder(i)</script>` |
//! | Stylesheet | `<script>p.loadCSS("href")</script>` |
//!
//! The attribute object serializes with insertion-order keys
//! (`{"id":…,"range":[lo,hi]}`); callers that assert literal output bytes
//! rely on that ordering.

use crate::types::{AssetEntry, FragmentDescriptor};
use serde_json::{json, Map, Value};

/// Attribute object passed as the third argument of `start`/`end` hooks.
pub type PipeAttributes = Map<String, Value>;

/// Allocates pipe indices in parser-emission order.
///
/// Each fragment reserves a fixed-width contiguous span of
/// `max(1, maxAssetLinks)` indices, so a fragment's extra script assets get
/// their own indices and the spans of consecutive fragments never overlap.
/// Reservation width is independent of any upstream response, which keeps
/// index assignment deterministic before any fetch resolves.
#[derive(Debug, Clone)]
pub struct PipePlanner {
    next: usize,
    step: usize,
}

impl PipePlanner {
    /// Planner starting at index 0 with the given per-fragment span width.
    #[must_use]
    pub fn new(max_asset_links: usize) -> Self {
        PipePlanner {
            next: 0,
            step: max_asset_links.max(1),
        }
    }

    /// Planner resuming from a previous counter value, used for fragments
    /// discovered at render time.
    #[must_use]
    pub fn resume(next: usize, max_asset_links: usize) -> Self {
        PipePlanner {
            next,
            step: max_asset_links.max(1),
        }
    }

    /// Reserve the next span and return its first index.
    pub fn reserve(&mut self) -> usize {
        let lo = self.next;
        self.next += self.step;
        lo
    }

    /// Counter value after all reservations so far.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next
    }
}

/// Default attribute object: `{"id":…,"range":[lo,hi]}`.
///
/// `id` is the descriptor's explicit id as a JSON string, or the fragment's
/// first index as a JSON integer.
pub fn default_pipe_attributes(
    descriptor: &FragmentDescriptor,
    range: (usize, usize),
) -> PipeAttributes {
    let mut attrs = Map::new();
    let id = match &descriptor.id {
        Some(id) => Value::String(id.clone()),
        None => json!(range.0),
    };
    attrs.insert("id".to_string(), id);
    attrs.insert("range".to_string(), json!([range.0, range.1]));
    attrs
}

fn json_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn json_obj(attrs: &PipeAttributes) -> String {
    serde_json::to_string(attrs).unwrap_or_else(|_| "{}".to_string())
}

/// Opening hooks for a fragment region starting at index `lo`.
///
/// With no script assets this is a single bare `start` call; with N scripts
/// it is N nested calls, one per script, at indices `lo..lo+N`.
pub fn start_region(
    instance: &str,
    lo: usize,
    scripts: &[AssetEntry],
    attrs: &PipeAttributes,
) -> String {
    if scripts.is_empty() {
        return format!("<script data-pipe>{instance}.start({lo})</script>");
    }
    let mut out = String::new();
    for (i, script) in scripts.iter().enumerate() {
        out.push_str(&format!(
            "<script data-pipe>{instance}.start({}, {}, {})</script>",
            lo + i,
            json_str(&script.href),
            json_obj(attrs),
        ));
    }
    out
}

/// Closing hooks matching [`start_region`], in reverse index order.
pub fn end_region(
    instance: &str,
    lo: usize,
    scripts: &[AssetEntry],
    attrs: &PipeAttributes,
) -> String {
    if scripts.is_empty() {
        return format!("<script data-pipe>{instance}.end({lo})</script>");
    }
    let mut out = String::new();
    for (i, script) in scripts.iter().enumerate().rev() {
        out.push_str(&format!(
            "<script data-pipe>{instance}.end({}, {}, {})</script>",
            lo + i,
            json_str(&script.href),
            json_obj(attrs),
        ));
    }
    out
}

/// Inline placeholder for an async fragment.
pub fn placeholder(instance: &str, lo: usize) -> String {
    format!("<script data-pipe>{instance}.placeholder({lo})</script>")
}

/// Stylesheet load call.
pub fn load_css(instance: &str, href: &str) -> String {
    format!("<script>{instance}.loadCSS({})</script>", json_str(href))
}
