//! Child-template slot composition.
//!
//! A child template's top-level nodes are grouped by their `slot` attribute;
//! nodes without one form the default slot. The template parser substitutes
//! these node groups into matching `<slot>` elements of the base template.

use crate::parser::tokenizer::{is_void_element, tokenize, Tag, TagKind, Token};
use bytes::Bytes;
use std::collections::HashMap;

/// Name used for the unnamed slot.
pub const DEFAULT_SLOT: &str = "default";

/// Slot name to the ordered child nodes targeted at it, each node kept as its
/// original bytes (open tag through matching close tag).
pub type SlotMap = HashMap<String, Vec<Bytes>>;

/// Group a child template's top-level nodes by slot name.
///
/// Top-level text runs that are not pure whitespace join the default slot.
/// An element whose close tag never appears extends to the end of the input.
pub fn build_slot_map(child: &Bytes) -> SlotMap {
    let tokens = tokenize(child);
    let mut map: SlotMap = HashMap::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Text { raw, start } => {
                if !raw.iter().all(u8::is_ascii_whitespace) {
                    let node = child.slice(*start..*start + raw.len());
                    map.entry(DEFAULT_SLOT.to_string()).or_default().push(node);
                }
                i += 1;
            }
            Token::Tag(tag) if tag.kind != TagKind::Close => {
                let slot = tag
                    .attr("slot")
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_SLOT)
                    .to_string();
                let (end, next) = node_end(&tokens, i, tag, child.len());
                map.entry(slot).or_default().push(child.slice(tag.start..end));
                i = next;
            }
            // Stray close tag at the top level: not a node.
            Token::Tag(_) => {
                i += 1;
            }
        }
    }

    map
}

/// Byte end of the node opened at `tokens[i]`, and the index of the token
/// after it.
fn node_end(tokens: &[Token], i: usize, tag: &Tag, input_len: usize) -> (usize, usize) {
    if tag.kind == TagKind::SelfClosing || is_void_element(&tag.name) {
        return (tag.start + tag.raw.len(), i + 1);
    }
    let mut depth = 1usize;
    let mut j = i + 1;
    while j < tokens.len() {
        if let Token::Tag(t) = &tokens[j] {
            if t.name == tag.name {
                match t.kind {
                    TagKind::Open => depth += 1,
                    TagKind::Close => {
                        depth -= 1;
                        if depth == 0 {
                            return (t.start + t.raw.len(), j + 1);
                        }
                    }
                    TagKind::SelfClosing => {}
                }
            }
        }
        j += 1;
    }
    (input_len, tokens.len())
}
