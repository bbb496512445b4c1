//! Byte-level HTML tokenizer tuned for fragment-aware rewriting.
//!
//! This is not a full HTML5 state machine: the composer only needs to
//! recognize the tags it rewrites (`fragment`, `slot`, `script`, shell
//! elements, host-handled tags) and pass every other byte through verbatim.
//! The constraints keep tokenization fast and allocation-light:
//!
//! - Tag and attribute names are ASCII `[A-Za-z0-9:_-]`, lowercased on emit.
//! - Comments, doctypes, and processing instructions are emitted as text.
//! - `<script>`/`<style>` content is raw text scanned to the matching close
//!   tag; only ASCII whitespace is accepted between the close name and `>`.
//! - Malformed input never fails: anything that does not scan as a tag
//!   degrades to text.

use bytes::Bytes;
use memchr::memchr;

/// How a tag token was written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// `<name ...>`
    Open,
    /// `</name>`
    Close,
    /// `<name ... />`
    SelfClosing,
}

/// A recognized tag with its attributes and original bytes.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Lowercased tag name.
    pub name: String,
    /// Attributes in source order; `None` values are bare attributes.
    pub attrs: Vec<(String, Option<String>)>,
    /// Open, close, or self-closing.
    pub kind: TagKind,
    /// The tag's source bytes, `<` through `>` inclusive.
    pub raw: Bytes,
    /// Byte offset of `<` in the input.
    pub start: usize,
}

impl Tag {
    /// Value of the named attribute, if present with a value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether the named attribute is present at all, valued or bare.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n == name)
    }
}

/// One tokenizer output: verbatim text or a recognized tag.
#[derive(Debug, Clone)]
pub enum Token {
    /// A run of bytes to pass through unchanged.
    Text {
        /// The source bytes.
        raw: Bytes,
        /// Byte offset in the input.
        start: usize,
    },
    /// A recognized tag.
    Tag(Tag),
}

impl Token {
    /// Byte offset of this token in the input.
    pub fn start(&self) -> usize {
        match self {
            Token::Text { start, .. } => *start,
            Token::Tag(tag) => tag.start,
        }
    }

    /// Length of this token's source bytes.
    pub fn len(&self) -> usize {
        match self {
            Token::Text { raw, .. } => raw.len(),
            Token::Tag(tag) => tag.raw.len(),
        }
    }

    /// Whether the token covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Elements that never have a close tag.
pub fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b':' || b == b'_' || b == b'-'
}

/// Tokenize a complete template.
///
/// Infallible over arbitrary bytes; the concatenation of all token `raw`
/// slices reproduces the input exactly.
pub fn tokenize(input: &Bytes) -> Vec<Token> {
    let b = input.as_ref();
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let mut rawtext: Option<String> = None;

    while pos < b.len() {
        if let Some(name) = rawtext.take() {
            match find_rawtext_close(b, pos, name.as_bytes()) {
                Some((close_start, close_end)) => {
                    if close_start > pos {
                        tokens.push(Token::Text {
                            raw: input.slice(pos..close_start),
                            start: pos,
                        });
                    }
                    tokens.push(Token::Tag(Tag {
                        name,
                        attrs: Vec::new(),
                        kind: TagKind::Close,
                        raw: input.slice(close_start..close_end),
                        start: close_start,
                    }));
                    pos = close_end;
                }
                None => {
                    tokens.push(Token::Text {
                        raw: input.slice(pos..),
                        start: pos,
                    });
                    pos = b.len();
                }
            }
            continue;
        }

        let Some(rel) = memchr(b'<', &b[pos..]) else {
            tokens.push(Token::Text {
                raw: input.slice(pos..),
                start: pos,
            });
            break;
        };
        let lt = pos + rel;
        if lt > pos {
            tokens.push(Token::Text {
                raw: input.slice(pos..lt),
                start: pos,
            });
        }

        match scan_tag(b, lt) {
            Scan::Tag {
                name,
                attrs,
                kind,
                end,
            } => {
                if kind == TagKind::Open && (name == "script" || name == "style") {
                    rawtext = Some(name.clone());
                }
                tokens.push(Token::Tag(Tag {
                    name,
                    attrs,
                    kind,
                    raw: input.slice(lt..end),
                    start: lt,
                }));
                pos = end;
            }
            Scan::Markup { end } => {
                tokens.push(Token::Text {
                    raw: input.slice(lt..end),
                    start: lt,
                });
                pos = end;
            }
            Scan::NotATag => {
                tokens.push(Token::Text {
                    raw: input.slice(lt..lt + 1),
                    start: lt,
                });
                pos = lt + 1;
            }
            Scan::Truncated => {
                tokens.push(Token::Text {
                    raw: input.slice(lt..),
                    start: lt,
                });
                pos = b.len();
            }
        }
    }

    tokens
}

enum Scan {
    Tag {
        name: String,
        attrs: Vec<(String, Option<String>)>,
        kind: TagKind,
        end: usize,
    },
    /// Comment, doctype, or processing instruction: passed through as text.
    Markup { end: usize },
    NotATag,
    Truncated,
}

/// Attempt to scan a tag starting at `b[lt] == '<'`.
fn scan_tag(b: &[u8], lt: usize) -> Scan {
    let len = b.len();
    if lt + 1 >= len {
        return Scan::Truncated;
    }
    match b[lt + 1] {
        b'!' => {
            if b[lt + 1..].starts_with(b"!--") {
                // comment: scan to -->
                let mut i = lt + 4;
                while i + 3 <= len {
                    if &b[i..i + 3] == b"-->" {
                        return Scan::Markup { end: i + 3 };
                    }
                    i += 1;
                }
                Scan::Truncated
            } else {
                match memchr(b'>', &b[lt..]) {
                    Some(rel) => Scan::Markup { end: lt + rel + 1 },
                    None => Scan::Truncated,
                }
            }
        }
        b'?' => match memchr(b'>', &b[lt..]) {
            Some(rel) => Scan::Markup { end: lt + rel + 1 },
            None => Scan::Truncated,
        },
        b'/' => {
            let mut i = lt + 2;
            let name = take_name(b, &mut i);
            if name.is_empty() {
                return Scan::NotATag;
            }
            while i < len && b[i] != b'>' {
                i += 1;
            }
            if i >= len {
                return Scan::Truncated;
            }
            Scan::Tag {
                name,
                attrs: Vec::new(),
                kind: TagKind::Close,
                end: i + 1,
            }
        }
        c if c.is_ascii_alphabetic() => {
            let mut i = lt + 1;
            let name = take_name(b, &mut i);
            let mut attrs = Vec::new();
            loop {
                while i < len && b[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i >= len {
                    return Scan::Truncated;
                }
                if b[i] == b'>' {
                    return Scan::Tag {
                        name,
                        attrs,
                        kind: TagKind::Open,
                        end: i + 1,
                    };
                }
                if b[i] == b'/' {
                    if i + 1 < len && b[i + 1] == b'>' {
                        return Scan::Tag {
                            name,
                            attrs,
                            kind: TagKind::SelfClosing,
                            end: i + 2,
                        };
                    }
                    i += 1;
                    continue;
                }
                let attr_name = take_name(b, &mut i);
                if attr_name.is_empty() {
                    i += 1;
                    continue;
                }
                while i < len && b[i].is_ascii_whitespace() {
                    i += 1;
                }
                let value = if i < len && b[i] == b'=' {
                    i += 1;
                    while i < len && b[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    match take_value(b, &mut i) {
                        Some(v) => Some(v),
                        None => return Scan::Truncated,
                    }
                } else {
                    None
                };
                attrs.push((attr_name, value));
            }
        }
        _ => Scan::NotATag,
    }
}

fn take_name(b: &[u8], i: &mut usize) -> String {
    let start = *i;
    while *i < b.len() && is_name_byte(b[*i]) {
        *i += 1;
    }
    String::from_utf8_lossy(&b[start..*i]).to_ascii_lowercase()
}

fn take_value(b: &[u8], i: &mut usize) -> Option<String> {
    let len = b.len();
    if *i >= len {
        return None;
    }
    let quote = b[*i];
    if quote == b'"' || quote == b'\'' {
        *i += 1;
        let rel = memchr(quote, &b[*i..])?;
        let value = String::from_utf8_lossy(&b[*i..*i + rel]).into_owned();
        *i += rel + 1;
        Some(value)
    } else {
        let start = *i;
        while *i < len && !b[*i].is_ascii_whitespace() && b[*i] != b'>' && b[*i] != b'/' {
            *i += 1;
        }
        Some(String::from_utf8_lossy(&b[start..*i]).into_owned())
    }
}

/// Find `</name ...>` at or after `from`, case-insensitive on the name.
///
/// Returns the close tag's byte range. Only ASCII whitespace is accepted
/// between the name and `>`.
fn find_rawtext_close(b: &[u8], from: usize, name: &[u8]) -> Option<(usize, usize)> {
    let len = b.len();
    let mut i = from;
    while i + 2 + name.len() <= len {
        let rel = memchr(b'<', &b[i..])?;
        i += rel;
        if i + 2 + name.len() > len {
            return None;
        }
        if b[i + 1] == b'/' && b[i + 2..i + 2 + name.len()].eq_ignore_ascii_case(name) {
            let mut k = i + 2 + name.len();
            while k < len && b[k].is_ascii_whitespace() {
                k += 1;
            }
            if k < len && b[k] == b'>' {
                return Some((i, k + 1));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(input: &str) -> Vec<Token> {
        tokenize(&Bytes::copy_from_slice(input.as_bytes()))
    }

    fn roundtrip(input: &str) -> String {
        let mut out = Vec::new();
        for t in toks(input) {
            match t {
                Token::Text { raw, .. } => out.extend_from_slice(&raw),
                Token::Tag(tag) => out.extend_from_slice(&tag.raw),
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_text_and_tags() {
        let tokens = toks("before<div class=\"x\">inside</div>after");
        assert_eq!(tokens.len(), 5);
        match &tokens[1] {
            Token::Tag(tag) => {
                assert_eq!(tag.name, "div");
                assert_eq!(tag.kind, TagKind::Open);
                assert_eq!(tag.attr("class"), Some("x"));
            }
            other => panic!("expected tag, got {:?}", other),
        }
        match &tokens[3] {
            Token::Tag(tag) => assert_eq!(tag.kind, TagKind::Close),
            other => panic!("expected close tag, got {:?}", other),
        }
    }

    #[test]
    fn test_self_closing_and_bare_attrs() {
        let tokens = toks("<fragment src=\"http://a/1\" primary async/>");
        let Token::Tag(tag) = &tokens[0] else {
            panic!("expected tag");
        };
        assert_eq!(tag.kind, TagKind::SelfClosing);
        assert_eq!(tag.attr("src"), Some("http://a/1"));
        assert!(tag.has_attr("primary"));
        assert!(tag.has_attr("async"));
        assert_eq!(tag.attr("primary"), None);
    }

    #[test]
    fn test_unquoted_and_single_quoted_values() {
        let tokens = toks("<meta charset=utf-8 name='x y'>");
        let Token::Tag(tag) = &tokens[0] else {
            panic!("expected tag");
        };
        assert_eq!(tag.attr("charset"), Some("utf-8"));
        assert_eq!(tag.attr("name"), Some("x y"));
    }

    #[test]
    fn test_script_rawtext() {
        let tokens = toks("<script>if (a < b) { run(); }</script>tail");
        assert_eq!(tokens.len(), 4);
        match &tokens[1] {
            Token::Text { raw, .. } => {
                assert_eq!(raw.as_ref(), b"if (a < b) { run(); }");
            }
            other => panic!("expected rawtext, got {:?}", other),
        }
        match &tokens[2] {
            Token::Tag(tag) => {
                assert_eq!(tag.name, "script");
                assert_eq!(tag.kind, TagKind::Close);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_comment_and_doctype_are_text() {
        let tokens = toks("<!DOCTYPE html><!-- a <fragment> in a comment --><p>");
        match &tokens[0] {
            Token::Text { raw, .. } => assert_eq!(raw.as_ref(), b"<!DOCTYPE html>"),
            other => panic!("expected text, got {:?}", other),
        }
        match &tokens[1] {
            Token::Text { raw, .. } => {
                assert!(raw.starts_with(b"<!--"));
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_stray_angle_degrades_to_text() {
        assert_eq!(roundtrip("a < b and c > d"), "a < b and c > d");
        assert_eq!(roundtrip("<123>"), "<123>");
    }

    #[test]
    fn test_unterminated_tag_degrades_to_text() {
        assert_eq!(roundtrip("text <div class=\"x"), "text <div class=\"x");
    }

    #[test]
    fn test_roundtrip_preserves_bytes() {
        let input = "<html><head><title>t</title></head><body>x &amp; y</body></html>";
        assert_eq!(roundtrip(input), input);
    }

    #[test]
    fn test_void_elements() {
        assert!(is_void_element("meta"));
        assert!(is_void_element("br"));
        assert!(!is_void_element("div"));
        assert!(!is_void_element("fragment"));
    }
}
