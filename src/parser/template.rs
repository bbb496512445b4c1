//! Template parsing: tokens to an ordered instruction list.
//!
//! The parser walks the tokenizer's output once, maintaining the current
//! container sink (`head` or `body`) and substituting slots from the child
//! template as it goes. Parsing is pure and infallible: the same template
//! bytes always produce the same [`ParsedTemplate`], context overrides are
//! applied later to descriptor clones, and malformed HTML degrades to
//! literal passthrough.
//!
//! # Tag handling
//!
//! - `<fragment …>` and `<script type="fragment" src="…">` become fragment
//!   instructions; the script form is always placed in `<head>`.
//! - Fragments nested inside a fragment's subtree are flattened to siblings;
//!   the outer fragment's other children are discarded.
//! - `<slot name="…">` and `<script type="slot" name="…">` are replaced by
//!   the child template's matching nodes, or by their own children when
//!   nothing matches. Only the first default slot is honored.
//! - Tags listed in [`ParseOptions::handled_tags`] become
//!   [`Instruction::CustomTag`].
//! - Shell elements are consumed here and re-synthesized by the assembler.
//! - Everything else coalesces into literal runs.

use crate::parser::slots::{build_slot_map, SlotMap, DEFAULT_SLOT};
use crate::parser::tokenizer::{tokenize, Tag, TagKind, Token};
use crate::protocol::pipe::PipePlanner;
use crate::types::{FragmentDescriptor, Instruction, ParsedTemplate, ShellState};
use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// Parser configuration derived from the host configuration.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Tag names delegated to the host's tag handler.
    pub handled_tags: Vec<String>,
    /// Per-fragment pipe-index span width; mirrors the asset-link cap.
    pub max_asset_links: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            handled_tags: Vec::new(),
            max_asset_links: 1,
        }
    }
}

/// The template parser. Cheap to clone; holds only configuration.
#[derive(Debug, Clone, Default)]
pub struct TemplateParser {
    opts: ParseOptions,
}

impl TemplateParser {
    /// Parser with the given options.
    #[must_use]
    pub fn new(opts: ParseOptions) -> Self {
        TemplateParser { opts }
    }

    /// Parse a base template and an optional child template into an
    /// instruction list.
    pub fn parse(&self, base: &[u8], child: Option<&[u8]>) -> ParsedTemplate {
        let input = Bytes::copy_from_slice(base);
        let slots = match child {
            Some(bytes) => build_slot_map(&Bytes::copy_from_slice(bytes)),
            None => SlotMap::new(),
        };
        let mut builder = Builder {
            opts: &self.opts,
            planner: PipePlanner::new(self.opts.max_asset_links),
            slots,
            doctype: None,
            head: Vec::new(),
            body: Vec::new(),
            head_lit: BytesMut::new(),
            body_lit: BytesMut::new(),
            in_head: false,
            shell: ShellState::default(),
            warnings: Vec::new(),
            default_slot_done: false,
            saw_content: false,
        };
        let tokens = tokenize(&input);
        builder.walk(&tokens);
        builder.finish()
    }
}

struct Builder<'a> {
    opts: &'a ParseOptions,
    planner: PipePlanner,
    slots: SlotMap,
    doctype: Option<Bytes>,
    head: Vec<Instruction>,
    body: Vec<Instruction>,
    head_lit: BytesMut,
    body_lit: BytesMut,
    in_head: bool,
    shell: ShellState,
    warnings: Vec<String>,
    default_slot_done: bool,
    saw_content: bool,
}

impl Builder<'_> {
    fn walk(&mut self, tokens: &[Token]) {
        let mut i = 0;
        while i < tokens.len() {
            i = self.step(tokens, i);
        }
    }

    fn step(&mut self, tokens: &[Token], i: usize) -> usize {
        match &tokens[i] {
            Token::Text { raw, .. } => {
                if self.doctype.is_none() && !self.saw_content && is_doctype(raw) {
                    self.doctype = Some(raw.clone());
                } else {
                    if !raw.iter().all(u8::is_ascii_whitespace) {
                        self.saw_content = true;
                    }
                    self.lit().extend_from_slice(raw);
                }
                i + 1
            }
            Token::Tag(tag) => self.step_tag(tokens, i, tag),
        }
    }

    fn step_tag(&mut self, tokens: &[Token], i: usize, tag: &Tag) -> usize {
        match tag.name.as_str() {
            "html" => {
                if tag.kind != TagKind::Close {
                    self.shell.had_html = true;
                }
                i + 1
            }
            "head" => {
                match tag.kind {
                    TagKind::Open => {
                        self.flush_current();
                        self.shell.had_head = true;
                        self.in_head = true;
                    }
                    TagKind::Close => {
                        self.flush_current();
                        self.in_head = false;
                    }
                    TagKind::SelfClosing => self.shell.had_head = true,
                }
                i + 1
            }
            "body" => {
                if tag.kind == TagKind::Open {
                    self.shell.had_body = true;
                    if self.in_head {
                        self.flush_current();
                        self.in_head = false;
                    }
                }
                i + 1
            }
            "fragment" => self.step_fragment(tokens, i, tag),
            "slot" => self.step_slot(tokens, i, tag),
            "script" => self.step_script(tokens, i, tag),
            name => {
                if self.opts.handled_tags.iter().any(|t| t == name) {
                    if tag.kind != TagKind::Close {
                        self.saw_content = true;
                        self.push(
                            Instruction::CustomTag {
                                name: tag.name.clone(),
                                attrs: tag.attrs.clone(),
                            },
                            self.in_head,
                        );
                    }
                    i + 1
                } else {
                    self.saw_content = true;
                    self.lit().extend_from_slice(&tag.raw);
                    i + 1
                }
            }
        }
    }

    /// Emit the fragment instruction, then consume its subtree flattening
    /// nested fragments to siblings. Ordering stays left-to-right depth-first.
    fn step_fragment(&mut self, tokens: &[Token], i: usize, tag: &Tag) -> usize {
        if tag.kind == TagKind::Close {
            return i + 1;
        }
        self.emit_fragment(tag, self.in_head);
        if tag.kind == TagKind::SelfClosing {
            return i + 1;
        }
        let mut depth = 1usize;
        let mut j = i + 1;
        while j < tokens.len() && depth > 0 {
            if let Token::Tag(t) = &tokens[j] {
                if t.name == "fragment" {
                    match t.kind {
                        TagKind::Open => {
                            self.emit_fragment(t, self.in_head);
                            depth += 1;
                        }
                        TagKind::SelfClosing => self.emit_fragment(t, self.in_head),
                        TagKind::Close => depth -= 1,
                    }
                }
            }
            j += 1;
        }
        j
    }

    fn emit_fragment(&mut self, tag: &Tag, to_head: bool) {
        let descriptor = FragmentDescriptor::from_attrs(&tag.attrs, self.planner.reserve());
        let instruction = if descriptor.is_async {
            Instruction::AsyncPlaceholder(descriptor)
        } else {
            Instruction::Fragment(descriptor)
        };
        self.saw_content = true;
        self.push(instruction, to_head);
    }

    fn step_script(&mut self, tokens: &[Token], i: usize, tag: &Tag) -> usize {
        if tag.kind == TagKind::Close {
            self.lit().extend_from_slice(&tag.raw);
            return i + 1;
        }
        match tag.attr("type") {
            Some("fragment") => {
                // Positioned into <head> regardless of source position.
                self.emit_fragment(tag, true);
                let (_, next) = script_content(tokens, i, tag.kind);
                next
            }
            Some("slot") => {
                let (content, next) = script_content(tokens, i, tag.kind);
                self.substitute_slot(tag, tokens, content, next)
            }
            _ => {
                self.saw_content = true;
                self.lit().extend_from_slice(&tag.raw);
                i + 1
            }
        }
    }

    fn step_slot(&mut self, tokens: &[Token], i: usize, tag: &Tag) -> usize {
        match tag.kind {
            TagKind::Close => i + 1,
            TagKind::SelfClosing => self.substitute_slot(tag, tokens, 0..0, i + 1),
            TagKind::Open => {
                let mut depth = 1usize;
                let mut j = i + 1;
                while j < tokens.len() {
                    if let Token::Tag(t) = &tokens[j] {
                        if t.name == "slot" {
                            match t.kind {
                                TagKind::Open => depth += 1,
                                TagKind::Close => {
                                    depth -= 1;
                                    if depth == 0 {
                                        break;
                                    }
                                }
                                TagKind::SelfClosing => {}
                            }
                        }
                    }
                    j += 1;
                }
                let next = if j < tokens.len() { j + 1 } else { j };
                self.substitute_slot(tag, tokens, (i + 1)..j, next)
            }
        }
    }

    /// Replace a slot element with the child template's matched nodes, or
    /// with its own children when nothing matched.
    fn substitute_slot(
        &mut self,
        tag: &Tag,
        tokens: &[Token],
        fallback: Range<usize>,
        next: usize,
    ) -> usize {
        let name = tag
            .attr("name")
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_SLOT)
            .to_string();
        if name == DEFAULT_SLOT {
            if self.default_slot_done {
                tracing::warn!(slot = %name, "duplicate default slot ignored");
                self.warnings
                    .push("duplicate default slot ignored".to_string());
                return next;
            }
            self.default_slot_done = true;
        }
        let matched = self
            .slots
            .get(&name)
            .filter(|nodes| !nodes.is_empty())
            .cloned();
        match matched {
            Some(nodes) => {
                for node in nodes {
                    let node_tokens = tokenize(&node);
                    self.walk(&node_tokens);
                }
                next
            }
            None => {
                let mut k = fallback.start;
                while k < fallback.end {
                    k = self.step(tokens, k);
                }
                next
            }
        }
    }

    fn lit(&mut self) -> &mut BytesMut {
        if self.in_head {
            &mut self.head_lit
        } else {
            &mut self.body_lit
        }
    }

    fn flush_current(&mut self) {
        if self.in_head {
            flush(&mut self.head_lit, &mut self.head);
        } else {
            flush(&mut self.body_lit, &mut self.body);
        }
    }

    fn push(&mut self, instruction: Instruction, to_head: bool) {
        if to_head {
            flush(&mut self.head_lit, &mut self.head);
            self.head.push(instruction);
        } else {
            flush(&mut self.body_lit, &mut self.body);
            self.body.push(instruction);
        }
    }

    fn finish(mut self) -> ParsedTemplate {
        flush(&mut self.head_lit, &mut self.head);
        flush(&mut self.body_lit, &mut self.body);
        ParsedTemplate {
            doctype: self.doctype,
            head: self.head,
            body: self.body,
            shell: self.shell,
            next_index: self.planner.next_index(),
            warnings: self.warnings,
        }
    }
}

fn flush(lit: &mut BytesMut, sink: &mut Vec<Instruction>) {
    if !lit.is_empty() {
        sink.push(Instruction::Literal(lit.split().freeze()));
    }
}

/// Raw content token range and next-token index for a script element.
fn script_content(tokens: &[Token], i: usize, kind: TagKind) -> (Range<usize>, usize) {
    if kind == TagKind::SelfClosing {
        return (0..0, i + 1);
    }
    let start = i + 1;
    let mut j = start;
    while j < tokens.len() && matches!(tokens[j], Token::Text { .. }) {
        j += 1;
    }
    let content = start..j;
    // Skip the close tag the tokenizer emitted after the rawtext span.
    if j < tokens.len() {
        if let Token::Tag(t) = &tokens[j] {
            if t.name == "script" && t.kind == TagKind::Close {
                j += 1;
            }
        }
    }
    (content, j)
}

fn is_doctype(raw: &Bytes) -> bool {
    let trimmed: Vec<u8> = raw
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .copied()
        .collect();
    trimmed.len() >= 9 && trimmed[..9].eq_ignore_ascii_case(b"<!doctype")
}
