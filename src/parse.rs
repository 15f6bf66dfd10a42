//! Markup parser.
//!
//! Hand-written, span-exact recursive descent over the component source. Every
//! character at the top level belongs to exactly one node, so slicing the source
//! by the root's children reproduces it. Expression regions are delegated to
//! [`crate::expression::read_expression`], which reports where scanning resumes.
//!
//! Template errors abort template parsing. Script and style regions are checked
//! independently and their errors are batched with the first template error.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::ast::{
    Ast, Attribute, AttributeChunk, AttributeValue, AwaitBlock, Comment, DebugTag, Directive,
    DirectiveKind, EachBlock, EachContext, Element, ExprId, IfBlock, NodeId, NodeKind, Script,
    ScriptContext, Span, StyleBlock, Text,
};
use crate::diagnostic::*;
use crate::expression::{
    analyze_expression, pattern_names, read_expression, scan_expression_end, ExprShape, Stop,
};
use crate::style::{parse_stylesheet, Stylesheet};

lazy_static! {
    static ref ENTITY_RE: Regex = Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap();

    /// Fallback region scan used after a template error.
    static ref SCRIPT_RE: Regex = Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").unwrap();
    static ref STYLE_RE: Regex = Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>").unwrap();
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub const EVENT_MODIFIERS: &[&str] = &[
    "preventDefault",
    "stopPropagation",
    "once",
    "capture",
    "passive",
    "self",
];

/// Namespaced attribute prefixes that are not directives.
const ATTRIBUTE_NAMESPACES: &[&str] = &["xlink", "xml", "xmlns"];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str())
}

pub fn is_component_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_uppercase()) || name.contains('.')
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    "copy" => Some('©'),
                    "hellip" => Some('…'),
                    "mdash" => Some('—'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .to_string()
}

/// Parse a component source into its structural tree.
pub fn parse(source: &str) -> Result<Ast, Vec<CompilerError>> {
    let mut parser = TemplateParser::new(source);
    let template = parser.parse_root();
    let mut errors = std::mem::take(&mut parser.region_errors);
    if let Err(err) = template {
        errors.extend(parser.recover_regions());
        errors.push(err);
    }
    if errors.is_empty() {
        Ok(parser.ast)
    } else {
        errors.sort_by_key(|e| e.offset);
        Err(errors)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER STATE
// ═══════════════════════════════════════════════════════════════════════════════

enum Terminator {
    Eof,
    CloseTag { name: String, start: usize },
    BlockClose { name: String, start: usize },
    Continuation { keyword: String, start: usize },
}

#[derive(Clone, Copy, PartialEq)]
enum AwaitPhase {
    Pending,
    Then,
    Catch,
}

struct TemplateParser<'s> {
    source: &'s str,
    pos: usize,
    ast: Ast,
    /// Start offsets of script/style regions already checked.
    checked_regions: HashSet<usize>,
    region_errors: Vec<CompilerError>,
}

impl<'s> TemplateParser<'s> {
    fn new(source: &'s str) -> Self {
        TemplateParser {
            source,
            pos: 0,
            ast: Ast::new(source),
            checked_regions: HashSet::new(),
            region_errors: Vec::new(),
        }
    }

    fn rest(&self) -> &'s str {
        let source = self.source;
        &source[self.pos..]
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Consume `keyword` when followed by whitespace or `}`.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let rest = self.rest();
        let Some(after) = rest.strip_prefix(keyword) else {
            return false;
        };
        if after.starts_with(|c: char| c.is_whitespace() || c == '}') {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &str, code: &str, message: &str) -> Result<(), CompilerError> {
        if self.eat(s) {
            return Ok(());
        }
        if self.pos >= self.source.len() {
            return Err(CompilerError::syntax(ERR_UNEXPECTED_EOF, "Unexpected end of input", self.pos));
        }
        Err(CompilerError::syntax(code, message, self.pos))
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn read_while(&mut self, first: impl Fn(char) -> bool, next: impl Fn(char) -> bool) -> Option<String> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if first(c) => {}
            _ => return None,
        }
        let end = chars.find(|(_, c)| !next(*c)).map_or(rest.len(), |(i, _)| i);
        self.pos += end;
        Some(rest[..end].to_string())
    }

    fn read_identifier(&mut self) -> Option<String> {
        self.read_while(
            |c| c.is_alphabetic() || c == '_' || c == '$',
            |c| c.is_alphanumeric() || c == '_' || c == '$',
        )
    }

    fn read_tag_name(&mut self) -> Option<String> {
        self.read_while(
            |c| c.is_ascii_alphabetic(),
            |c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':' | '_'),
        )
    }

    fn expression(&mut self, stop: Stop, owner: NodeId) -> Result<ExprId, CompilerError> {
        let parsed = read_expression(self.source, self.pos, stop)?;
        self.pos = parsed.end;
        Ok(self.ast.add_expr(parsed.span, parsed.source, parsed.info, owner))
    }

    fn close_brace(&mut self, context: &str) -> Result<(), CompilerError> {
        self.skip_ws();
        self.expect("}", ERR_INVALID_EXPRESSION, &format!("Expected `}}` to close {}", context))
    }

    fn set_end(&mut self, id: NodeId) {
        self.ast.node_mut(id).span.end = self.pos;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRAGMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn parse_root(&mut self) -> Result<(), CompilerError> {
        let root = self.ast.root;
        match self.parse_children(root)? {
            Terminator::Eof => Ok(()),
            Terminator::CloseTag { name, start } => Err(stray_close_tag(&name, start)),
            Terminator::BlockClose { name, start } => Err(CompilerError::syntax(
                ERR_UNEXPECTED_BLOCK_CLOSE,
                format!("Unexpected {{/{}}}: no block is open", name),
                start,
            )),
            Terminator::Continuation { keyword, start } => Err(CompilerError::syntax(
                ERR_INVALID_BLOCK_CONTINUATION,
                format!("Unexpected {{:{}}} outside of a block", keyword),
                start,
            )),
        }
    }

    fn parse_children(&mut self, parent: NodeId) -> Result<Terminator, CompilerError> {
        loop {
            let start = self.pos;
            let rest = self.rest();
            if rest.is_empty() {
                return Ok(Terminator::Eof);
            }
            if rest.starts_with("<!--") {
                self.parse_comment(parent)?;
            } else if rest.starts_with("</") {
                self.pos += 2;
                let name = self.read_tag_name().ok_or_else(|| {
                    CompilerError::syntax(ERR_INVALID_CLOSING_TAG, "Expected tag name after `</`", self.pos)
                })?;
                self.skip_ws();
                self.expect(">", ERR_INVALID_CLOSING_TAG, "Expected `>` to end closing tag")?;
                return Ok(Terminator::CloseTag { name, start });
            } else if starts_element(rest) {
                self.parse_element(parent)?;
            } else if rest.starts_with("{#") {
                self.parse_block(parent)?;
            } else if rest.starts_with("{:") {
                self.pos += 2;
                let keyword = self.read_identifier().unwrap_or_default();
                return Ok(Terminator::Continuation { keyword, start });
            } else if rest.starts_with("{/") {
                self.pos += 2;
                let name = self.read_identifier().unwrap_or_default();
                self.close_brace("block")?;
                return Ok(Terminator::BlockClose { name, start });
            } else if rest.starts_with("{@") {
                self.parse_special_tag(parent)?;
            } else if rest.starts_with('{') {
                self.parse_mustache(parent)?;
            } else {
                self.parse_text(parent);
            }
        }
    }

    fn parse_text(&mut self, parent: NodeId) {
        let start = self.pos;
        let source = self.source;
        let bytes = source.as_bytes();
        let mut i = start + 1;
        while i < bytes.len() {
            if bytes[i] == b'{' || (bytes[i] == b'<' && starts_markup(&source[i..])) {
                break;
            }
            i += 1;
        }
        let raw = &source[start..i];
        self.pos = i;
        self.ast.alloc(
            NodeKind::Text(Text {
                raw: raw.to_string(),
                data: decode_entities(raw),
            }),
            Span::new(start, i),
            parent,
        );
    }

    fn parse_comment(&mut self, parent: NodeId) -> Result<(), CompilerError> {
        let start = self.pos;
        let body_start = start + 4;
        let close = self.source[body_start..].find("-->").ok_or_else(|| {
            CompilerError::syntax(ERR_UNCLOSED_COMMENT, "Comment was left open, expected `-->`", start)
        })?;
        let data = self.source[body_start..body_start + close].to_string();
        self.pos = body_start + close + 3;
        self.ast.alloc(NodeKind::Comment(Comment { data }), Span::new(start, self.pos), parent);
        Ok(())
    }

    fn parse_mustache(&mut self, parent: NodeId) -> Result<(), CompilerError> {
        let start = self.pos;
        let owner = self.ast.next_id();
        self.pos += 1;
        let expr = self.expression(Stop::MUSTACHE, owner)?;
        self.pos += 1;
        self.ast.alloc(NodeKind::MustacheTag(expr), Span::new(start, self.pos), parent);
        Ok(())
    }

    fn parse_special_tag(&mut self, parent: NodeId) -> Result<(), CompilerError> {
        let start = self.pos;
        self.pos += 2;
        let keyword = self.read_identifier().unwrap_or_default();
        let owner = self.ast.next_id();
        match keyword.as_str() {
            "html" => {
                let expr = self.expression(Stop::MUSTACHE, owner)?;
                self.pos += 1;
                self.ast.alloc(NodeKind::RawMustacheTag(expr), Span::new(start, self.pos), parent);
            }
            "debug" => {
                let args_start = self.pos;
                let end = scan_expression_end(self.source, args_start, Stop::MUSTACHE).ok_or_else(|| {
                    CompilerError::syntax(ERR_UNEXPECTED_EOF, "Unterminated {@debug} tag", start)
                })?;
                let mut identifiers = Vec::new();
                let args = &self.source[args_start..end];
                if !args.trim().is_empty() {
                    let mut offset = args_start;
                    for piece in args.split(',') {
                        let lead = piece.len() - piece.trim_start().len();
                        let span = Span::new(offset + lead, offset + piece.trim_end().len());
                        offset += piece.len() + 1;
                        let invalid = || {
                            CompilerError::syntax(
                                ERR_INVALID_DEBUG_ARGS,
                                "{@debug} arguments must be identifiers, e.g. {@debug a, b}",
                                span.start,
                            )
                        };
                        if span.is_empty() {
                            return Err(invalid());
                        }
                        let info = analyze_expression(self.source, span).map_err(|_| invalid())?;
                        if info.shape != ExprShape::Identifier {
                            return Err(invalid());
                        }
                        let text = self.source[span.start..span.end].to_string();
                        identifiers.push(self.ast.add_expr(span, text, info, owner));
                    }
                }
                self.pos = end + 1;
                self.ast.alloc(
                    NodeKind::DebugTag(DebugTag { identifiers }),
                    Span::new(start, self.pos),
                    parent,
                );
            }
            _ => {
                return Err(CompilerError::syntax(
                    ERR_UNKNOWN_BLOCK,
                    format!("Unknown tag `{{@{}}}`, expected {{@html}} or {{@debug}}", keyword),
                    start,
                ))
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ELEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn parse_element(&mut self, parent: NodeId) -> Result<(), CompilerError> {
        let start = self.pos;
        self.pos += 1;
        let name = self.read_tag_name().unwrap_or_default();
        let owner = self.ast.next_id();
        let (attributes, directives, self_closing) = self.parse_attributes(&name, owner)?;
        let element = Element {
            name: name.clone(),
            attributes,
            directives,
            self_closing,
        };

        let top_level = parent == self.ast.root;
        if top_level && (name == "script" || name == "style") && !self_closing {
            return self.parse_raw_block(parent, start, element);
        }

        let kind = if name == "slot" {
            NodeKind::Slot(element)
        } else if is_component_name(&name) {
            NodeKind::Component(element)
        } else {
            NodeKind::Element(element)
        };
        let id = self.ast.alloc(kind, Span::new(start, self.pos), parent);
        if self_closing || is_void(&name) {
            return Ok(());
        }

        if name == "script" || name == "style" || name == "textarea" {
            self.parse_raw_text(id, &name, start)?;
            self.set_end(id);
            return Ok(());
        }

        match self.parse_children(id)? {
            Terminator::CloseTag { name: closing, .. } if closing == name => {}
            Terminator::CloseTag { name: closing, start: close_start } => {
                if is_void(&closing) {
                    return Err(stray_close_tag(&closing, close_start));
                }
                let ancestor_open = self
                    .ast
                    .ancestors(id)
                    .any(|a| self.ast.kind(a).as_element().map_or(false, |el| el.name == closing));
                if ancestor_open {
                    return Err(CompilerError::syntax(
                        ERR_UNCLOSED_ELEMENT,
                        format!("`<{}>` was left open before `</{}>`", name, closing),
                        start,
                    ));
                }
                return Err(stray_close_tag(&closing, close_start));
            }
            Terminator::Eof => {
                return Err(CompilerError::syntax(
                    ERR_UNCLOSED_ELEMENT,
                    format!("`<{}>` was left open", name),
                    start,
                ))
            }
            Terminator::BlockClose { start: at, .. } | Terminator::Continuation { start: at, .. } => {
                return Err(CompilerError::syntax(
                    ERR_UNCLOSED_ELEMENT,
                    format!("Expected `</{}>` before the block tag", name),
                    at,
                ))
            }
        }
        self.set_end(id);
        Ok(())
    }

    /// Find the closing tag of a raw-text element, returning the content span.
    fn raw_content(&mut self, name: &str, start: usize, code: &str) -> Result<Span, CompilerError> {
        let content_start = self.pos;
        let lowered = self.source[content_start..].to_ascii_lowercase();
        let close = lowered.find(&format!("</{}", name)).ok_or_else(|| {
            CompilerError::syntax(code, format!("`<{}>` was left open", name), start)
        })?;
        let content = Span::new(content_start, content_start + close);
        self.pos = content.end + 2 + name.len();
        self.skip_ws();
        self.expect(">", code, &format!("Expected `>` to close `</{}`", name))?;
        Ok(content)
    }

    fn parse_raw_text(&mut self, id: NodeId, name: &str, start: usize) -> Result<(), CompilerError> {
        let content = self.raw_content(name, start, ERR_UNCLOSED_ELEMENT)?;
        if !content.is_empty() {
            let raw = self.source[content.start..content.end].to_string();
            self.ast.alloc(
                NodeKind::Text(Text {
                    data: raw.clone(),
                    raw,
                }),
                content,
                id,
            );
        }
        Ok(())
    }

    fn parse_raw_block(&mut self, parent: NodeId, start: usize, element: Element) -> Result<(), CompilerError> {
        self.checked_regions.insert(start);
        if element.name == "script" {
            let content = self.raw_content("script", start, ERR_UNCLOSED_SCRIPT)?;
            let context = match element.static_attribute("context") {
                Some("module") => ScriptContext::Module,
                _ => ScriptContext::Instance,
            };
            let existing = match context {
                ScriptContext::Instance => self.ast.instance,
                ScriptContext::Module => self.ast.module,
            };
            if existing.is_some() {
                return Err(CompilerError::syntax(
                    ERR_DUPLICATE_SCRIPT,
                    "A component can have a single top-level <script> per context",
                    start,
                ));
            }
            if let Err(err) = crate::script::check_syntax(self.source, content) {
                self.region_errors.push(err);
            }
            let id = self.ast.alloc(
                NodeKind::Script(Script { context, content }),
                Span::new(start, self.pos),
                parent,
            );
            match context {
                ScriptContext::Instance => self.ast.instance = Some(id),
                ScriptContext::Module => self.ast.module = Some(id),
            }
        } else {
            let content = self.raw_content("style", start, ERR_UNCLOSED_STYLE)?;
            if self.ast.style.is_some() {
                return Err(CompilerError::syntax(
                    ERR_DUPLICATE_STYLE,
                    "A component can have a single top-level <style>",
                    start,
                ));
            }
            let stylesheet = match parse_stylesheet(self.source, content) {
                Ok(sheet) => sheet,
                Err(err) => {
                    self.region_errors.push(err);
                    Stylesheet::default()
                }
            };
            let id = self.ast.alloc(
                NodeKind::Style(StyleBlock { content, stylesheet }),
                Span::new(start, self.pos),
                parent,
            );
            self.ast.style = Some(id);
        }
        Ok(())
    }

    /// After a template error, check the script and style regions the template
    /// parser never reached.
    fn recover_regions(&self) -> Vec<CompilerError> {
        let mut errors = Vec::new();
        for caps in SCRIPT_RE.captures_iter(self.source) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if self.checked_regions.contains(&whole.start()) {
                continue;
            }
            if let Err(err) = crate::script::check_syntax(self.source, Span::new(body.start(), body.end())) {
                errors.push(err);
            }
        }
        for caps in STYLE_RE.captures_iter(self.source) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if self.checked_regions.contains(&whole.start()) {
                continue;
            }
            if let Err(err) = parse_stylesheet(self.source, Span::new(body.start(), body.end())) {
                errors.push(err);
            }
        }
        errors
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES & DIRECTIVES
    // ═══════════════════════════════════════════════════════════════════════════

    fn parse_attributes(
        &mut self,
        tag: &str,
        owner: NodeId,
    ) -> Result<(Vec<Attribute>, Vec<Directive>, bool), CompilerError> {
        let mut attributes: Vec<Attribute> = Vec::new();
        let mut directives: Vec<Directive> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            self.skip_ws();
            let start = self.pos;
            let rest = self.rest();
            if rest.is_empty() {
                return Err(CompilerError::syntax(
                    ERR_UNEXPECTED_EOF,
                    format!("Unexpected end of input inside `<{}>`", tag),
                    start,
                ));
            }
            if self.eat("/>") {
                return Ok((attributes, directives, true));
            }
            if self.eat(">") {
                return Ok((attributes, directives, false));
            }

            if rest.starts_with('{') {
                if rest[1..].trim_start().starts_with("...") {
                    return Err(CompilerError::syntax(
                        ERR_INVALID_DIRECTIVE,
                        "Spread attributes are not supported",
                        start,
                    ));
                }
                self.pos += 1;
                let expr = self.expression(Stop::MUSTACHE, owner)?;
                self.pos += 1;
                let info = &self.ast.expr(expr);
                if info.info.shape != ExprShape::Identifier {
                    return Err(CompilerError::syntax(
                        ERR_INVALID_EXPRESSION,
                        "Shorthand attributes must be a single identifier, e.g. {value}",
                        info.span.start,
                    ));
                }
                let name = info.source.clone();
                check_unique(&mut seen, &name, start)?;
                attributes.push(Attribute {
                    name,
                    span: Span::new(start, self.pos),
                    value: AttributeValue::Dynamic(vec![AttributeChunk::Expression(expr)]),
                });
                continue;
            }

            let name = self
                .read_while(is_attribute_char, is_attribute_char)
                .ok_or_else(|| {
                    CompilerError::syntax(
                        ERR_UNCLOSED_ELEMENT,
                        format!("Expected attribute or `>` in `<{}>`", tag),
                        start,
                    )
                })?;
            let name_end = self.pos;
            self.skip_ws();
            let value = if self.eat("=") {
                self.skip_ws();
                Some(self.parse_attribute_value(owner)?)
            } else {
                self.pos = name_end;
                None
            };
            let span = Span::new(start, self.pos);

            match name.split_once(':') {
                Some((prefix, rest)) if !ATTRIBUTE_NAMESPACES.contains(&prefix) => {
                    let kind = DirectiveKind::from_prefix(prefix).ok_or_else(|| {
                        CompilerError::syntax(
                            ERR_INVALID_DIRECTIVE,
                            format!("Unknown directive `{}:`", prefix),
                            start,
                        )
                    })?;
                    let directive =
                        self.build_directive(kind, rest, start + prefix.len() + 1, value, span, owner)?;
                    if kind != DirectiveKind::On {
                        check_unique(&mut seen, &name, start)?;
                    }
                    directives.push(directive);
                }
                _ => {
                    check_unique(&mut seen, &name, start)?;
                    attributes.push(Attribute {
                        name,
                        span,
                        value: value.unwrap_or(AttributeValue::True),
                    });
                }
            }
        }
    }

    fn parse_attribute_value(&mut self, owner: NodeId) -> Result<AttributeValue, CompilerError> {
        let start = self.pos;
        let rest = self.rest();

        if rest.starts_with('{') {
            self.pos += 1;
            let expr = self.expression(Stop::MUSTACHE, owner)?;
            self.pos += 1;
            return Ok(AttributeValue::Dynamic(vec![AttributeChunk::Expression(expr)]));
        }

        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                Some(q)
            }
            _ => None,
        };

        let mut chunks = Vec::new();
        let mut text_start = self.pos;
        loop {
            let Some(c) = self.rest().chars().next() else {
                return Err(CompilerError::syntax(
                    ERR_UNEXPECTED_EOF,
                    "Unexpected end of input in attribute value",
                    start,
                ));
            };
            let ends = match quote {
                Some(q) => c == q,
                None => c.is_whitespace() || c == '>' || self.rest().starts_with("/>"),
            };
            if ends || c == '{' {
                if self.pos > text_start {
                    chunks.push(AttributeChunk::Text(decode_entities(&self.source[text_start..self.pos])));
                }
                if ends {
                    break;
                }
                self.pos += 1;
                let expr = self.expression(Stop::MUSTACHE, owner)?;
                self.pos += 1;
                chunks.push(AttributeChunk::Expression(expr));
                text_start = self.pos;
                continue;
            }
            self.pos += c.len_utf8();
        }
        if quote.is_some() {
            self.pos += 1;
        } else if chunks.is_empty() {
            return Err(CompilerError::syntax(ERR_INVALID_EXPRESSION, "Expected attribute value", start));
        }

        Ok(match chunks.as_slice() {
            [] => AttributeValue::Static(String::new()),
            [AttributeChunk::Text(text)] => AttributeValue::Static(text.clone()),
            _ => AttributeValue::Dynamic(chunks),
        })
    }

    fn build_directive(
        &mut self,
        kind: DirectiveKind,
        rest: &str,
        name_start: usize,
        value: Option<AttributeValue>,
        span: Span,
        owner: NodeId,
    ) -> Result<Directive, CompilerError> {
        let mut parts = rest.split('|');
        let name = parts.next().unwrap_or_default().to_string();
        let modifiers: Vec<String> = parts.map(str::to_string).collect();
        let invalid = |message: String| CompilerError::syntax(ERR_INVALID_DIRECTIVE, message, span.start);

        if name.is_empty() {
            return Err(invalid("Directive requires a name after `:`".to_string()));
        }
        for modifier in &modifiers {
            let allowed = match kind {
                DirectiveKind::On => EVENT_MODIFIERS.contains(&modifier.as_str()),
                DirectiveKind::Transition | DirectiveKind::In | DirectiveKind::Out => modifier == "local",
                _ => false,
            };
            if !allowed {
                return Err(invalid(format!("Invalid modifier `{}` on `{}`", modifier, name)));
            }
        }

        let expression = match value {
            None => match kind {
                DirectiveKind::Class | DirectiveKind::Bind => {
                    if !is_identifier(&name) {
                        return Err(invalid(format!(
                            "`{}` shorthand requires a value, e.g. {}={{expression}}",
                            name, name
                        )));
                    }
                    let name_span = Span::new(name_start, name_start + name.len());
                    let info = analyze_expression(self.source, name_span)?;
                    Some(self.ast.add_expr(name_span, name.clone(), info, owner))
                }
                _ => None,
            },
            Some(AttributeValue::Dynamic(chunks)) => match chunks.as_slice() {
                [AttributeChunk::Expression(id)] => Some(*id),
                _ => return Err(invalid("Directive value must be a single {expression}".to_string())),
            },
            Some(_) => return Err(invalid("Directive value must be a single {expression}".to_string())),
        };

        if let Some(id) = expression {
            let expr = self.ast.expr(id);
            match kind {
                DirectiveKind::On if expr.info.shape != ExprShape::Call => {
                    return Err(CompilerError::syntax(
                        ERR_INVALID_EVENT_HANDLER,
                        format!(
                            "Event handler for `on:{}` must be a call expression, e.g. on:{}={{handle(event)}}",
                            name, name
                        ),
                        expr.span.start,
                    ));
                }
                DirectiveKind::Let if expr.info.shape != ExprShape::Identifier => {
                    return Err(invalid(format!("`let:{}` can only alias to an identifier", name)));
                }
                _ => {}
            }
        }

        Ok(Directive {
            kind,
            name,
            modifiers,
            expression,
            span,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BLOCKS
    // ═══════════════════════════════════════════════════════════════════════════

    fn parse_block(&mut self, parent: NodeId) -> Result<(), CompilerError> {
        let start = self.pos;
        self.pos += 2;
        let keyword = self.read_identifier().unwrap_or_default();
        match keyword.as_str() {
            "if" => self.parse_if(parent, start, false).map(|_| ()),
            "each" => self.parse_each(parent, start),
            "await" => self.parse_await(parent, start),
            _ => Err(CompilerError::syntax(
                ERR_UNKNOWN_BLOCK,
                format!("Unknown block `{{#{}}}`, expected if, each or await", keyword),
                start,
            )),
        }
    }

    fn unexpected_terminator(&self, terminator: Terminator, block: &str, block_start: usize) -> CompilerError {
        match terminator {
            Terminator::Eof => CompilerError::syntax(
                ERR_UNCLOSED_BLOCK,
                format!("`{{#{}}}` block was left open", block),
                block_start,
            ),
            Terminator::CloseTag { name, start } => CompilerError::syntax(
                ERR_UNCLOSED_BLOCK,
                format!("`{{#{}}}` block was left open before `</{}>`", block, name),
                start,
            ),
            Terminator::BlockClose { name, start } => CompilerError::syntax(
                ERR_UNEXPECTED_BLOCK_CLOSE,
                format!("Expected `{{/{}}}`, found `{{/{}}}`", block, name),
                start,
            ),
            Terminator::Continuation { keyword, start } => CompilerError::syntax(
                ERR_INVALID_BLOCK_CONTINUATION,
                format!("`{{:{}}}` is not valid inside `{{#{}}}`", keyword, block),
                start,
            ),
        }
    }

    fn expect_block_close(&mut self, id: NodeId, block: &str, block_start: usize) -> Result<(), CompilerError> {
        match self.parse_children(id)? {
            Terminator::BlockClose { name, .. } if name == block => Ok(()),
            other => Err(self.unexpected_terminator(other, block, block_start)),
        }
    }

    fn parse_if(&mut self, parent: NodeId, start: usize, else_if: bool) -> Result<NodeId, CompilerError> {
        let owner = self.ast.next_id();
        let test = self.expression(Stop::MUSTACHE, owner)?;
        self.pos += 1;
        let id = self.ast.alloc(
            NodeKind::IfBlock(IfBlock {
                test,
                else_if,
                consequent: vec![],
                alternate: None,
            }),
            Span::new(start, start),
            parent,
        );

        let mut alternate = None;
        match self.parse_children(id)? {
            Terminator::BlockClose { name, .. } if name == "if" => {}
            Terminator::Continuation { keyword, start: else_start } if keyword == "else" => {
                let else_id = self.ast.alloc(NodeKind::ElseBlock, Span::new(else_start, else_start), id);
                self.skip_ws();
                if self.eat_keyword("if") {
                    self.parse_if(else_id, else_start, true)?;
                } else {
                    self.close_brace("{:else}")?;
                    self.expect_block_close(else_id, "if", start)?;
                }
                self.set_end(else_id);
                alternate = Some(else_id);
            }
            other => return Err(self.unexpected_terminator(other, "if", start)),
        }

        let consequent: Vec<NodeId> = self
            .ast
            .children(id)
            .iter()
            .copied()
            .filter(|c| Some(*c) != alternate)
            .collect();
        if let NodeKind::IfBlock(block) = &mut self.ast.node_mut(id).kind {
            block.consequent = consequent;
            block.alternate = alternate;
        }
        self.set_end(id);
        Ok(id)
    }

    fn parse_each(&mut self, parent: NodeId, start: usize) -> Result<(), CompilerError> {
        let owner = self.ast.next_id();
        let expression = self.expression(
            Stop {
                chars: b"}",
                keywords: &["as"],
            },
            owner,
        )?;
        if !self.eat("as") {
            return Err(CompilerError::syntax(
                ERR_INVALID_EACH_CONTEXT,
                "Expected `as` after the each-block expression, e.g. {#each items as item}",
                self.pos,
            ));
        }
        self.skip_ws();

        let ctx_start = self.pos;
        let ctx_end = scan_expression_end(
            self.source,
            ctx_start,
            Stop {
                chars: b",(}",
                keywords: &[],
            },
        )
        .ok_or_else(|| CompilerError::syntax(ERR_UNEXPECTED_EOF, "Unterminated each-block context", ctx_start))?;
        let raw = &self.source[ctx_start..ctx_end];
        let span = Span::new(ctx_start, ctx_start + raw.trim_end().len());
        if span.is_empty() {
            return Err(CompilerError::syntax(
                ERR_INVALID_EACH_CONTEXT,
                "Expected a context name or destructuring pattern after `as`",
                ctx_start,
            ));
        }
        let names = pattern_names(self.source, span)?;
        let pattern = raw.trim_end().to_string();
        let context = EachContext {
            destructured: pattern.starts_with('{') || pattern.starts_with('['),
            source: pattern,
            span,
            names,
        };
        self.pos = ctx_end;

        let mut index = None;
        if self.eat(",") {
            self.skip_ws();
            index = Some(self.read_identifier().ok_or_else(|| {
                CompilerError::syntax(ERR_INVALID_EACH_CONTEXT, "Expected an index name after `,`", self.pos)
            })?);
            self.skip_ws();
        }
        let mut key = None;
        if self.eat("(") {
            key = Some(self.expression(
                Stop {
                    chars: b")",
                    keywords: &[],
                },
                owner,
            )?);
            self.pos += 1;
        }
        self.close_brace("{#each}")?;

        let id = self.ast.alloc(
            NodeKind::EachBlock(EachBlock {
                expression,
                context,
                index,
                key,
                body: vec![],
                fallback: None,
            }),
            Span::new(start, start),
            parent,
        );

        let mut fallback = None;
        match self.parse_children(id)? {
            Terminator::BlockClose { name, .. } if name == "each" => {}
            Terminator::Continuation { keyword, start: else_start } if keyword == "else" => {
                self.close_brace("{:else}")?;
                let else_id = self.ast.alloc(NodeKind::ElseBlock, Span::new(else_start, else_start), id);
                self.expect_block_close(else_id, "each", start)?;
                self.set_end(else_id);
                fallback = Some(else_id);
            }
            other => return Err(self.unexpected_terminator(other, "each", start)),
        }

        let body: Vec<NodeId> = self
            .ast
            .children(id)
            .iter()
            .copied()
            .filter(|c| Some(*c) != fallback)
            .collect();
        if let NodeKind::EachBlock(block) = &mut self.ast.node_mut(id).kind {
            block.body = body;
            block.fallback = fallback;
        }
        self.set_end(id);
        Ok(())
    }

    fn read_await_name(&mut self) -> Result<Option<String>, CompilerError> {
        self.skip_ws();
        let name = self.read_identifier();
        self.close_brace("the await clause")?;
        Ok(name)
    }

    fn parse_await(&mut self, parent: NodeId, start: usize) -> Result<(), CompilerError> {
        let owner = self.ast.next_id();
        let expression = self.expression(
            Stop {
                chars: b"}",
                keywords: &["then", "catch"],
            },
            owner,
        )?;

        let mut value = None;
        let mut error = None;
        let mut phase = if self.eat_keyword("then") {
            value = self.read_await_name()?;
            AwaitPhase::Then
        } else if self.eat_keyword("catch") {
            error = self.read_await_name()?;
            AwaitPhase::Catch
        } else {
            self.pos += 1;
            AwaitPhase::Pending
        };

        let id = self.ast.alloc(
            NodeKind::AwaitBlock(AwaitBlock {
                expression,
                value: None,
                error: None,
                pending: None,
                then: None,
                catch: None,
            }),
            Span::new(start, start),
            parent,
        );

        let mut phase_start = self.pos;
        let (mut pending, mut then, mut catch) = (None, None, None);
        loop {
            let kind = match phase {
                AwaitPhase::Pending => NodeKind::PendingBlock,
                AwaitPhase::Then => NodeKind::ThenBlock,
                AwaitPhase::Catch => NodeKind::CatchBlock,
            };
            let phase_id = self.ast.alloc(kind, Span::new(phase_start, phase_start), id);
            match phase {
                AwaitPhase::Pending => pending = Some(phase_id),
                AwaitPhase::Then => then = Some(phase_id),
                AwaitPhase::Catch => catch = Some(phase_id),
            }

            match self.parse_children(phase_id)? {
                Terminator::BlockClose { name, start: close_start } if name == "await" => {
                    self.ast.node_mut(phase_id).span.end = close_start;
                    break;
                }
                Terminator::Continuation { keyword, start: cont } if keyword == "then" && phase == AwaitPhase::Pending => {
                    self.ast.node_mut(phase_id).span.end = cont;
                    value = self.read_await_name()?;
                    phase = AwaitPhase::Then;
                    phase_start = cont;
                }
                Terminator::Continuation { keyword, start: cont } if keyword == "catch" && phase != AwaitPhase::Catch => {
                    self.ast.node_mut(phase_id).span.end = cont;
                    error = self.read_await_name()?;
                    phase = AwaitPhase::Catch;
                    phase_start = cont;
                }
                other => return Err(self.unexpected_terminator(other, "await", start)),
            }
        }

        if let NodeKind::AwaitBlock(block) = &mut self.ast.node_mut(id).kind {
            block.value = value;
            block.error = error;
            block.pending = pending;
            block.then = then;
            block.catch = catch;
        }
        self.set_end(id);
        Ok(())
    }
}

fn starts_element(rest: &str) -> bool {
    rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
}

fn starts_markup(rest: &str) -> bool {
    starts_element(rest) || rest.starts_with("</") || rest.starts_with("<!--")
}

fn is_attribute_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, '=' | '>' | '/' | '"' | '\'' | '{' | '}'))
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .map_or(false, |c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn check_unique(seen: &mut HashSet<String>, name: &str, offset: usize) -> Result<(), CompilerError> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(CompilerError::syntax(
            ERR_DUPLICATE_ATTRIBUTE,
            format!("Attribute `{}` is specified more than once", name),
            offset,
        ))
    }
}

fn stray_close_tag(name: &str, start: usize) -> CompilerError {
    if is_void(name) {
        CompilerError::syntax(
            ERR_VOID_CLOSING_TAG,
            format!("`<{}>` is a void element and cannot have a closing tag", name),
            start,
        )
    } else {
        CompilerError::syntax(
            ERR_INVALID_CLOSING_TAG,
            format!("`</{}>` attempted to close an element that was not open", name),
            start,
        )
    }
}
