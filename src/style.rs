//! Style pipeline.
//!
//! Parses the `<style>` block into rules, rejects removed and empty forms, and
//! scopes selectors to the component with a content-hashed token class.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::ast::{Ast, AttributeValue, DirectiveKind, NodeId, NodeKind, Span};
use crate::diagnostic::{
    CompilerError, ERR_CSS_EMPTY_DECLARATION, ERR_CSS_REF_SELECTOR, ERR_CSS_SYNTAX,
    WARN_CSS_UNUSED_SELECTOR,
};

lazy_static! {
    static ref REF_SELECTOR_RE: Regex = Regex::new(r"(^|[\s>+~,(])ref:[A-Za-z_$]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// STYLESHEET TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stylesheet {
    pub nodes: Vec<CssNode>,
    /// Raw stylesheet text, used for the scope token.
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CssNode {
    Rule(Rule),
    AtRule(AtRule),
}

#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct AtRule {
    pub name: String,
    pub prelude: String,
    pub span: Span,
    /// Nested rules for conditional groups (`@media`, `@supports`).
    pub children: Vec<CssNode>,
    /// Verbatim block for everything else (`@keyframes`, `@font-face`).
    pub raw_block: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selector {
    pub text: String,
    pub span: Span,
    pub compounds: Vec<Compound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Compound {
    /// Combinator joining this compound to the previous one (`' '`, `>`, `+`, `~`).
    pub combinator: Option<char>,
    pub text: String,
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub id: Option<String>,
    pub global: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub span: Span,
}

impl Selector {
    fn target(&self) -> Option<&Compound> {
        self.compounds.last()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

const NESTED_AT_RULES: &[&str] = &["media", "supports", "container", "layer"];

/// Parse the contents of a style block. `content` is the span of the block body
/// inside the component source; all reported offsets are absolute.
pub fn parse_stylesheet(source: &str, content: Span) -> Result<Stylesheet, CompilerError> {
    let text = &source[content.start..content.end];
    let stripped = strip_comments(text);
    let mut parser = CssParser {
        text: &stripped,
        base: content.start,
        pos: 0,
    };
    let nodes = parser.parse_nodes(false)?;
    Ok(Stylesheet {
        nodes,
        source: text.to_string(),
    })
}

/// Blank out comments, keeping byte offsets stable.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let len = after.find("*/").map(|e| e + 2).unwrap_or(after.len());
        for c in after[..len].chars() {
            if c == '\n' {
                out.push('\n');
            } else {
                out.extend(std::iter::repeat(' ').take(c.len_utf8()));
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

struct CssParser<'s> {
    text: &'s str,
    base: usize,
    pos: usize,
}

impl<'s> CssParser<'s> {
    fn abs(&self, local: usize) -> usize {
        self.base + local
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.text[self.pos..].chars().next() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn error(&self, code: &str, message: impl Into<String>, local: usize) -> CompilerError {
        CompilerError::style(code, message, self.abs(local))
    }

    fn parse_nodes(&mut self, nested: bool) -> Result<Vec<CssNode>, CompilerError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_ws();
            if self.pos >= self.text.len() {
                if nested {
                    return Err(self.error(ERR_CSS_SYNTAX, "Expected `}`", self.pos));
                }
                return Ok(nodes);
            }
            if self.text[self.pos..].starts_with('}') {
                if nested {
                    self.pos += 1;
                    return Ok(nodes);
                }
                return Err(self.error(ERR_CSS_SYNTAX, "Unexpected `}`", self.pos));
            }
            if self.text[self.pos..].starts_with('@') {
                nodes.push(CssNode::AtRule(self.parse_at_rule()?));
            } else {
                nodes.push(CssNode::Rule(self.parse_rule()?));
            }
        }
    }

    fn parse_at_rule(&mut self) -> Result<AtRule, CompilerError> {
        let start = self.pos;
        let rest = &self.text[start + 1..];
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len());
        let name = rest[..name_len].to_string();
        self.pos = start + 1 + name_len;

        let prelude_end = self.text[self.pos..]
            .find(['{', ';'])
            .map(|i| self.pos + i)
            .ok_or_else(|| self.error(ERR_CSS_SYNTAX, format!("Unterminated @{}", name), start))?;
        let prelude = self.text[self.pos..prelude_end].trim().to_string();
        self.pos = prelude_end + 1;

        if self.text.as_bytes()[prelude_end] == b';' {
            return Ok(AtRule {
                name,
                prelude,
                span: Span::new(self.abs(start), self.abs(self.pos)),
                children: vec![],
                raw_block: None,
            });
        }

        if NESTED_AT_RULES.contains(&name.as_str()) {
            let children = self.parse_nodes(true)?;
            return Ok(AtRule {
                name,
                prelude,
                span: Span::new(self.abs(start), self.abs(self.pos)),
                children,
                raw_block: None,
            });
        }

        let block_start = self.pos;
        let mut depth = 1;
        for (i, c) in self.text[block_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos = block_start + i + 1;
                        return Ok(AtRule {
                            name,
                            prelude,
                            span: Span::new(self.abs(start), self.abs(self.pos)),
                            children: vec![],
                            raw_block: Some(self.text[block_start..block_start + i].trim().to_string()),
                        });
                    }
                }
                _ => {}
            }
        }
        Err(self.error(ERR_CSS_SYNTAX, format!("Unclosed @{} block", name), start))
    }

    fn parse_rule(&mut self) -> Result<Rule, CompilerError> {
        let start = self.pos;
        let open = self.text[start..]
            .find(['{', '}', ';'])
            .map(|i| start + i)
            .filter(|i| self.text.as_bytes()[*i] == b'{')
            .ok_or_else(|| self.error(ERR_CSS_SYNTAX, "Expected `{` after selector", start))?;

        let selectors = self.parse_selector_list(start, open)?;
        self.pos = open + 1;

        let close = self.text[self.pos..]
            .find('}')
            .map(|i| self.pos + i)
            .ok_or_else(|| self.error(ERR_CSS_SYNTAX, "Unclosed rule block", open))?;
        let declarations = self.parse_declarations(self.pos, close)?;
        self.pos = close + 1;

        Ok(Rule {
            selectors,
            declarations,
            span: Span::new(self.abs(start), self.abs(self.pos)),
        })
    }

    fn parse_selector_list(&self, start: usize, end: usize) -> Result<Vec<Selector>, CompilerError> {
        let list = &self.text[start..end];
        if let Some(m) = REF_SELECTOR_RE.find(list) {
            let at = start + m.as_str().find("ref:").unwrap_or(0) + m.start();
            return Err(self
                .error(ERR_CSS_REF_SELECTOR, "ref selectors are no longer supported", at)
                .with_hint("Use a class selector and class:name directive instead"));
        }

        let mut selectors = Vec::new();
        let mut depth = 0i32;
        let mut piece_start = 0;
        for (i, c) in list.char_indices().chain(std::iter::once((list.len(), ','))) {
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                ',' if depth == 0 => {
                    let piece = &list[piece_start..i];
                    let trimmed = piece.trim();
                    if trimmed.is_empty() {
                        return Err(self.error(ERR_CSS_SYNTAX, "Empty selector", start + piece_start));
                    }
                    let lead = piece.len() - piece.trim_start().len();
                    let sel_start = start + piece_start + lead;
                    selectors.push(Selector {
                        text: WHITESPACE_RE.replace_all(trimmed, " ").to_string(),
                        span: Span::new(self.abs(sel_start), self.abs(sel_start + trimmed.len())),
                        compounds: parse_compounds(trimmed),
                    });
                    piece_start = i + 1;
                }
                _ => {}
            }
        }
        Ok(selectors)
    }

    fn parse_declarations(&self, start: usize, end: usize) -> Result<Vec<Declaration>, CompilerError> {
        let body = &self.text[start..end];
        let mut declarations = Vec::new();
        let mut offset = 0;
        for piece in body.split(';') {
            let piece_start = start + offset;
            offset += piece.len() + 1;
            if piece.trim().is_empty() {
                continue;
            }
            let lead = piece.len() - piece.trim_start().len();
            let decl_start = piece_start + lead;
            let Some(colon) = piece.find(':') else {
                return Err(self.error(ERR_CSS_SYNTAX, "Expected `:` in declaration", decl_start));
            };
            let property = piece[..colon].trim().to_string();
            let value = piece[colon + 1..].trim().to_string();
            if property.is_empty() {
                return Err(self.error(ERR_CSS_SYNTAX, "Expected property name", decl_start));
            }
            if value.is_empty() {
                return Err(self.error(
                    ERR_CSS_EMPTY_DECLARATION,
                    format!("Declaration `{}` cannot be empty", property),
                    decl_start,
                ));
            }
            declarations.push(Declaration {
                property,
                value,
                span: Span::new(self.abs(decl_start), self.abs(piece_start + piece.trim_end().len())),
            });
        }
        Ok(declarations)
    }
}

fn parse_compounds(selector: &str) -> Vec<Compound> {
    let mut compounds = Vec::new();
    let mut current = String::new();
    let mut pending: Option<char> = None;
    let mut depth = 0;

    let flush = |current: &mut String, pending: &mut Option<char>, compounds: &mut Vec<Compound>| {
        if current.is_empty() {
            return;
        }
        let combinator = if compounds.is_empty() { None } else { Some(pending.unwrap_or(' ')) };
        compounds.push(parse_compound(current, combinator));
        current.clear();
        *pending = None;
    };

    for c in selector.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(c);
            }
            '>' | '+' | '~' if depth == 0 => {
                flush(&mut current, &mut pending, &mut compounds);
                pending = Some(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                flush(&mut current, &mut pending, &mut compounds);
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut pending, &mut compounds);
    compounds
}

fn parse_compound(text: &str, combinator: Option<char>) -> Compound {
    let mut compound = Compound {
        combinator,
        text: text.to_string(),
        tag: None,
        classes: vec![],
        id: None,
        global: false,
    };
    if let Some(inner) = text.strip_prefix(":global(").and_then(|t| t.strip_suffix(')')) {
        compound.global = true;
        compound.text = inner.to_string();
        return compound;
    }

    let bytes = text.as_bytes();
    let ident_end = |from: usize| {
        text[from..]
            .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .map_or(text.len(), |e| from + e)
    };
    let mut i = 0;
    if i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'*') {
        let end = if bytes[i] == b'*' { 1 } else { ident_end(0) };
        if &text[..end] != "*" {
            compound.tag = Some(text[..end].to_ascii_lowercase());
        }
        i = end;
    }
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let end = ident_end(i + 1);
                compound.classes.push(text[i + 1..end].to_string());
                i = end;
            }
            b'#' => {
                let end = ident_end(i + 1);
                compound.id = Some(text[i + 1..end].to_string());
                i = end;
            }
            b'[' | b'(' => {
                let close = if bytes[i] == b'[' { ']' } else { ')' };
                i = text[i..].find(close).map_or(text.len(), |e| i + e + 1);
            }
            _ => i += 1,
        }
    }
    compound
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPING
// ═══════════════════════════════════════════════════════════════════════════════

/// The scoped stylesheet handed to the emitter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopedStyle {
    pub token: String,
    pub css: String,
    /// Elements that must carry the token class.
    #[serde(skip)]
    pub scoped_elements: HashSet<NodeId>,
    #[serde(skip)]
    pub warnings: Vec<CompilerError>,
}

pub fn scope_token(stylesheet: &Stylesheet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stylesheet.source.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("weave-{}", &digest[..6])
}

struct ElementShape {
    id: NodeId,
    tag: String,
    classes: HashSet<String>,
    dynamic_class: bool,
    static_id: Option<String>,
    dynamic_id: bool,
}

impl ElementShape {
    fn matches(&self, compound: &Compound) -> bool {
        if let Some(tag) = &compound.tag {
            if *tag != self.tag.to_ascii_lowercase() {
                return false;
            }
        }
        let classes_ok = compound
            .classes
            .iter()
            .all(|c| self.dynamic_class || self.classes.contains(c));
        let id_ok = match &compound.id {
            Some(id) => self.dynamic_id || self.static_id.as_deref() == Some(id.as_str()),
            None => true,
        };
        classes_ok && id_ok
    }
}

fn element_shapes(ast: &Ast) -> Vec<ElementShape> {
    ast.node_ids()
        .filter_map(|id| match ast.kind(id) {
            NodeKind::Element(el) => {
                let mut classes = HashSet::new();
                let mut dynamic_class = false;
                match el.attribute("class").map(|a| &a.value) {
                    Some(AttributeValue::Static(value)) => {
                        classes.extend(value.split_whitespace().map(str::to_string))
                    }
                    Some(AttributeValue::Dynamic(_)) => dynamic_class = true,
                    _ => {}
                }
                classes.extend(el.directives_of(DirectiveKind::Class).map(|d| d.name.clone()));
                let (static_id, dynamic_id) = match el.attribute("id").map(|a| &a.value) {
                    Some(AttributeValue::Static(value)) => (Some(value.clone()), false),
                    Some(AttributeValue::Dynamic(_)) => (None, true),
                    _ => (None, false),
                };
                Some(ElementShape {
                    id,
                    tag: el.name.clone(),
                    classes,
                    dynamic_class,
                    static_id,
                    dynamic_id,
                })
            }
            _ => None,
        })
        .collect()
}

/// Scope the stylesheet to the elements of this component.
pub fn scope_stylesheet(ast: &Ast, stylesheet: &Stylesheet) -> ScopedStyle {
    let token = scope_token(stylesheet);
    let shapes = element_shapes(ast);
    let mut scoped = ScopedStyle {
        token,
        ..Default::default()
    };
    let mut out = String::new();
    for node in &stylesheet.nodes {
        render_node(node, &shapes, &mut scoped, &mut out, "");
    }
    scoped.css = out.trim_end().to_string();
    scoped
}

fn render_node(node: &CssNode, shapes: &[ElementShape], scoped: &mut ScopedStyle, out: &mut String, indent: &str) {
    match node {
        CssNode::Rule(rule) => {
            let mut kept = Vec::new();
            for selector in &rule.selectors {
                let Some(target) = selector.target() else {
                    continue;
                };
                if target.global {
                    kept.push(render_selector(selector, None));
                    continue;
                }
                let matched: Vec<NodeId> = shapes
                    .iter()
                    .filter(|s| s.matches(target))
                    .map(|s| s.id)
                    .collect();
                if matched.is_empty() {
                    scoped.warnings.push(
                        CompilerError::style(
                            WARN_CSS_UNUSED_SELECTOR,
                            format!("Unused CSS selector \"{}\"", selector.text),
                            selector.span.start,
                        )
                        .as_warning(),
                    );
                    continue;
                }
                scoped.scoped_elements.extend(matched);
                kept.push(render_selector(selector, Some(&scoped.token)));
            }
            if kept.is_empty() {
                return;
            }
            out.push_str(&format!("{}{} {{", indent, kept.join(", ")));
            for decl in &rule.declarations {
                out.push_str(&format!(" {}: {};", decl.property, decl.value));
            }
            out.push_str(" }\n");
        }
        CssNode::AtRule(at) => {
            let head = if at.prelude.is_empty() {
                format!("@{}", at.name)
            } else {
                format!("@{} {}", at.name, at.prelude)
            };
            if let Some(raw) = &at.raw_block {
                out.push_str(&format!("{}{} {{ {} }}\n", indent, head, raw));
            } else if !at.children.is_empty() {
                let mut inner = String::new();
                let nested = format!("{}  ", indent);
                for child in &at.children {
                    render_node(child, shapes, scoped, &mut inner, &nested);
                }
                if !inner.is_empty() {
                    out.push_str(&format!("{}{} {{\n{}{}}}\n", indent, head, inner, indent));
                }
            } else {
                out.push_str(&format!("{}{};\n", indent, head));
            }
        }
    }
}

fn render_selector(selector: &Selector, token: Option<&str>) -> String {
    let last = selector.compounds.len().saturating_sub(1);
    let mut out = String::new();
    for (i, compound) in selector.compounds.iter().enumerate() {
        match compound.combinator {
            Some(' ') => out.push(' '),
            Some(c) => out.push_str(&format!(" {} ", c)),
            None => {}
        }
        match token {
            Some(token) if i == last && !compound.global => {
                let text = &compound.text;
                let at = text.find("::").unwrap_or(text.len());
                out.push_str(&text[..at]);
                out.push('.');
                out.push_str(token);
                out.push_str(&text[at..]);
            }
            _ => out.push_str(&compound.text),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(css: &str) -> Result<Stylesheet, CompilerError> {
        parse_stylesheet(css, Span::new(0, css.len()))
    }

    #[test]
    fn test_parse_rules_and_declarations() {
        let sheet = parse("h1, .title > span { color: red; margin: 0 }").unwrap();
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.selectors.len(), 2);
        assert_eq!(rule.selectors[1].compounds.len(), 2);
        assert_eq!(rule.selectors[1].compounds[1].combinator, Some('>'));
        assert_eq!(rule.declarations[1].property, "margin");
    }

    #[test]
    fn test_ref_selector_is_rejected() {
        let css = "p { color: red }\nref:button { color: blue }";
        let err = parse(css).unwrap_err();
        assert_eq!(err.code, ERR_CSS_REF_SELECTOR);
        assert_eq!(err.offset, css.find("ref:").unwrap());
    }

    #[test]
    fn test_empty_declaration_is_rejected() {
        let css = "p { color: ; }";
        let err = parse(css).unwrap_err();
        assert_eq!(err.code, ERR_CSS_EMPTY_DECLARATION);
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn test_unclosed_rule() {
        let err = parse("p { color: red").unwrap_err();
        assert_eq!(err.code, ERR_CSS_SYNTAX);
    }

    #[test]
    fn test_offsets_are_absolute() {
        let source = "<style>p { color:; }</style>";
        let err = parse_stylesheet(source, Span::new(7, 20)).unwrap_err();
        assert_eq!(err.offset, 11);
    }

    #[test]
    fn test_comments_and_media() {
        let sheet = parse("/* x */ @media (min-width: 10px) { p { color: red } } @keyframes k { from { opacity: 0 } }").unwrap();
        let CssNode::AtRule(media) = &sheet.nodes[0] else {
            panic!("expected at-rule");
        };
        assert_eq!(media.children.len(), 1);
        let CssNode::AtRule(frames) = &sheet.nodes[1] else {
            panic!("expected at-rule");
        };
        assert!(frames.raw_block.as_deref().unwrap().contains("opacity"));
    }

    #[test]
    fn test_token_is_stable_and_prefixed() {
        let a = parse("p { color: red }").unwrap();
        let b = parse("p { color: red }").unwrap();
        assert_eq!(scope_token(&a), scope_token(&b));
        assert!(scope_token(&a).starts_with("weave-"));
        assert_eq!(scope_token(&a).len(), "weave-".len() + 6);
    }

    #[test]
    fn test_render_selector_inserts_token_before_pseudo_element() {
        let sheet = parse("a:hover::after { content: 'x' }").unwrap();
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(render_selector(&rule.selectors[0], Some("weave-abc")), "a:hover.weave-abc::after");
    }

    #[test]
    fn test_global_compound_passes_through() {
        let sheet = parse("div :global(.x) { color: red }").unwrap();
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert!(rule.selectors[0].compounds[1].global);
        assert_eq!(render_selector(&rule.selectors[0], Some("t")), "div .x");
    }
}
