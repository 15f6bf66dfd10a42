//! Expression sub-parser.
//!
//! Template expressions are located with a balanced scan (strings, template
//! literals, comments and brackets are skipped) and then parsed with oxc. The
//! caller gets back the expression span, its [`ExprInfo`] and the exclusive end
//! offset at which outer scanning resumes.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    ArrowFunctionExpression, AssignmentExpression, AssignmentTarget, BindingIdentifier,
    BindingPattern, BlockStatement, CatchClause, Expression, ForInStatement, ForOfStatement,
    ForStatement, Function, IdentifierReference, ObjectProperty, SimpleAssignmentTarget,
    Statement, UpdateExpression,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::AssignmentOperator;
use oxc_syntax::scope::ScopeFlags;
use serde::Serialize;
use std::collections::HashSet;

use crate::ast::Span;
use crate::diagnostic::{CompilerError, ERR_INVALID_EACH_CONTEXT, ERR_INVALID_EXPRESSION};

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION INFO
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprShape {
    Identifier,
    Member,
    Call,
    Literal,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn reads(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// A free identifier occurrence (not bound inside the expression itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub name: String,
    /// Absolute span in the component source.
    pub span: Span,
    pub access: Access,
    /// Inside a nested function body: evaluated later, not when the
    /// surrounding expression runs.
    pub deferred: bool,
    /// `{ name }` shorthand object property.
    pub shorthand: bool,
}

/// An assignment or update expression writing free names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSite {
    pub span: Span,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExprInfo {
    pub shape: ExprShape,
    pub references: Vec<Reference>,
    pub writes: Vec<WriteSite>,
}

impl ExprInfo {
    /// Names read by the expression, in first-occurrence order.
    pub fn reads(&self) -> Vec<&str> {
        unique(self.references.iter().filter(|r| r.access.reads()))
    }

    /// Names read when the expression itself is evaluated.
    pub fn immediate_reads(&self) -> Vec<&str> {
        unique(
            self.references
                .iter()
                .filter(|r| r.access.reads() && !r.deferred),
        )
    }

    pub fn written(&self) -> Vec<&str> {
        unique(self.references.iter().filter(|r| r.access.writes()))
    }

    pub fn names(&self) -> Vec<&str> {
        unique(self.references.iter())
    }
}

fn unique<'r>(refs: impl Iterator<Item = &'r Reference>) -> Vec<&'r str> {
    let mut seen = HashSet::new();
    refs.filter(|r| seen.insert(r.name.as_str()))
        .map(|r| r.name.as_str())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BALANCED SCAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an expression region ends.
#[derive(Debug, Clone, Copy)]
pub struct Stop<'s> {
    /// Bytes that end the region at nesting depth zero. A closing bracket in
    /// this set ends the region instead of being treated as unbalanced.
    pub chars: &'s [u8],
    /// Keywords that end the region at depth zero when surrounded by
    /// whitespace (or followed by `}`).
    pub keywords: &'s [&'s str],
}

impl Stop<'static> {
    pub const MUSTACHE: Stop<'static> = Stop {
        chars: b"}",
        keywords: &[],
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Bracket(u8),
    Template,
}

/// Find the offset of the terminator that ends the expression starting at
/// `start`. Returns `None` when the input ends first or brackets mismatch.
pub fn scan_expression_end(source: &str, start: usize, stop: Stop) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = start;

    while i < bytes.len() {
        let c = bytes[i];

        if stack.last() == Some(&Frame::Template) {
            match c {
                b'\\' => i += 2,
                b'`' => {
                    stack.pop();
                    i += 1;
                }
                b'$' if bytes.get(i + 1) == Some(&b'{') => {
                    stack.push(Frame::Bracket(b'}'));
                    i += 2;
                }
                _ => i += 1,
            }
            continue;
        }

        if stack.is_empty() {
            if stop.chars.contains(&c) {
                return Some(i);
            }
            if keyword_at(source, start, i, stop.keywords) {
                return Some(i);
            }
        }

        match c {
            b'"' | b'\'' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b'`' => stack.push(Frame::Template),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = source[i + 2..].find("*/")?;
                i = i + 2 + close + 2;
                continue;
            }
            b'(' => stack.push(Frame::Bracket(b')')),
            b'[' => stack.push(Frame::Bracket(b']')),
            b'{' => stack.push(Frame::Bracket(b'}')),
            b')' | b']' | b'}' => match stack.pop() {
                Some(Frame::Bracket(expected)) if expected == c => {}
                _ => return None,
            },
            _ => {}
        }
        i += 1;
    }

    None
}

fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn keyword_at(source: &str, start: usize, i: usize, keywords: &[&str]) -> bool {
    if i == start {
        return false;
    }
    let bytes = source.as_bytes();
    if !bytes[i - 1].is_ascii_whitespace() {
        return false;
    }
    keywords.iter().any(|kw| {
        source[i..].starts_with(kw)
            && bytes
                .get(i + kw.len())
                .map_or(false, |next| next.is_ascii_whitespace() || *next == b'}')
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

fn source_type() -> SourceType {
    SourceType::default().with_module(true)
}

/// A parsed template expression.
#[derive(Debug, Clone)]
pub struct ParsedExpression {
    pub span: Span,
    pub source: String,
    pub info: ExprInfo,
    /// Exclusive end of the scanned region; outer scanning resumes here.
    pub end: usize,
}

/// Scan and parse the expression starting at `start`.
pub fn read_expression(
    source: &str,
    start: usize,
    stop: Stop,
) -> Result<ParsedExpression, CompilerError> {
    let end = scan_expression_end(source, start, stop).ok_or_else(|| {
        CompilerError::syntax(
            ERR_INVALID_EXPRESSION,
            "Unterminated expression: expected a closing `}`",
            start,
        )
    })?;
    let raw = &source[start..end];
    let leading = raw.len() - raw.trim_start().len();
    let span = Span::new(start + leading, start + raw.trim_end().len());
    if span.is_empty() {
        return Err(CompilerError::syntax(
            ERR_INVALID_EXPRESSION,
            "Expected an expression",
            start,
        ));
    }
    let info = analyze_expression(source, span)?;
    Ok(ParsedExpression {
        span,
        source: source[span.start..span.end].to_string(),
        info,
        end,
    })
}

/// Parse `source[span]` as a single expression and collect its references.
pub fn analyze_expression(source: &str, span: Span) -> Result<ExprInfo, CompilerError> {
    let code = &source[span.start..span.end];
    let allocator = Allocator::default();
    let expr = Parser::new(&allocator, code, source_type())
        .parse_expression()
        .map_err(|errors| {
            let detail = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            CompilerError::syntax(
                ERR_INVALID_EXPRESSION,
                format!("Invalid expression `{}`: {}", code, detail),
                span.start,
            )
        })?;

    let mut collector = ReferenceCollector::new(span.start);
    collector.visit_expression(&expr);

    Ok(ExprInfo {
        shape: shape_of(&expr),
        references: collector.references,
        writes: collector.sites,
    })
}

fn shape_of(expr: &Expression) -> ExprShape {
    match expr {
        Expression::ParenthesizedExpression(paren) => shape_of(&paren.expression),
        Expression::Identifier(_) => ExprShape::Identifier,
        Expression::StaticMemberExpression(_) | Expression::ComputedMemberExpression(_) => {
            ExprShape::Member
        }
        Expression::CallExpression(_) => ExprShape::Call,
        Expression::StringLiteral(_)
        | Expression::NumericLiteral(_)
        | Expression::BooleanLiteral(_)
        | Expression::NullLiteral(_) => ExprShape::Literal,
        _ => ExprShape::Other,
    }
}

/// Parse an each-block context pattern (`item`, `{ id, name }`, `[a, b]`) and
/// return the names it declares.
pub fn pattern_names(source: &str, span: Span) -> Result<Vec<String>, CompilerError> {
    let pattern = &source[span.start..span.end];
    let wrapped = format!("let {} = 0;", pattern);
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &wrapped, source_type()).parse();

    let invalid = || {
        CompilerError::syntax(
            ERR_INVALID_EACH_CONTEXT,
            format!("Invalid each-block context `{}`", pattern),
            span.start,
        )
    };
    if !ret.errors.is_empty() || ret.program.body.len() != 1 {
        return Err(invalid());
    }

    let mut names = Vec::new();
    match &ret.program.body[0] {
        Statement::VariableDeclaration(var_decl) if var_decl.declarations.len() == 1 => {
            collect_binding_pattern(&var_decl.declarations[0].id, &mut names);
        }
        _ => return Err(invalid()),
    }
    if names.is_empty() {
        return Err(invalid());
    }
    Ok(names)
}

pub(crate) fn collect_binding_pattern(pattern: &BindingPattern, names: &mut Vec<String>) {
    match pattern {
        BindingPattern::BindingIdentifier(id) => names.push(id.name.to_string()),
        BindingPattern::ObjectPattern(obj) => {
            for prop in &obj.properties {
                collect_binding_pattern(&prop.value, names);
            }
            if let Some(rest) = &obj.rest {
                collect_binding_pattern(&rest.argument, names);
            }
        }
        BindingPattern::ArrayPattern(arr) => {
            for pattern in arr.elements.iter().flatten() {
                collect_binding_pattern(pattern, names);
            }
            if let Some(rest) = &arr.rest {
                collect_binding_pattern(&rest.argument, names);
            }
        }
        BindingPattern::AssignmentPattern(assign) => collect_binding_pattern(&assign.left, names),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REFERENCE COLLECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects free identifier references with read/write access. Names bound
/// inside nested functions (parameters, local declarations) are excluded.
pub(crate) struct ReferenceCollector {
    base: usize,
    frames: Vec<HashSet<String>>,
    /// Frames opened by functions, as opposed to plain blocks.
    function_depth: usize,
    writing: bool,
    pub references: Vec<Reference>,
    pub sites: Vec<WriteSite>,
}

impl ReferenceCollector {
    pub fn new(base: usize) -> Self {
        ReferenceCollector {
            base,
            frames: Vec::new(),
            function_depth: 0,
            writing: false,
            references: Vec::new(),
            sites: Vec::new(),
        }
    }

    fn absolute(&self, span: oxc_span::Span) -> Span {
        Span::new(self.base + span.start as usize, self.base + span.end as usize)
    }

    /// Record a write site for the free names written since `mark`.
    fn push_site(&mut self, mark: usize, span: oxc_span::Span) {
        let mut names: Vec<String> = Vec::new();
        for r in &self.references[mark..] {
            if r.access.writes() && !names.contains(&r.name) {
                names.push(r.name.clone());
            }
        }
        if !names.is_empty() {
            let span = self.absolute(span);
            self.sites.push(WriteSite { span, names });
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.contains(name))
    }

    fn record(&mut self, name: &str, span: oxc_span::Span, access: Access, shorthand: bool) {
        if self.is_local(name) {
            return;
        }
        self.references.push(Reference {
            name: name.to_string(),
            span: self.absolute(span),
            access,
            deferred: self.function_depth > 0,
            shorthand,
        });
    }

    /// Writing through a member expression invalidates its root object.
    fn record_root_write(&mut self, object: &Expression) {
        let mut current = object;
        loop {
            match current {
                Expression::StaticMemberExpression(m) => current = &m.object,
                Expression::ComputedMemberExpression(m) => current = &m.object,
                Expression::ParenthesizedExpression(p) => current = &p.expression,
                Expression::Identifier(id) => {
                    self.record(&id.name.to_string(), id.span, Access::Write, false);
                    return;
                }
                _ => return,
            }
        }
    }

    fn in_function_frame(&mut self, f: impl FnOnce(&mut Self)) {
        self.function_depth += 1;
        self.in_block_frame(f);
        self.function_depth -= 1;
    }

    fn in_block_frame(&mut self, f: impl FnOnce(&mut Self)) {
        self.frames.push(HashSet::new());
        f(self);
        self.frames.pop();
    }
}

impl<'a> Visit<'a> for ReferenceCollector {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        let access = if self.writing {
            Access::Write
        } else {
            Access::Read
        };
        self.record(&ident.name.to_string(), ident.span, access, false);
    }

    fn visit_binding_identifier(&mut self, ident: &BindingIdentifier<'a>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(ident.name.to_string());
        }
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        self.in_function_frame(|this| oxc_ast_visit::walk::walk_function(this, func, flags));
    }

    fn visit_arrow_function_expression(&mut self, func: &ArrowFunctionExpression<'a>) {
        self.in_function_frame(|this| {
            oxc_ast_visit::walk::walk_arrow_function_expression(this, func)
        });
    }

    fn visit_block_statement(&mut self, block: &BlockStatement<'a>) {
        self.in_block_frame(|this| oxc_ast_visit::walk::walk_block_statement(this, block));
    }

    fn visit_catch_clause(&mut self, clause: &CatchClause<'a>) {
        self.in_block_frame(|this| oxc_ast_visit::walk::walk_catch_clause(this, clause));
    }

    fn visit_for_statement(&mut self, stmt: &ForStatement<'a>) {
        self.in_block_frame(|this| oxc_ast_visit::walk::walk_for_statement(this, stmt));
    }

    fn visit_for_in_statement(&mut self, stmt: &ForInStatement<'a>) {
        self.in_block_frame(|this| oxc_ast_visit::walk::walk_for_in_statement(this, stmt));
    }

    fn visit_for_of_statement(&mut self, stmt: &ForOfStatement<'a>) {
        self.in_block_frame(|this| oxc_ast_visit::walk::walk_for_of_statement(this, stmt));
    }

    fn visit_assignment_expression(&mut self, expr: &AssignmentExpression<'a>) {
        let mark = self.references.len();
        let compound = expr.operator != AssignmentOperator::Assign;
        match &expr.left {
            AssignmentTarget::AssignmentTargetIdentifier(id) => {
                let access = if compound {
                    Access::ReadWrite
                } else {
                    Access::Write
                };
                self.record(&id.name.to_string(), id.span, access, false);
            }
            AssignmentTarget::StaticMemberExpression(m) => {
                self.record_root_write(&m.object);
                self.visit_expression(&m.object);
            }
            AssignmentTarget::ComputedMemberExpression(m) => {
                self.record_root_write(&m.object);
                self.visit_expression(&m.object);
                self.visit_expression(&m.expression);
            }
            other => {
                let was_writing = self.writing;
                self.writing = true;
                oxc_ast_visit::walk::walk_assignment_target(self, other);
                self.writing = was_writing;
            }
        }
        self.push_site(mark, expr.span);
        self.visit_expression(&expr.right);
    }

    fn visit_update_expression(&mut self, expr: &UpdateExpression<'a>) {
        let mark = self.references.len();
        match &expr.argument {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                self.record(&id.name.to_string(), id.span, Access::ReadWrite, false);
            }
            SimpleAssignmentTarget::StaticMemberExpression(m) => {
                self.record_root_write(&m.object);
                self.visit_expression(&m.object);
            }
            SimpleAssignmentTarget::ComputedMemberExpression(m) => {
                self.record_root_write(&m.object);
                self.visit_expression(&m.object);
                self.visit_expression(&m.expression);
            }
            _ => {}
        }
        self.push_site(mark, expr.span);
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        if prop.shorthand {
            if let Expression::Identifier(id) = &prop.value {
                self.record(&id.name.to_string(), id.span, Access::Read, true);
                return;
            }
        }
        oxc_ast_visit::walk::walk_object_property(self, prop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_mustache_end() {
        let src = "{a + b} rest";
        assert_eq!(scan_expression_end(src, 1, Stop::MUSTACHE), Some(6));
    }

    #[test]
    fn test_scan_skips_strings_and_templates() {
        let src = "{'}' + `${ {x: 1}.x }` + \"{\"}";
        assert_eq!(scan_expression_end(src, 1, Stop::MUSTACHE), Some(src.len() - 1));
    }

    #[test]
    fn test_scan_nested_object_literal() {
        let src = "{fn({ a: [1, 2] })}";
        assert_eq!(scan_expression_end(src, 1, Stop::MUSTACHE), Some(18));
    }

    #[test]
    fn test_scan_unterminated() {
        assert_eq!(scan_expression_end("{a + (b", 1, Stop::MUSTACHE), None);
        assert_eq!(scan_expression_end("{a )}", 1, Stop::MUSTACHE), None);
    }

    #[test]
    fn test_scan_stops_at_keyword() {
        let src = "{#each items.filter(x => x.as) as item}";
        let stop = Stop {
            chars: b"}",
            keywords: &["as"],
        };
        let end = scan_expression_end(src, 7, stop).unwrap();
        assert_eq!(&src[7..end], "items.filter(x => x.as) ");
    }

    #[test]
    fn test_read_expression_reports_end_and_span() {
        let src = "{  count * 2 }after";
        let parsed = read_expression(src, 1, Stop::MUSTACHE).unwrap();
        assert_eq!(parsed.source, "count * 2");
        assert_eq!(parsed.span, Span::new(3, 12));
        assert_eq!(parsed.end, 13);
        assert_eq!(parsed.info.reads(), vec!["count"]);
    }

    #[test]
    fn test_invalid_expression_offset() {
        let src = "<p>{a +}</p>";
        let err = read_expression(src, 4, Stop::MUSTACHE).unwrap_err();
        assert_eq!(err.code, ERR_INVALID_EXPRESSION);
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn test_arrow_parameters_are_not_free() {
        let src = "items.map(item => item.price * rate)";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert_eq!(info.names(), vec!["items", "rate"]);
        let rate = info.references.iter().find(|r| r.name == "rate").unwrap();
        assert!(rate.deferred);
        assert_eq!(info.immediate_reads(), vec!["items"]);
    }

    #[test]
    fn test_writes_are_separated_from_reads() {
        let src = "total = price * qty";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert_eq!(info.written(), vec!["total"]);
        assert_eq!(info.reads(), vec!["price", "qty"]);
    }

    #[test]
    fn test_compound_and_update_are_read_write() {
        let src = "(count += step, n++)";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert_eq!(info.written(), vec!["count", "n"]);
        assert_eq!(info.reads(), vec!["count", "step", "n"]);
    }

    #[test]
    fn test_member_assignment_writes_root() {
        let src = "user.profile.name = value";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert_eq!(info.written(), vec!["user"]);
        assert!(info.reads().contains(&"value"));
    }

    #[test]
    fn test_write_sites_cover_assignments() {
        let src = "(items = [...items, x], count++)";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert_eq!(info.writes.len(), 2);
        assert_eq!(&src[info.writes[0].span.start..info.writes[0].span.end], "items = [...items, x]");
        assert_eq!(info.writes[1].names, vec!["count"]);
    }

    #[test]
    fn test_block_locals_are_not_free() {
        let src = "() => { let total = 0; try { total++ } catch (e) { log(e) } }";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert_eq!(info.names(), vec!["log"]);
        assert!(info.writes.is_empty());
    }

    #[test]
    fn test_shape_classification() {
        let shape = |s: &str| analyze_expression(s, Span::new(0, s.len())).unwrap().shape;
        assert_eq!(shape("handle(event)"), ExprShape::Call);
        assert_eq!(shape("(handle())"), ExprShape::Call);
        assert_eq!(shape("a.b"), ExprShape::Member);
        assert_eq!(shape("name"), ExprShape::Identifier);
        assert_eq!(shape("'x'"), ExprShape::Literal);
        assert_eq!(shape("a ? b : c"), ExprShape::Other);
    }

    #[test]
    fn test_shorthand_property_is_flagged() {
        let src = "{ count, other: 1 }";
        let info = analyze_expression(src, Span::new(0, src.len())).unwrap();
        assert!(info.references[0].shorthand);
        assert_eq!(info.references[0].name, "count");
    }

    #[test]
    fn test_pattern_names() {
        let src = "{ id, name: label, tags: [first] }";
        let names = pattern_names(src, Span::new(0, src.len())).unwrap();
        assert_eq!(names, vec!["id", "label", "first"]);
        assert!(pattern_names("1 + 2", Span::new(0, 5)).is_err());
    }
}
