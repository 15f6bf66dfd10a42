//! Script analysis.
//!
//! Parses the instance and module scripts with oxc and extracts what the binder
//! and the emitter need: top-level declarations, imports, reactive `$:`
//! statements, free references and write sites. Rewriting for the generated
//! program is done by text splicing with [`Rewriter`], so untouched code is
//! carried over byte for byte.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    AssignmentTarget, BindingPattern, Declaration, Expression, ImportDeclarationSpecifier,
    Statement, VariableDeclaration, VariableDeclarationKind,
};
use oxc_ast_visit::Visit;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use oxc_syntax::operator::AssignmentOperator;
use regex::Regex;
use serde::Serialize;

use crate::ast::{ScriptContext, Span};
use crate::diagnostic::{CompilerError, ERR_SCRIPT_SYNTAX};
use crate::expression::{collect_binding_pattern, Reference, ReferenceCollector, WriteSite};

lazy_static! {
    static ref EXPORT_LIST_RE: Regex = Regex::new(r"export\s*\{([^}]*)\}").unwrap();
}

fn source_type() -> SourceType {
    SourceType::default().with_module(true)
}

fn syntax_error(message: String, content: Span) -> CompilerError {
    CompilerError::syntax(ERR_SCRIPT_SYNTAX, message, content.start)
}

/// Check that a script region parses, without analysing it.
pub fn check_syntax(source: &str, content: Span) -> Result<(), CompilerError> {
    let code = &source[content.start..content.end];
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, source_type()).parse();
    match ret.errors.first() {
        Some(err) => Err(syntax_error(format!("Invalid script: {}", err), content)),
        None => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Let,
    Var,
    Const,
    Function,
    Class,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementKind {
    Import,
    Declaration,
    Reactive,
    ExportList,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopLevelStatement {
    pub span: Span,
    pub kind: StatementKind,
    /// `export ` keyword to strip from exported declarations.
    pub export_keyword: Option<Span>,
    pub references: Vec<Reference>,
    pub writes: Vec<WriteSite>,
    /// Normalised import text.
    pub import: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDeclaration {
    pub name: String,
    /// Span of the declaring pattern or identifier.
    pub span: Span,
    pub kind: DeclKind,
    pub exported: bool,
    pub statement: usize,
    /// Destructuring pattern rather than a plain identifier.
    pub destructured: bool,
    pub init: Option<Span>,
    /// References made by the initializer (or the whole function/class body).
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactiveStatement {
    pub statement: usize,
    pub span: Span,
    /// The statement after the `$:` label.
    pub body: Span,
    /// `$: name = expression` form.
    pub target: Option<String>,
    /// Names assigned when the statement runs.
    pub assignees: Vec<String>,
    /// Names read when the statement runs, excluding its own assignees.
    pub reads: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptAnalysis {
    pub context: ScriptContext,
    pub content: Span,
    pub statements: Vec<TopLevelStatement>,
    pub declarations: Vec<ScriptDeclaration>,
    pub reactive: Vec<ReactiveStatement>,
}

impl ScriptAnalysis {
    pub fn declaration(&self, name: &str) -> Option<&ScriptDeclaration> {
        self.declarations.iter().find(|d| d.name == name)
    }

    pub fn imports(&self) -> impl Iterator<Item = &TopLevelStatement> {
        self.statements.iter().filter(|s| s.kind == StatementKind::Import)
    }

    /// Every write site in the script, with the statement it belongs to.
    pub fn write_sites(&self) -> impl Iterator<Item = (usize, &WriteSite)> {
        self.statements
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.writes.iter().map(move |w| (i, w)))
    }

    pub fn reactive_at(&self, statement: usize) -> Option<&ReactiveStatement> {
        self.reactive.iter().find(|r| r.statement == statement)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn analyze_script(
    source: &str,
    content: Span,
    context: ScriptContext,
) -> Result<ScriptAnalysis, CompilerError> {
    let code = &source[content.start..content.end];
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, source_type()).parse();
    if let Some(err) = ret.errors.first() {
        return Err(syntax_error(format!("Invalid script: {}", err), content));
    }

    let mut builder = AnalysisBuilder {
        source,
        base: content.start,
        analysis: ScriptAnalysis {
            context,
            content,
            statements: Vec::new(),
            declarations: Vec::new(),
            reactive: Vec::new(),
        },
    };
    for stmt in &ret.program.body {
        builder.add_statement(stmt)?;
    }
    builder.apply_export_lists();

    tracing::trace!(
        context = ?context,
        declarations = builder.analysis.declarations.len(),
        reactive = builder.analysis.reactive.len(),
        "analysed script"
    );
    Ok(builder.analysis)
}

struct AnalysisBuilder<'s> {
    source: &'s str,
    base: usize,
    analysis: ScriptAnalysis,
}

impl<'s> AnalysisBuilder<'s> {
    fn abs(&self, span: oxc_span::Span) -> Span {
        Span::new(self.base + span.start as usize, self.base + span.end as usize)
    }

    fn collect(&self, f: impl FnOnce(&mut ReferenceCollector)) -> ReferenceCollector {
        let mut collector = ReferenceCollector::new(self.base);
        f(&mut collector);
        collector
    }

    fn add_statement(&mut self, stmt: &Statement) -> Result<(), CompilerError> {
        let index = self.analysis.statements.len();
        let span = self.abs(stmt.span());
        let collector = self.collect(|c| c.visit_statement(stmt));
        let mut top = TopLevelStatement {
            span,
            kind: StatementKind::Other,
            export_keyword: None,
            references: collector.references,
            writes: collector.sites,
            import: None,
        };

        match stmt {
            Statement::ImportDeclaration(import) => {
                top.kind = StatementKind::Import;
                top.import = Some(normalize_import(&self.source[span.start..span.end]));
                for specifier in import.specifiers.iter().flatten() {
                    let local = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => &s.local,
                    };
                    self.push_declaration(ScriptDeclaration {
                        name: local.name.to_string(),
                        span: self.abs(local.span),
                        kind: DeclKind::Import,
                        exported: false,
                        statement: index,
                        destructured: false,
                        init: None,
                        references: vec![],
                    });
                }
            }
            Statement::VariableDeclaration(var) => {
                top.kind = StatementKind::Declaration;
                self.add_variables(var, false, index)?;
            }
            Statement::FunctionDeclaration(func) => {
                top.kind = StatementKind::Declaration;
                if let Some(id) = &func.id {
                    self.add_named(id.name.to_string(), self.abs(id.span), DeclKind::Function, false, index, &top.references);
                }
            }
            Statement::ClassDeclaration(class) => {
                top.kind = StatementKind::Declaration;
                if let Some(id) = &class.id {
                    self.add_named(id.name.to_string(), self.abs(id.span), DeclKind::Class, false, index, &top.references);
                }
            }
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(decl) => {
                    top.kind = StatementKind::Declaration;
                    let decl_span = self.abs(decl.span());
                    top.export_keyword = Some(Span::new(span.start, decl_span.start));
                    match decl {
                        Declaration::VariableDeclaration(var) => self.add_variables(var, true, index)?,
                        Declaration::FunctionDeclaration(func) => {
                            if let Some(id) = &func.id {
                                self.add_named(id.name.to_string(), self.abs(id.span), DeclKind::Function, true, index, &top.references);
                            }
                        }
                        Declaration::ClassDeclaration(class) => {
                            if let Some(id) = &class.id {
                                self.add_named(id.name.to_string(), self.abs(id.span), DeclKind::Class, true, index, &top.references);
                            }
                        }
                        _ => {}
                    }
                }
                None => top.kind = StatementKind::ExportList,
            },
            Statement::LabeledStatement(labeled)
                if labeled.label.name.as_str() == "$" && self.analysis.context == ScriptContext::Instance =>
            {
                top.kind = StatementKind::Reactive;
                let target = match &labeled.body {
                    Statement::ExpressionStatement(expr_stmt) => match &expr_stmt.expression {
                        Expression::AssignmentExpression(assign) if assign.operator == AssignmentOperator::Assign => {
                            match &assign.left {
                                AssignmentTarget::AssignmentTargetIdentifier(id) => Some(id.name.to_string()),
                                _ => None,
                            }
                        }
                        _ => None,
                    },
                    _ => None,
                };
                let mut assignees: Vec<String> = Vec::new();
                for r in top.references.iter().filter(|r| r.access.writes() && !r.deferred) {
                    if !assignees.contains(&r.name) {
                        assignees.push(r.name.clone());
                    }
                }
                let mut reads: Vec<String> = Vec::new();
                for r in top.references.iter().filter(|r| r.access.reads() && !r.deferred) {
                    if !assignees.contains(&r.name) && !reads.contains(&r.name) {
                        reads.push(r.name.clone());
                    }
                }
                self.analysis.reactive.push(ReactiveStatement {
                    statement: index,
                    span,
                    body: self.abs(labeled.body.span()),
                    target,
                    assignees,
                    reads,
                });
            }
            _ => {}
        }

        self.analysis.statements.push(top);
        Ok(())
    }

    fn add_variables(&mut self, var: &VariableDeclaration, exported: bool, index: usize) -> Result<(), CompilerError> {
        let kind = match var.kind {
            VariableDeclarationKind::Let => DeclKind::Let,
            VariableDeclarationKind::Var => DeclKind::Var,
            _ => DeclKind::Const,
        };
        for declarator in &var.declarations {
            let destructured = !matches!(declarator.id, BindingPattern::BindingIdentifier(_));
            let id_span = self.abs(declarator.id.span());
            if exported && destructured && kind != DeclKind::Const {
                return Err(CompilerError::syntax(
                    ERR_SCRIPT_SYNTAX,
                    "Exported props must be plain identifiers",
                    id_span.start,
                ));
            }
            let mut names = Vec::new();
            collect_binding_pattern(&declarator.id, &mut names);
            let (init, references) = match &declarator.init {
                Some(init) => {
                    let collector = self.collect(|c| c.visit_expression(init));
                    (Some(self.abs(init.span())), collector.references)
                }
                None => (None, vec![]),
            };
            for name in names {
                self.push_declaration(ScriptDeclaration {
                    name,
                    span: id_span,
                    kind,
                    exported,
                    statement: index,
                    destructured,
                    init,
                    references: references.clone(),
                });
            }
        }
        Ok(())
    }

    fn add_named(
        &mut self,
        name: String,
        span: Span,
        kind: DeclKind,
        exported: bool,
        index: usize,
        references: &[Reference],
    ) {
        self.push_declaration(ScriptDeclaration {
            name,
            span,
            kind,
            exported,
            statement: index,
            destructured: false,
            init: None,
            references: references.to_vec(),
        });
    }

    fn push_declaration(&mut self, declaration: ScriptDeclaration) {
        self.analysis.declarations.push(declaration);
    }

    /// `export { a, b as c }` marks existing declarations as exported.
    fn apply_export_lists(&mut self) {
        let mut exported = Vec::new();
        for stmt in self.analysis.statements.iter().filter(|s| s.kind == StatementKind::ExportList) {
            let text = &self.source[stmt.span.start..stmt.span.end];
            if let Some(caps) = EXPORT_LIST_RE.captures(text) {
                for item in caps[1].split(',') {
                    if let Some(local) = item.split_whitespace().next() {
                        exported.push(local.to_string());
                    }
                }
            }
        }
        for decl in &mut self.analysis.declarations {
            if exported.contains(&decl.name) {
                decl.exported = true;
            }
        }
    }
}

/// Re-print an import declaration through oxc so equivalent imports compare equal.
fn normalize_import(text: &str) -> String {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, text, source_type()).parse();
    if !ret.errors.is_empty() {
        return text.trim().to_string();
    }
    Codegen::new().build(&ret.program).code.trim().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWRITER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Span-based text edits over the component source. Edits are applied in
/// offset order; insertions at the same offset keep the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    edits: Vec<Edit>,
}

impl Rewriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, at: usize, text: impl Into<String>) {
        self.edits.push(Edit {
            start: at,
            end: at,
            text: text.into(),
        });
    }

    pub fn replace(&mut self, span: Span, text: impl Into<String>) {
        self.edits.push(Edit {
            start: span.start,
            end: span.end,
            text: text.into(),
        });
    }

    pub fn remove(&mut self, span: Span) {
        self.replace(span, "");
    }

    /// Render `source[span]` with every edit that falls inside it.
    pub fn render(&self, source: &str, span: Span) -> String {
        let mut edits: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|e| e.start >= span.start && e.end <= span.end)
            .collect();
        edits.sort_by_key(|e| e.start);

        let mut out = String::with_capacity(span.len());
        let mut cursor = span.start;
        for edit in edits {
            if edit.start < cursor {
                continue;
            }
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..span.end]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(code: &str) -> ScriptAnalysis {
        analyze_script(code, Span::new(0, code.len()), ScriptContext::Instance).unwrap()
    }

    #[test]
    fn test_declarations_and_exports() {
        let a = analyze("import { fade } from 'weave/transition';\nexport let name = 'x';\nconst max = 10;\nfunction reset() { name = ''; }");
        let kinds: Vec<_> = a.declarations.iter().map(|d| (d.name.as_str(), d.kind, d.exported)).collect();
        assert_eq!(
            kinds,
            vec![
                ("fade", DeclKind::Import, false),
                ("name", DeclKind::Let, true),
                ("max", DeclKind::Const, false),
                ("reset", DeclKind::Function, false),
            ]
        );
        assert!(a.statements[1].export_keyword.is_some());
        assert!(a.statements[0].import.as_deref().unwrap().contains("weave/transition"));
    }

    #[test]
    fn test_reactive_statement_reads_exclude_assignees() {
        let a = analyze("let count = 0;\n$: doubled = count * 2;\n$: count = count + 0;");
        assert_eq!(a.reactive.len(), 2);
        assert_eq!(a.reactive[0].target.as_deref(), Some("doubled"));
        assert_eq!(a.reactive[0].reads, vec!["count"]);
        assert!(a.reactive[1].reads.is_empty());
        assert_eq!(a.reactive[1].assignees, vec!["count"]);
    }

    #[test]
    fn test_reactive_reads_skip_closures() {
        let a = analyze("$: handler = () => total + offset;");
        assert!(a.reactive[0].reads.is_empty());
    }

    #[test]
    fn test_write_sites_inside_functions() {
        let a = analyze("let count = 0;\nfunction inc() { count += 1; }");
        let sites: Vec<_> = a.write_sites().map(|(_, w)| w.names.clone()).collect();
        assert_eq!(sites, vec![vec!["count".to_string()]]);
    }

    #[test]
    fn test_export_list_marks_declarations() {
        let a = analyze("let a = 1; let b = 2;\nexport { a };");
        assert!(a.declaration("a").unwrap().exported);
        assert!(!a.declaration("b").unwrap().exported);
    }

    #[test]
    fn test_module_context_has_no_reactive_statements() {
        let code = "$: x = 1;";
        let a = analyze_script(code, Span::new(0, code.len()), ScriptContext::Module).unwrap();
        assert!(a.reactive.is_empty());
    }

    #[test]
    fn test_syntax_error_reported_at_region() {
        let source = "<script>let = ;</script>";
        let err = check_syntax(source, Span::new(8, 15)).unwrap_err();
        assert_eq!(err.code, ERR_SCRIPT_SYNTAX);
        assert_eq!(err.offset, 8);
    }

    #[test]
    fn test_rewriter_applies_edits_in_order() {
        let source = "x = 1; y++";
        let mut r = Rewriter::new();
        r.insert(0, "$$invalidate(\"x\", ");
        r.insert(5, ")");
        r.insert(7, "$$invalidate(\"y\", ");
        r.insert(10, ")");
        assert_eq!(
            r.render(source, Span::new(0, source.len())),
            "$$invalidate(\"x\", x = 1); $$invalidate(\"y\", y++)"
        );
        assert_eq!(r.render(source, Span::new(7, 10)), "$$invalidate(\"y\", y++)");
    }
}
