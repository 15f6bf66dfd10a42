//! Expression binder.
//!
//! Classifies every top-level script declaration exactly once and resolves
//! every template reference against the scope chain, then the instance
//! script, then the module script, then [`GLOBALS`]. Results are kept in
//! [`Bindings`], a side table keyed by name and by `ExprId`; the syntax tree
//! is not touched.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::ast::{Ast, DirectiveKind, ExprId, NodeKind, ScriptContext, Span};
use crate::diagnostic::{
    CompilerError, ERR_ILLEGAL_REDECLARATION, ERR_MISSING_COMPONENT, ERR_RESERVED_NAME,
    ERR_UNRESOLVED_IDENTIFIER, WARN_MODULE_SCRIPT_REACTIVE,
};
use crate::expression::Reference;
use crate::scope::{LocalOrigin, ScopeId, ScopeTree, GLOBALS};
use crate::script::{DeclKind, ScriptAnalysis, StatementKind};
use crate::session::CompileSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
    /// `export let`: settable from outside, a reactive root.
    Prop,
    /// Reassigned after initialization: a reactive root.
    State,
    /// Assigned only by a single reactive statement.
    Derived,
    /// Instance value that never changes but depends on the instance.
    Local,
    /// Never changes and depends on nothing per-instance: moved to module level.
    Hoistable,
    Import,
    /// Declared in the module script.
    ModuleLocal,
}

impl BindingKind {
    /// Changes to the binding drive updates.
    pub fn is_reactive(self) -> bool {
        matches!(self, BindingKind::Prop | BindingKind::State | BindingKind::Derived)
    }

    /// Lives in the per-instance context rather than at module level.
    pub fn is_instance(self) -> bool {
        self.is_reactive() || self == BindingKind::Local
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub name: String,
    pub kind: BindingKind,
    pub context: ScriptContext,
    #[serde(skip)]
    pub declared: Option<Span>,
    pub decl_kind: Option<DeclKind>,
    pub exported: bool,
    /// Introduced by `$: name = ...` without a declaration.
    pub implicit: bool,
    pub referenced_in_template: bool,
    /// Written after initialization.
    pub mutated: bool,
    /// Target of a `bind:` directive.
    pub bound: bool,
    pub hoisted: bool,
    /// Declaring top-level statement.
    #[serde(skip)]
    pub statement: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Local { scope: ScopeId, origin: LocalOrigin },
    Binding(usize),
    Global,
    /// Free variable provided by the host environment.
    Unresolved,
}

#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub list: Vec<Binding>,
    index: HashMap<String, usize>,
    /// Per template expression, one entry per `ExprInfo::references` item.
    resolutions: HashMap<ExprId, Vec<Resolution>>,
    /// Instance statements moved to module level.
    pub hoisted_statements: BTreeSet<usize>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.index.get(name).map(|&i| &self.list[i])
    }

    pub fn kind_of(&self, name: &str) -> Option<BindingKind> {
        self.get(name).map(|b| b.kind)
    }

    pub fn is_reactive(&self, name: &str) -> bool {
        self.kind_of(name).map_or(false, BindingKind::is_reactive)
    }

    pub fn resolutions(&self, expr: ExprId) -> &[Resolution] {
        self.resolutions.get(&expr).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a bare name evaluated in `scope`.
    pub fn resolve(&self, scopes: &ScopeTree, scope: ScopeId, name: &str) -> Resolution {
        if let Some((scope, origin)) = scopes.lookup(scope, name) {
            return Resolution::Local { scope, origin };
        }
        if let Some(&i) = self.index.get(name) {
            return Resolution::Binding(i);
        }
        if GLOBALS.contains(name) {
            return Resolution::Global;
        }
        Resolution::Unresolved
    }

    pub fn props(&self) -> Vec<&str> {
        self.list
            .iter()
            .filter(|b| b.kind == BindingKind::Prop)
            .map(|b| b.name.as_str())
            .collect()
    }

    pub fn instance(&self) -> impl Iterator<Item = &Binding> {
        self.list.iter().filter(|b| b.context == ScriptContext::Instance)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn bind(
    ast: &Ast,
    instance: Option<&ScriptAnalysis>,
    module: Option<&ScriptAnalysis>,
    scopes: &ScopeTree,
    session: &mut CompileSession,
) -> Result<Bindings, CompilerError> {
    let mut binder = Binder {
        ast,
        scopes,
        bindings: Bindings::default(),
        reported: HashSet::new(),
    };

    if let Some(module) = module {
        binder.declare_script(module)?;
    }
    if let Some(instance) = instance {
        binder.declare_script(instance)?;
        binder.declare_implicit(instance);
    }
    binder.check_template_locals()?;
    binder.mark_bound();
    if let Some(instance) = instance {
        binder.classify(instance, session);
        binder.hoist(instance);
    }
    binder.resolve_template(session)?;
    if let Some(instance) = instance {
        binder.resolve_reactive(instance, session);
    }

    for binding in &binder.bindings.list {
        session.reserve(&binding.name);
    }
    for (_, scope) in scopes.scopes() {
        for (name, _) in &scope.names {
            session.reserve(name);
        }
    }

    tracing::debug!(
        bindings = binder.bindings.len(),
        props = binder.bindings.props().len(),
        hoisted = binder.bindings.hoisted_statements.len(),
        "bound identifiers"
    );
    Ok(binder.bindings)
}

struct Binder<'a> {
    ast: &'a Ast,
    scopes: &'a ScopeTree,
    bindings: Bindings,
    reported: HashSet<String>,
}

fn check_reserved(name: &str, offset: usize) -> Result<(), CompilerError> {
    if name.starts_with("$$") {
        return Err(CompilerError::binding(
            ERR_RESERVED_NAME,
            format!("`{}` is reserved: names starting with `$$` belong to the compiler", name),
            offset,
        ));
    }
    Ok(())
}

impl<'a> Binder<'a> {
    fn push(&mut self, binding: Binding) {
        let index = self.bindings.list.len();
        // Instance declarations shadow module ones.
        self.bindings.index.insert(binding.name.clone(), index);
        self.bindings.list.push(binding);
    }

    fn declare_script(&mut self, script: &ScriptAnalysis) -> Result<(), CompilerError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for decl in &script.declarations {
            check_reserved(&decl.name, decl.span.start)?;
            if !seen.insert(decl.name.as_str()) {
                return Err(CompilerError::binding(
                    ERR_ILLEGAL_REDECLARATION,
                    format!("`{}` has already been declared", decl.name),
                    decl.span.start,
                ));
            }
            let kind = match (script.context, decl.kind) {
                (_, DeclKind::Import) => BindingKind::Import,
                (ScriptContext::Module, _) => BindingKind::ModuleLocal,
                (ScriptContext::Instance, _) => BindingKind::Local,
            };
            self.push(Binding {
                name: decl.name.clone(),
                kind,
                context: script.context,
                declared: Some(decl.span),
                decl_kind: Some(decl.kind),
                exported: decl.exported,
                implicit: false,
                referenced_in_template: false,
                mutated: false,
                bound: false,
                hoisted: script.context == ScriptContext::Module,
                statement: Some(decl.statement),
            });
        }
        Ok(())
    }

    /// `$: name = ...` with `name` declared nowhere declares it.
    fn declare_implicit(&mut self, instance: &ScriptAnalysis) {
        for reactive in &instance.reactive {
            let Some(target) = &reactive.target else {
                continue;
            };
            let declared_here = self
                .bindings
                .get(target)
                .map_or(false, |b| b.context == ScriptContext::Instance);
            if declared_here || target.starts_with("$$") {
                continue;
            }
            tracing::trace!(name = %target, "implicit reactive declaration");
            self.push(Binding {
                name: target.clone(),
                kind: BindingKind::Derived,
                context: ScriptContext::Instance,
                declared: Some(reactive.span),
                decl_kind: None,
                exported: false,
                implicit: true,
                referenced_in_template: false,
                mutated: false,
                bound: false,
                hoisted: false,
                statement: Some(reactive.statement),
            });
        }
    }

    /// Names declared twice in the same template frame.
    fn check_template_locals(&self) -> Result<(), CompilerError> {
        for (_, scope) in self.scopes.scopes() {
            let offset = self.ast.node(scope.owner).span.start;
            let mut seen = HashSet::new();
            for (name, _) in &scope.names {
                check_reserved(name, offset)?;
                if !seen.insert(name.as_str()) {
                    return Err(CompilerError::binding(
                        ERR_ILLEGAL_REDECLARATION,
                        format!("`{}` is declared more than once in the same block", name),
                        offset,
                    ));
                }
            }
        }
        Ok(())
    }

    /// `bind:` targets rooted at an instance binding.
    fn mark_bound(&mut self) {
        for id in self.ast.node_ids() {
            let Some(element) = self.ast.kind(id).as_element() else {
                continue;
            };
            for directive in element.directives_of(DirectiveKind::Bind) {
                let Some(expr) = directive.expression else {
                    continue;
                };
                let scope = self.scopes.expr_scope(expr);
                let Some(root) = self.ast.expr(expr).info.references.first() else {
                    continue;
                };
                if self.scopes.lookup(scope, &root.name).is_some() {
                    continue;
                }
                if let Some(&i) = self.bindings.index.get(&root.name) {
                    if self.bindings.list[i].context == ScriptContext::Instance {
                        self.bindings.list[i].bound = true;
                        self.bindings.list[i].mutated = true;
                    }
                }
            }
        }
    }

    fn classify(&mut self, instance: &ScriptAnalysis, session: &mut CompileSession) {
        let mut reactive_writers: HashMap<String, BTreeSet<usize>> = HashMap::new();
        let mut external: HashSet<String> = HashSet::new();
        let mut module_writes: Vec<(String, usize)> = Vec::new();

        for (stmt_index, site) in instance.write_sites() {
            let stmt = &instance.statements[stmt_index];
            let deferred = stmt
                .references
                .iter()
                .any(|r| r.access.writes() && r.deferred && site.span.contains(r.span));
            let reactive = instance.reactive_at(stmt_index);
            for name in &site.names {
                let Some(binding) = self.bindings.get(name) else {
                    continue;
                };
                if binding.context == ScriptContext::Module {
                    module_writes.push((name.clone(), site.span.start));
                    continue;
                }
                match reactive {
                    Some(r) if !deferred && r.assignees.contains(name) => {
                        reactive_writers.entry(name.clone()).or_default().insert(stmt_index);
                    }
                    _ => {
                        external.insert(name.clone());
                    }
                }
            }
        }

        for (name, offset) in module_writes {
            if self.reported.insert(format!("module:{}", name)) {
                session.report(
                    CompilerError::binding(
                        WARN_MODULE_SCRIPT_REACTIVE,
                        format!("`{}` is declared in the module script and will not be reactive", name),
                        offset,
                    )
                    .as_warning(),
                );
            }
        }

        for binding in self.bindings.list.iter_mut() {
            if binding.context != ScriptContext::Instance || binding.kind == BindingKind::Import {
                continue;
            }
            let writers = reactive_writers.get(&binding.name).map_or(0, BTreeSet::len);
            let written = external.contains(&binding.name);
            binding.mutated |= written || writers > 0;

            let settable = matches!(binding.decl_kind, Some(DeclKind::Let) | Some(DeclKind::Var));
            binding.kind = if binding.exported && settable {
                BindingKind::Prop
            } else if writers == 1 && !written {
                BindingKind::Derived
            } else if written || binding.bound || writers > 1 {
                BindingKind::State
            } else if binding.implicit {
                BindingKind::Derived
            } else {
                BindingKind::Local
            };
        }
    }

    /// Move never-changing instance declarations to module level. A statement
    /// is hoisted when every name it declares is Local and everything it
    /// references is itself module level or hoisted.
    fn hoist(&mut self, instance: &ScriptAnalysis) {
        let mut candidates: BTreeSet<usize> = BTreeSet::new();
        for (i, stmt) in instance.statements.iter().enumerate() {
            if stmt.kind != StatementKind::Declaration || stmt.export_keyword.is_some() {
                continue;
            }
            let all_local = instance
                .declarations
                .iter()
                .filter(|d| d.statement == i)
                .all(|d| self.bindings.kind_of(&d.name) == Some(BindingKind::Local) && !d.exported);
            if all_local {
                candidates.insert(i);
            }
        }

        let declared_by: HashMap<&str, usize> = instance
            .declarations
            .iter()
            .map(|d| (d.name.as_str(), d.statement))
            .collect();

        loop {
            let before = candidates.len();
            let snapshot = candidates.clone();
            candidates.retain(|&i| {
                instance.statements[i].references.iter().all(|r| {
                    match self.bindings.get(&r.name) {
                        None => true,
                        Some(b) if !b.kind.is_instance() => true,
                        Some(_) => declared_by
                            .get(r.name.as_str())
                            .map_or(false, |s| *s == i || snapshot.contains(s)),
                    }
                })
            });
            if candidates.len() == before {
                break;
            }
        }

        for binding in self.bindings.list.iter_mut() {
            if binding.context == ScriptContext::Instance {
                if let Some(stmt) = binding.statement {
                    if candidates.contains(&stmt) && binding.kind == BindingKind::Local {
                        binding.kind = BindingKind::Hoistable;
                        binding.hoisted = true;
                    }
                }
                if binding.kind == BindingKind::Import {
                    binding.hoisted = true;
                }
            }
        }
        self.bindings.hoisted_statements = candidates;
    }

    fn unresolved(&mut self, session: &mut CompileSession, reference: &Reference) {
        if !self.reported.insert(reference.name.clone()) {
            return;
        }
        session.report_binding(
            CompilerError::binding(
                ERR_UNRESOLVED_IDENTIFIER,
                format!("`{}` is not defined", reference.name),
                reference.span.start,
            )
            .with_hint(format!(
                "declare `{}` in the component script, or it is assumed to be provided by the host",
                reference.name
            )),
        );
    }

    fn resolve_template(&mut self, session: &mut CompileSession) -> Result<(), CompilerError> {
        for expr in self.ast.expressions() {
            if self.scopes.is_declaration(expr.id) {
                continue;
            }
            let scope = self.scopes.expr_scope(expr.id);
            let mut resolutions = Vec::with_capacity(expr.info.references.len());
            for reference in &expr.info.references {
                let resolution = self.bindings.resolve(self.scopes, scope, &reference.name);
                match resolution {
                    Resolution::Binding(i) => self.bindings.list[i].referenced_in_template = true,
                    Resolution::Unresolved => self.unresolved(session, reference),
                    _ => {}
                }
                resolutions.push(resolution);
            }
            self.bindings.resolutions.insert(expr.id, resolutions);
        }

        for id in self.ast.node_ids() {
            let Some(element) = self.ast.kind(id).as_element() else {
                continue;
            };
            let scope = self
                .ast
                .parent(id)
                .map_or(ScopeId::ROOT, |parent| self.scopes.node_scope(parent));
            if let NodeKind::Component(_) = self.ast.kind(id) {
                let root = element.name.split('.').next().unwrap_or_default();
                match self.bindings.resolve(self.scopes, scope, root) {
                    Resolution::Binding(i) => self.bindings.list[i].referenced_in_template = true,
                    Resolution::Local { .. } => {}
                    _ => {
                        return Err(CompilerError::binding(
                            ERR_MISSING_COMPONENT,
                            format!("<{}> is not defined: import it in the component script", element.name),
                            self.ast.node(id).span.start,
                        ))
                    }
                }
            }
            for directive in &element.directives {
                let named = matches!(
                    directive.kind,
                    DirectiveKind::Use | DirectiveKind::Transition | DirectiveKind::In | DirectiveKind::Out
                );
                if !named {
                    continue;
                }
                match self.bindings.resolve(self.scopes, scope, &directive.name) {
                    Resolution::Binding(i) => self.bindings.list[i].referenced_in_template = true,
                    Resolution::Unresolved => {
                        let reference = Reference {
                            name: directive.name.clone(),
                            span: directive.span,
                            access: crate::expression::Access::Read,
                            deferred: false,
                            shorthand: false,
                        };
                        self.unresolved(session, &reference);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Free names read by reactive statements.
    fn resolve_reactive(&mut self, instance: &ScriptAnalysis, session: &mut CompileSession) {
        for reactive in &instance.reactive {
            let stmt = &instance.statements[reactive.statement];
            for reference in &stmt.references {
                if self.bindings.get(&reference.name).is_none() && !GLOBALS.contains(reference.name.as_str()) {
                    self.unresolved(session, reference);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompileOptions;
    use crate::parse::parse;
    use crate::script::analyze_script;

    fn run(source: &str, options: CompileOptions) -> (Result<Bindings, CompilerError>, CompileSession) {
        let ast = parse(source).unwrap();
        let scopes = ScopeTree::build(&ast);
        let analyze = |id: Option<crate::ast::NodeId>| {
            id.map(|id| match ast.kind(id) {
                NodeKind::Script(script) => analyze_script(&ast.source, script.content, script.context).unwrap(),
                _ => unreachable!(),
            })
        };
        let instance = analyze(ast.instance);
        let module = analyze(ast.module);
        let mut session = CompileSession::new(source, &options);
        let result = bind(&ast, instance.as_ref(), module.as_ref(), &scopes, &mut session);
        (result, session)
    }

    fn kinds(bindings: &Bindings) -> Vec<(&str, BindingKind)> {
        bindings.list.iter().map(|b| (b.name.as_str(), b.kind)).collect()
    }

    #[test]
    fn test_classification() {
        let source = r#"<script>
    import Row from './Row.weave';
    export let title = 'list';
    let count = 0;
    const step = 2;
    let base = count;
    $: doubled = count * step;
    function increment() { count += step; }
</script>
<h1>{title} {doubled}</h1><Row /><button on:click={increment()}>+</button>"#;
        let (bindings, _) = run(source, CompileOptions::default());
        let bindings = bindings.unwrap();
        assert_eq!(
            kinds(&bindings),
            vec![
                ("Row", BindingKind::Import),
                ("title", BindingKind::Prop),
                ("count", BindingKind::State),
                ("step", BindingKind::Hoistable),
                ("base", BindingKind::Local),
                ("increment", BindingKind::Local),
                ("doubled", BindingKind::Derived),
            ]
        );
        assert!(bindings.get("doubled").unwrap().implicit);
        assert!(bindings.get("title").unwrap().referenced_in_template);
        assert_eq!(bindings.props(), vec!["title"]);
    }

    #[test]
    fn test_hoisting_follows_hoisted_references() {
        let source = r#"<script>
    let count = 0;
    const base = 2;
    const step = base * 2;
    const scaled = step * count;
    function increment() { count += step; }
</script>
<button on:click={increment()}>{scaled}</button>"#;
        let (bindings, _) = run(source, CompileOptions::default());
        let bindings = bindings.unwrap();
        assert_eq!(bindings.kind_of("base"), Some(BindingKind::Hoistable));
        assert_eq!(bindings.kind_of("step"), Some(BindingKind::Hoistable));
        assert_eq!(bindings.kind_of("scaled"), Some(BindingKind::Local));
        assert_eq!(bindings.hoisted_statements.len(), 2);
    }

    #[test]
    fn test_two_reactive_writers_make_state() {
        let source = "<script>let a = 1; let x; $: x = a; $: x = a + 1;</script>{x}";
        let (bindings, _) = run(source, CompileOptions::default());
        assert_eq!(bindings.unwrap().kind_of("x"), Some(BindingKind::State));
    }

    #[test]
    fn test_bound_names_are_state() {
        let source = "<script>let name = '';</script><input bind:value={name}>";
        let (bindings, _) = run(source, CompileOptions::default());
        assert_eq!(bindings.unwrap().kind_of("name"), Some(BindingKind::State));
    }

    #[test]
    fn test_template_locals_shadow_script() {
        let source = "<script>let item = 1;</script>{#each [1, 2] as item}{item}{/each}";
        let (bindings, _) = run(source, CompileOptions::default());
        let bindings = bindings.unwrap();
        let ast = parse(source).unwrap();
        let inner = ast.expressions().iter().find(|e| e.source == "item").unwrap();
        assert!(matches!(
            bindings.resolutions(inner.id)[0],
            Resolution::Local { origin: LocalOrigin::EachItem, .. }
        ));
        assert!(!bindings.get("item").unwrap().referenced_in_template);
    }

    #[test]
    fn test_redeclaration_is_an_error() {
        let source = "<script>let a = 1; function a() {}</script>";
        let (result, _) = run(source, CompileOptions::default());
        assert_eq!(result.unwrap_err().code, ERR_ILLEGAL_REDECLARATION);

        let (result, _) = run("{#each xs as [a, a]}{a}{/each}", CompileOptions::default());
        assert_eq!(result.unwrap_err().code, ERR_ILLEGAL_REDECLARATION);
    }

    #[test]
    fn test_reserved_names() {
        let (result, _) = run("<script>let $$x = 1;</script>", CompileOptions::default());
        assert_eq!(result.unwrap_err().code, ERR_RESERVED_NAME);
    }

    #[test]
    fn test_unresolved_strict_and_lenient() {
        let source = "<p>{missing} {missing}</p>";
        let (result, session) = run(source, CompileOptions::default());
        assert!(result.is_ok());
        assert_eq!(session.diagnostics.warnings.len(), 1);
        assert!(!session.diagnostics.has_errors());

        let (_, session) = run(source, CompileOptions::default().strict(true));
        assert_eq!(session.diagnostics.codes(), vec![ERR_UNRESOLVED_IDENTIFIER]);
        assert_eq!(session.diagnostics.errors[0].offset, 4);
    }

    #[test]
    fn test_missing_component() {
        let (result, _) = run("<Widget />", CompileOptions::default());
        assert_eq!(result.unwrap_err().code, ERR_MISSING_COMPONENT);
    }

    #[test]
    fn test_module_writes_warn() {
        let source = "<script context=\"module\">let total = 0;</script><script>function add() { total += 1; }</script>{total}";
        let (bindings, session) = run(source, CompileOptions::default());
        assert_eq!(bindings.unwrap().kind_of("total"), Some(BindingKind::ModuleLocal));
        assert_eq!(session.diagnostics.warnings[0].code, WARN_MODULE_SCRIPT_REACTIVE);
    }
}
