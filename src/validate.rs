//! Structural validation of directives, bindings and slots.
//!
//! Runs after the binder. Directive shape problems and bad `bind:` targets are
//! binding errors (fatal only under `strict`); slot structure problems are
//! always fatal because no sensible program can be emitted for them.

use std::collections::{HashMap, HashSet};

use crate::ast::{Ast, AttributeValue, DirectiveKind, Element, Expr, ExprId, NodeId, NodeKind};
use crate::binder::{BindingKind, Bindings, Resolution};
use crate::diagnostic::{
    CompilerError, ERR_INVALID_BINDING, ERR_INVALID_DIRECTIVE, ERR_INVALID_SLOT,
    ERR_INVALID_TEMPLATE_ASSIGNMENT,
};
use crate::expression::ExprShape;
use crate::scope::ScopeTree;
use crate::script::DeclKind;
use crate::session::CompileSession;
use crate::visitor::{walk_element, walk_root, NodeVisitor};

/// Check a `bind:` target and return the root binding name it writes.
pub fn bind_target(ast: &Ast, bindings: &Bindings, scopes: &ScopeTree, expr: ExprId) -> Result<String, String> {
    let expr = ast.expr(expr);
    if !matches!(expr.info.shape, ExprShape::Identifier | ExprShape::Member) {
        return Err(format!("Cannot bind to `{}`: expected an identifier or member expression", expr.source));
    }
    let Some(root) = expr.info.references.first() else {
        return Err(format!("Cannot bind to `{}`", expr.source));
    };
    match bindings.resolve(scopes, scopes.expr_scope(expr.id), &root.name) {
        Resolution::Binding(i) => {
            let binding = &bindings.list[i];
            let constant = matches!(
                binding.decl_kind,
                Some(DeclKind::Const) | Some(DeclKind::Function) | Some(DeclKind::Class)
            );
            match binding.kind {
                BindingKind::Prop | BindingKind::State if !constant || expr.info.shape == ExprShape::Member => {
                    Ok(root.name.clone())
                }
                BindingKind::Derived => Err(format!(
                    "Cannot bind to `{}`: it is computed by a reactive declaration",
                    root.name
                )),
                BindingKind::Import | BindingKind::ModuleLocal => Err(format!(
                    "Cannot bind to `{}`: it is not instance state",
                    root.name
                )),
                _ => Err(format!("Cannot bind to `{}`: it is a constant", root.name)),
            }
        }
        Resolution::Local { .. } => Err(format!(
            "Cannot bind to `{}`: block-local values cannot be bound",
            root.name
        )),
        _ => Err(format!("Cannot bind to `{}`: it is not declared", root.name)),
    }
}

/// At most one intro and one outro transition per element.
pub fn duplicate_transition(element: &Element) -> Option<&crate::ast::Directive> {
    let mut intro = false;
    let mut outro = false;
    for directive in &element.directives {
        let (is_intro, is_outro) = (directive.kind.is_intro(), directive.kind.is_outro());
        if (is_intro && intro) || (is_outro && outro) {
            return Some(directive);
        }
        intro |= is_intro;
        outro |= is_outro;
    }
    None
}

pub fn validate(
    ast: &Ast,
    bindings: &Bindings,
    scopes: &ScopeTree,
    session: &mut CompileSession,
) -> Result<(), CompilerError> {
    let mut validator = Validator {
        bindings,
        scopes,
        session,
        bind_exprs: HashSet::new(),
        fatal: None,
    };
    walk_root(&mut validator, ast);
    match validator.fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct Validator<'a> {
    bindings: &'a Bindings,
    scopes: &'a ScopeTree,
    session: &'a mut CompileSession,
    /// `bind:` expressions, where writing is the point.
    bind_exprs: HashSet<ExprId>,
    fatal: Option<CompilerError>,
}

impl<'a> Validator<'a> {
    fn directive_error(&mut self, message: String, offset: usize) {
        self.session
            .report_binding(CompilerError::binding(ERR_INVALID_DIRECTIVE, message, offset));
    }

    fn slot_error(&mut self, message: String, offset: usize) {
        if self.fatal.is_none() {
            self.fatal = Some(CompilerError::binding(ERR_INVALID_SLOT, message, offset));
        }
    }

    fn check_directives(&mut self, ast: &Ast, id: NodeId, element: &Element) {
        let kind = ast.kind(id);
        let slotted = element.attribute("slot").is_some();

        for directive in &element.directives {
            let misplaced = match (kind, directive.kind) {
                (NodeKind::Slot(_), _) => Some("<slot> cannot have directives"),
                (NodeKind::Component(_), DirectiveKind::Class | DirectiveKind::Use) => {
                    Some("this directive cannot be used on components")
                }
                (NodeKind::Component(_), k) if k.is_intro() || k.is_outro() => {
                    Some("transitions cannot be used on components")
                }
                (NodeKind::Element(_), DirectiveKind::Let) if !slotted => {
                    Some("`let:` can only be used on components and slotted elements")
                }
                _ => None,
            };
            if let Some(reason) = misplaced {
                self.directive_error(
                    format!("Invalid `{}:{}` on <{}>: {}", prefix(directive.kind), directive.name, element.name, reason),
                    directive.span.start,
                );
                continue;
            }

            if directive.kind == DirectiveKind::Bind {
                match directive.expression {
                    Some(expr) => {
                        self.bind_exprs.insert(expr);
                        if let Err(message) = bind_target(ast, self.bindings, self.scopes, expr) {
                            self.session.report_binding(CompilerError::binding(
                                ERR_INVALID_BINDING,
                                message,
                                ast.expr(expr).span.start,
                            ));
                        }
                    }
                    None => self.directive_error("`bind:` requires a target".to_string(), directive.span.start),
                }
            }
        }

        if let Some(duplicate) = duplicate_transition(element) {
            self.directive_error(
                format!("<{}> already has an {} transition", element.name, if duplicate.kind.is_intro() { "intro" } else { "outro" }),
                duplicate.span.start,
            );
        }
    }

    fn check_slot_attribute(&mut self, ast: &Ast, id: NodeId, element: &Element) {
        let Some(attr) = element.attribute("slot") else {
            return;
        };
        if !matches!(attr.value, AttributeValue::Static(_)) {
            self.slot_error("The `slot` attribute must be a static value".to_string(), attr.span.start);
            return;
        }
        let parent_is_component = ast
            .parent(id)
            .map_or(false, |p| matches!(ast.kind(p), NodeKind::Component(_)));
        if !parent_is_component {
            self.slot_error(
                "Elements with a `slot` attribute must be direct children of a component".to_string(),
                attr.span.start,
            );
        }
    }

    fn check_component_slots(&mut self, ast: &Ast, id: NodeId) {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for &child in ast.children(id) {
            let Some(el) = ast.kind(child).as_element() else {
                continue;
            };
            if let Some(name) = el.static_attribute("slot") {
                if seen.insert(name.to_string(), child.index()).is_some() {
                    self.slot_error(
                        format!("Duplicate slot content for `{}`", name),
                        ast.node(child).span.start,
                    );
                }
            }
        }
    }
}

fn prefix(kind: DirectiveKind) -> &'static str {
    match kind {
        DirectiveKind::On => "on",
        DirectiveKind::Bind => "bind",
        DirectiveKind::Class => "class",
        DirectiveKind::Use => "use",
        DirectiveKind::Transition => "transition",
        DirectiveKind::In => "in",
        DirectiveKind::Out => "out",
        DirectiveKind::Let => "let",
    }
}

impl<'a> NodeVisitor for Validator<'a> {
    fn visit_element(&mut self, ast: &Ast, id: NodeId, element: &Element) {
        self.check_slot_attribute(ast, id, element);
        self.check_directives(ast, id, element);
        walk_element(self, ast, id, element);
    }

    fn visit_component(&mut self, ast: &Ast, id: NodeId, component: &Element) {
        self.check_component_slots(ast, id);
        self.check_slot_attribute(ast, id, component);
        self.check_directives(ast, id, component);
        walk_element(self, ast, id, component);
    }

    fn visit_slot(&mut self, ast: &Ast, id: NodeId, slot: &Element) {
        if let Some(attr) = slot.attribute("name") {
            match &attr.value {
                AttributeValue::Static(name) if !name.is_empty() => {
                    if name == "default" {
                        self.slot_error("`default` is a reserved slot name".to_string(), attr.span.start);
                    }
                }
                _ => self.slot_error("Slot names must be static, non-empty text".to_string(), attr.span.start),
            }
        }
        self.check_directives(ast, id, slot);
        walk_element(self, ast, id, slot);
    }

    fn visit_expression(&mut self, _ast: &Ast, _owner: NodeId, expr: &Expr) {
        if self.bind_exprs.contains(&expr.id) || self.scopes.is_declaration(expr.id) {
            return;
        }
        let written = expr.info.written();
        if let Some(name) = written.first() {
            self.session.report_binding(CompilerError::binding(
                ERR_INVALID_TEMPLATE_ASSIGNMENT,
                format!(
                    "Template expressions cannot assign to `{}`: move the assignment into a script function",
                    name
                ),
                expr.span.start,
            ));
        }
    }
}

/// Slot names declared by `<slot>` elements in a template. Duplicates are an
/// error.
pub fn slot_names(ast: &Ast) -> Result<Vec<String>, CompilerError> {
    let mut names: Vec<String> = Vec::new();
    for id in ast.node_ids() {
        if let NodeKind::Slot(el) = ast.kind(id) {
            let name = el.static_attribute("name").unwrap_or("default").to_string();
            if names.contains(&name) {
                return Err(CompilerError::binding(
                    ERR_INVALID_SLOT,
                    format!("A slot named `{}` already exists", name),
                    ast.node(id).span.start,
                ));
            }
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::options::CompileOptions;
    use crate::parse::parse;
    use crate::script::analyze_script;

    fn check(source: &str, options: CompileOptions) -> (Result<(), CompilerError>, CompileSession) {
        let ast = parse(source).unwrap();
        let scopes = ScopeTree::build(&ast);
        let instance = ast.instance.map(|id| match ast.kind(id) {
            NodeKind::Script(s) => analyze_script(&ast.source, s.content, s.context).unwrap(),
            _ => unreachable!(),
        });
        let mut session = CompileSession::new(source, &options);
        let bindings = bind(&ast, instance.as_ref(), None, &scopes, &mut session).unwrap();
        let result = validate(&ast, &bindings, &scopes, &mut session);
        (result, session)
    }

    fn strict() -> CompileOptions {
        CompileOptions::default().strict(true)
    }

    #[test]
    fn test_bind_to_state_is_valid() {
        let (result, session) = check("<script>let name = ''; let user = {};</script><input bind:value={name}><input bind:value={user.email}>", strict());
        assert!(result.is_ok());
        assert!(!session.diagnostics.has_errors());
    }

    #[test]
    fn test_bind_to_derived_is_rejected() {
        let source = "<script>let a = 1; $: b = a * 2;</script><input bind:value={b}>";
        let (_, session) = check(source, strict());
        assert_eq!(session.diagnostics.codes(), vec![ERR_INVALID_BINDING]);
    }

    #[test]
    fn test_bind_to_block_local_is_rejected() {
        let source = "<script>let items = [];</script>{#each items as item}<input bind:value={item}>{/each}";
        let (_, session) = check(source, strict());
        assert_eq!(session.diagnostics.codes(), vec![ERR_INVALID_BINDING]);
    }

    #[test]
    fn test_bind_requires_reference_shape() {
        let source = "<script>let a = 1;</script><input bind:value={a + 1}>";
        let (_, session) = check(source, CompileOptions::default());
        assert_eq!(session.diagnostics.warnings[0].code, ERR_INVALID_BINDING);
    }

    #[test]
    fn test_template_assignment() {
        let source = "<script>let count = 0; function run(f) { f(); }</script><button on:click={run(() => count = 1)}>x</button>";
        let (_, session) = check(source, strict());
        assert_eq!(session.diagnostics.codes(), vec![ERR_INVALID_TEMPLATE_ASSIGNMENT]);
    }

    #[test]
    fn test_directive_placement() {
        let source = "<script>import Card from './Card.weave'; let on = true;</script><Card class:on /><p let:x>{x}</p>";
        let (_, session) = check(source, strict());
        assert_eq!(session.diagnostics.codes(), vec![ERR_INVALID_DIRECTIVE, ERR_INVALID_DIRECTIVE]);
    }

    #[test]
    fn test_duplicate_transition() {
        let source = "<script>import { fade, fly } from 'weave/transition';</script><p transition:fade out:fly>x</p>";
        let (_, session) = check(source, strict());
        assert_eq!(session.diagnostics.codes(), vec![ERR_INVALID_DIRECTIVE]);
    }

    #[test]
    fn test_slot_attribute_outside_component() {
        let (result, _) = check("<div><p slot=\"header\">x</p></div>", CompileOptions::default());
        assert_eq!(result.unwrap_err().code, ERR_INVALID_SLOT);
    }

    #[test]
    fn test_duplicate_slot_names() {
        let ast = parse("<slot name=\"a\" /><slot name=\"a\" />").unwrap();
        assert_eq!(slot_names(&ast).unwrap_err().code, ERR_INVALID_SLOT);
        let ast = parse("<slot /><slot name=\"a\" />").unwrap();
        assert_eq!(slot_names(&ast).unwrap(), vec!["default", "a"]);
    }
}
