//! Template scope chain.
//!
//! Every template expression is assigned the innermost scope frame it is
//! evaluated in. Frames are introduced by each blocks (item pattern and index),
//! await branches (resolved value / error), `let:` slot props and event
//! handlers (`event`). Lookup walks innermost to outermost; names not found
//! here fall through to the script bindings and then to [`GLOBALS`].

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::ast::{Ast, DirectiveKind, Element, ExprId, NodeId, NodeKind};
use crate::visitor::element_expressions;

lazy_static::lazy_static! {
    /// JavaScript intrinsics that are always in scope. Host capabilities such
    /// as `window`, `console` or `setTimeout` are deliberately absent: they
    /// are unresolved and become host-provided free variables.
    pub static ref GLOBALS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("undefined");
        s.insert("NaN");
        s.insert("Infinity");
        s.insert("globalThis");
        s.insert("Math");
        s.insert("JSON");
        s.insert("Date");
        s.insert("String");
        s.insert("Number");
        s.insert("Boolean");
        s.insert("Array");
        s.insert("Object");
        s.insert("Symbol");
        s.insert("BigInt");
        s.insert("Promise");
        s.insert("Map");
        s.insert("Set");
        s.insert("WeakMap");
        s.insert("WeakSet");
        s.insert("RegExp");
        s.insert("Error");
        s.insert("TypeError");
        s.insert("RangeError");
        s.insert("Intl");
        s.insert("Reflect");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("isNaN");
        s.insert("isFinite");
        s.insert("encodeURIComponent");
        s.insert("decodeURIComponent");
        s.insert("encodeURI");
        s.insert("decodeURI");
        s.insert("arguments");
        s
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The construct that introduced a template-local name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalOrigin {
    EachItem,
    EachIndex,
    AwaitValue,
    AwaitError,
    SlotProp,
    Event,
}

#[derive(Debug, Clone, Serialize)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// Node that introduced the frame (the template root for the outermost).
    pub owner: NodeId,
    pub names: Vec<(String, LocalOrigin)>,
}

#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    expr_scope: HashMap<ExprId, ScopeId>,
    /// Scope a node's children are evaluated in.
    node_scope: HashMap<NodeId, ScopeId>,
    /// `let:x={alias}` aliases are declarations, not references.
    declarations: HashSet<ExprId>,
}

impl ScopeTree {
    pub fn build(ast: &Ast) -> Self {
        let mut tree = ScopeTree {
            scopes: vec![Scope {
                parent: None,
                owner: ast.root,
                names: vec![],
            }],
            expr_scope: HashMap::new(),
            node_scope: HashMap::new(),
            declarations: HashSet::new(),
        };
        tree.node_scope.insert(ast.root, ScopeId::ROOT);
        for child in ast.template_children(ast.root) {
            tree.walk(ast, child, ScopeId::ROOT);
        }
        tree
    }

    fn push(&mut self, parent: ScopeId, owner: NodeId, names: Vec<(String, LocalOrigin)>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            owner,
            names,
        });
        id
    }

    fn assign(&mut self, expr: ExprId, scope: ScopeId) {
        self.expr_scope.insert(expr, scope);
    }

    fn walk_children(&mut self, ast: &Ast, id: NodeId, scope: ScopeId) {
        self.node_scope.insert(id, scope);
        for &child in ast.children(id) {
            self.walk(ast, child, scope);
        }
    }

    fn walk(&mut self, ast: &Ast, id: NodeId, scope: ScopeId) {
        match ast.kind(id) {
            NodeKind::Element(el) | NodeKind::Slot(el) => {
                // `let:` on a slotted element scopes the element itself.
                let inner = match Self::let_names(ast, el) {
                    names if names.is_empty() => scope,
                    names => self.push(scope, id, names),
                };
                self.walk_element(el, id, inner);
                self.walk_children(ast, id, inner);
            }
            NodeKind::Component(el) => {
                self.walk_element(el, id, scope);
                let inner = match Self::let_names(ast, el) {
                    names if names.is_empty() => scope,
                    names => self.push(scope, id, names),
                };
                self.walk_children(ast, id, inner);
            }
            NodeKind::MustacheTag(expr) | NodeKind::RawMustacheTag(expr) => self.assign(*expr, scope),
            NodeKind::DebugTag(tag) => {
                for expr in &tag.identifiers {
                    self.assign(*expr, scope);
                }
            }
            NodeKind::IfBlock(block) => {
                self.assign(block.test, scope);
                self.walk_children(ast, id, scope);
            }
            NodeKind::EachBlock(block) => {
                self.assign(block.expression, scope);
                let mut names: Vec<(String, LocalOrigin)> = block
                    .context
                    .names
                    .iter()
                    .map(|n| (n.clone(), LocalOrigin::EachItem))
                    .collect();
                if let Some(index) = &block.index {
                    names.push((index.clone(), LocalOrigin::EachIndex));
                }
                let inner = self.push(scope, id, names);
                if let Some(key) = block.key {
                    self.assign(key, inner);
                }
                self.node_scope.insert(id, inner);
                for &child in ast.children(id) {
                    // The `{:else}` fallback renders when there is no item.
                    let child_scope = if Some(child) == block.fallback { scope } else { inner };
                    self.walk(ast, child, child_scope);
                }
            }
            NodeKind::AwaitBlock(block) => {
                self.assign(block.expression, scope);
                self.walk_children(ast, id, scope);
            }
            NodeKind::ThenBlock | NodeKind::CatchBlock => {
                let (name, origin) = match ast.parent(id).map(|p| ast.kind(p)) {
                    Some(NodeKind::AwaitBlock(block)) if matches!(ast.kind(id), NodeKind::ThenBlock) => {
                        (block.value.clone(), LocalOrigin::AwaitValue)
                    }
                    Some(NodeKind::AwaitBlock(block)) => (block.error.clone(), LocalOrigin::AwaitError),
                    _ => (None, LocalOrigin::AwaitValue),
                };
                let inner = match name {
                    Some(name) => self.push(scope, id, vec![(name, origin)]),
                    None => scope,
                };
                self.walk_children(ast, id, inner);
            }
            NodeKind::Fragment | NodeKind::ElseBlock | NodeKind::PendingBlock => {
                self.walk_children(ast, id, scope)
            }
            NodeKind::Text(_) | NodeKind::Comment(_) | NodeKind::Script(_) | NodeKind::Style(_) => {}
        }
    }

    fn walk_element(&mut self, el: &Element, id: NodeId, scope: ScopeId) {
        let handlers: Vec<ExprId> = el
            .directives_of(DirectiveKind::On)
            .filter_map(|d| d.expression)
            .collect();
        let aliases: Vec<ExprId> = el
            .directives_of(DirectiveKind::Let)
            .filter_map(|d| d.expression)
            .collect();
        for expr in element_expressions(el) {
            if aliases.contains(&expr) {
                self.declarations.insert(expr);
            } else if handlers.contains(&expr) {
                let frame = self.push(scope, id, vec![("event".to_string(), LocalOrigin::Event)]);
                self.assign(expr, frame);
            } else {
                self.assign(expr, scope);
            }
        }
    }

    fn let_names(ast: &Ast, el: &Element) -> Vec<(String, LocalOrigin)> {
        el.directives_of(DirectiveKind::Let)
            .map(|d| {
                let local = match d.expression {
                    Some(alias) => ast.expr(alias).source.clone(),
                    None => d.name.clone(),
                };
                (local, LocalOrigin::SlotProp)
            })
            .collect()
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes.iter().enumerate().map(|(i, s)| (ScopeId(i as u32), s))
    }

    /// Scope an expression is evaluated in. Expressions the walk never reached
    /// (script-only constructs) evaluate at the root.
    pub fn expr_scope(&self, expr: ExprId) -> ScopeId {
        self.expr_scope.get(&expr).copied().unwrap_or(ScopeId::ROOT)
    }

    pub fn node_scope(&self, node: NodeId) -> ScopeId {
        self.node_scope.get(&node).copied().unwrap_or(ScopeId::ROOT)
    }

    pub fn is_declaration(&self, expr: ExprId) -> bool {
        self.declarations.contains(&expr)
    }

    /// Innermost frame declaring `name`, starting at `scope`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, LocalOrigin)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.scope(id);
            if let Some((_, origin)) = frame.names.iter().find(|(n, _)| n == name) {
                return Some((id, *origin));
            }
            current = frame.parent;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn expr_named<'a>(ast: &'a Ast, source: &str) -> ExprId {
        ast.expressions()
            .iter()
            .find(|e| e.source == source)
            .map(|e| e.id)
            .unwrap()
    }

    #[test]
    fn test_each_scope_and_key() {
        let ast = parse("{#each items as { id, label }, i (id)}<p>{label}{i}</p>{:else}{label}{/each}").unwrap();
        let tree = ScopeTree::build(&ast);

        let list = tree.expr_scope(expr_named(&ast, "items"));
        assert_eq!(list, ScopeId::ROOT);

        let key = tree.expr_scope(expr_named(&ast, "id"));
        assert_eq!(tree.lookup(key, "id").map(|(_, o)| o), Some(LocalOrigin::EachItem));
        assert_eq!(tree.lookup(key, "i").map(|(_, o)| o), Some(LocalOrigin::EachIndex));

        let fallback = ast.expressions().iter().filter(|e| e.source == "label").last().unwrap();
        assert!(tree.lookup(tree.expr_scope(fallback.id), "label").is_none());
    }

    #[test]
    fn test_await_branches() {
        let ast = parse("{#await load}<p>...</p>{:then data}{data}{:catch err}{err}{/await}").unwrap();
        let tree = ScopeTree::build(&ast);
        let data = tree.expr_scope(expr_named(&ast, "data"));
        let err = tree.expr_scope(expr_named(&ast, "err"));
        assert_eq!(tree.lookup(data, "data").map(|(_, o)| o), Some(LocalOrigin::AwaitValue));
        assert!(tree.lookup(data, "err").is_none());
        assert_eq!(tree.lookup(err, "err").map(|(_, o)| o), Some(LocalOrigin::AwaitError));
    }

    #[test]
    fn test_event_is_local_to_handlers() {
        let ast = parse("<button on:click={handle(event)} title={event}>x</button>").unwrap();
        let tree = ScopeTree::build(&ast);
        let handler = tree.expr_scope(expr_named(&ast, "handle(event)"));
        assert_eq!(tree.lookup(handler, "event").map(|(_, o)| o), Some(LocalOrigin::Event));
        let title = tree.expr_scope(expr_named(&ast, "event"));
        assert!(tree.lookup(title, "event").is_none());
    }

    #[test]
    fn test_let_directive_scopes_component_children() {
        let ast = parse("<List let:item>{item}</List>").unwrap();
        let tree = ScopeTree::build(&ast);
        let inner = tree.expr_scope(expr_named(&ast, "item"));
        assert_eq!(tree.lookup(inner, "item").map(|(_, o)| o), Some(LocalOrigin::SlotProp));
    }

    #[test]
    fn test_globals_exclude_host_capabilities() {
        assert!(GLOBALS.contains("Math"));
        assert!(!GLOBALS.contains("setTimeout"));
        assert!(!GLOBALS.contains("console"));
    }
}
