//! Block and wrapper tree builder.
//!
//! Every template node that produces output gets exactly one [`Wrapper`],
//! owned by the innermost enclosing [`Block`]. Control-flow nodes (if, each,
//! await, slot fallbacks and slotted component content) open child blocks.
//! Each block records the names it needs from its parent's context: the free
//! names referenced anywhere in its subtree minus the locals it declares
//! itself. Those names are threaded through as an explicit context object by
//! the emitter.

use std::collections::{BTreeSet, HashMap};

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{Ast, DirectiveKind, ExprId, NodeId, NodeKind};
use crate::binder::{Bindings, Resolution};
use crate::scope::{LocalOrigin, ScopeTree};
use crate::session::CompileSession;

lazy_static! {
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const ROOT: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperId(pub u32);

impl WrapperId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Fragment,
    IfBranch,
    EachItem,
    EachFallback,
    AwaitPending,
    AwaitThen,
    AwaitCatch,
    /// Content passed into a component slot.
    SlotContent,
    /// `<slot>` fallback content.
    SlotFallback,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// Name of the generated creator function.
    pub name: String,
    pub kind: BlockKind,
    pub parent: Option<BlockId>,
    /// Node the block was opened for.
    pub owner: NodeId,
    /// Top-level wrappers, in document order.
    pub roots: Vec<WrapperId>,
    /// Names the block declares for its own subtree.
    pub locals: Vec<String>,
    /// Names taken from the parent context.
    pub needs: BTreeSet<String>,
    pub has_intro: bool,
    pub has_outro: bool,
    /// Item block of a keyed each.
    pub keyed: bool,
}

#[derive(Debug, Clone)]
pub struct Branch {
    /// `None` for the final `{:else}`.
    pub test: Option<ExprId>,
    pub block: BlockId,
}

#[derive(Debug, Clone)]
pub struct SlotContent {
    pub name: String,
    pub block: BlockId,
    /// `let:` bindings as (slot prop, local name).
    pub lets: Vec<(String, String)>,
}

/// Closed set of wrapper kinds.
#[derive(Debug, Clone)]
pub enum WrapperKind {
    Element { svg: bool },
    Text { data: String },
    Mustache(ExprId),
    RawMustache(ExprId),
    Debug(Vec<ExprId>),
    Component { slots: Vec<SlotContent> },
    Slot { name: String, fallback: Option<BlockId> },
    If { branches: Vec<Branch> },
    Each { item: BlockId, fallback: Option<BlockId> },
    Await {
        pending: Option<BlockId>,
        then: Option<BlockId>,
        catch: Option<BlockId>,
    },
}

#[derive(Debug, Clone)]
pub struct Wrapper {
    pub id: WrapperId,
    pub node: NodeId,
    pub block: BlockId,
    pub kind: WrapperKind,
    /// Variable holding the wrapper's host node or helper state.
    pub var: String,
    pub children: Vec<WrapperId>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    blocks: Vec<Block>,
    wrappers: Vec<Wrapper>,
    node_wrapper: HashMap<NodeId, WrapperId>,
}

impl BlockTree {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn wrapper(&self, id: WrapperId) -> &Wrapper {
        &self.wrappers[id.index()]
    }

    pub fn wrappers(&self) -> &[Wrapper] {
        &self.wrappers
    }

    pub fn wrapper_of(&self, node: NodeId) -> Option<&Wrapper> {
        self.node_wrapper.get(&node).map(|w| self.wrapper(*w))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn build(ast: &Ast, bindings: &Bindings, scopes: &ScopeTree, session: &mut CompileSession) -> BlockTree {
    let mut builder = Builder {
        ast,
        bindings,
        scopes,
        session,
        tree: BlockTree::default(),
    };
    let root = builder.open(BlockKind::Fragment, None, ast.root, "create_fragment", vec![], false);
    let children: Vec<NodeId> = ast.template_children(ast.root).collect();
    let roots = builder.wrap_children(&children, root, false, false);
    builder.tree.blocks[root.index()].roots = roots;

    builder.propagate_transitions();
    builder.compute_needs();

    let tree = builder.tree;
    tracing::debug!(blocks = tree.len(), wrappers = tree.wrappers.len(), "built block tree");
    tree
}

struct Builder<'a> {
    ast: &'a Ast,
    bindings: &'a Bindings,
    scopes: &'a ScopeTree,
    session: &'a mut CompileSession,
    tree: BlockTree,
}

impl<'a> Builder<'a> {
    fn open(
        &mut self,
        kind: BlockKind,
        parent: Option<BlockId>,
        owner: NodeId,
        base: &str,
        locals: Vec<String>,
        keyed: bool,
    ) -> BlockId {
        let id = BlockId(self.tree.blocks.len() as u32);
        let name = self.session.unique(base);
        self.tree.blocks.push(Block {
            id,
            name,
            kind,
            parent,
            owner,
            roots: vec![],
            locals,
            needs: BTreeSet::new(),
            has_intro: false,
            has_outro: false,
            keyed,
        });
        id
    }

    fn push(&mut self, node: NodeId, block: BlockId, kind: WrapperKind, var_base: &str) -> WrapperId {
        let id = WrapperId(self.tree.wrappers.len() as u32);
        let var = self.session.unique(var_base);
        tracing::trace!(node = node.0, block = block.0, var = %var, "wrapper");
        self.tree.wrappers.push(Wrapper {
            id,
            node,
            block,
            kind,
            var,
            children: vec![],
        });
        self.tree.node_wrapper.insert(node, id);
        id
    }

    /// Open a child block over `nodes`.
    fn sub_block(
        &mut self,
        kind: BlockKind,
        parent: BlockId,
        owner: NodeId,
        base: &str,
        locals: Vec<String>,
        nodes: &[NodeId],
        keyed: bool,
    ) -> BlockId {
        let block = self.open(kind, Some(parent), owner, base, locals, keyed);
        let roots = self.wrap_children(nodes, block, false, false);
        self.tree.blocks[block.index()].roots = roots;
        block
    }

    fn is_blank(&self, node: NodeId) -> bool {
        match self.ast.kind(node) {
            NodeKind::Text(text) => text.data.trim().is_empty(),
            NodeKind::Comment(_) => true,
            _ => false,
        }
    }

    fn wrap_children(&mut self, nodes: &[NodeId], block: BlockId, pre: bool, svg: bool) -> Vec<WrapperId> {
        let visible: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|n| !matches!(self.ast.kind(*n), NodeKind::Comment(_) | NodeKind::Script(_) | NodeKind::Style(_)))
            .collect();
        let mut out = Vec::new();
        for (i, &node) in visible.iter().enumerate() {
            let edge = i == 0 || i + 1 == visible.len();
            if let Some(w) = self.wrap(node, block, pre, svg, edge) {
                out.push(w);
            }
        }
        out
    }

    fn wrap(&mut self, node: NodeId, block: BlockId, pre: bool, svg: bool, edge: bool) -> Option<WrapperId> {
        let ast = self.ast;
        match ast.kind(node) {
            NodeKind::Text(text) => {
                let data = if pre {
                    text.data.clone()
                } else if text.data.trim().is_empty() {
                    if edge {
                        return None;
                    }
                    " ".to_string()
                } else {
                    WHITESPACE_RE.replace_all(&text.data, " ").into_owned()
                };
                Some(self.push(node, block, WrapperKind::Text { data }, "t"))
            }
            NodeKind::MustacheTag(expr) => Some(self.push(node, block, WrapperKind::Mustache(*expr), "t")),
            NodeKind::RawMustacheTag(expr) => Some(self.push(node, block, WrapperKind::RawMustache(*expr), "raw")),
            NodeKind::DebugTag(tag) => {
                Some(self.push(node, block, WrapperKind::Debug(tag.identifiers.clone()), "debug"))
            }
            NodeKind::Element(el) => {
                let svg = svg || el.name == "svg";
                let base = el.name.to_ascii_lowercase().replace(['-', ':'], "_");
                let id = self.push(node, block, WrapperKind::Element { svg }, &base);
                let block_ref = &mut self.tree.blocks[block.index()];
                block_ref.has_intro |= el.directives.iter().any(|d| d.kind.is_intro());
                block_ref.has_outro |= el.directives.iter().any(|d| d.kind.is_outro());
                let pre = pre || el.name == "pre" || el.name == "textarea";
                let children = ast.children(node).to_vec();
                let wrapped = self.wrap_children(&children, block, pre, svg);
                self.tree.wrappers[id.index()].children = wrapped;
                Some(id)
            }
            NodeKind::Component(el) => {
                let base = el.name.to_ascii_lowercase().replace('.', "_");
                let id = self.push(node, block, WrapperKind::Component { slots: vec![] }, &base);
                let slots = self.component_slots(node, block);
                self.tree.wrappers[id.index()].kind = WrapperKind::Component { slots };
                let block_ref = &mut self.tree.blocks[block.index()];
                block_ref.has_intro = true;
                block_ref.has_outro = true;
                Some(id)
            }
            NodeKind::Slot(el) => {
                let name = el.static_attribute("name").unwrap_or("default").to_string();
                let id = self.push(node, block, WrapperKind::Slot { name: name.clone(), fallback: None }, &format!("{}_slot", name));
                let children = ast.children(node).to_vec();
                let fallback = if children.iter().all(|c| self.is_blank(*c)) {
                    None
                } else {
                    Some(self.sub_block(BlockKind::SlotFallback, block, node, "create_fallback_block", vec![], &children, false))
                };
                self.tree.wrappers[id.index()].kind = WrapperKind::Slot { name, fallback };
                Some(id)
            }
            NodeKind::IfBlock(_) => {
                let id = self.push(node, block, WrapperKind::If { branches: vec![] }, "if_block");
                let branches = self.if_branches(node, block);
                self.tree.wrappers[id.index()].kind = WrapperKind::If { branches };
                Some(id)
            }
            NodeKind::EachBlock(each) => {
                let id = self.push(node, block, WrapperKind::Each { item: block, fallback: None }, "each_blocks");
                let mut locals = each.context.names.clone();
                if let Some(index) = &each.index {
                    locals.push(index.clone());
                }
                let item = self.sub_block(
                    BlockKind::EachItem,
                    block,
                    node,
                    "create_each_block",
                    locals,
                    &each.body,
                    each.key.is_some(),
                );
                let fallback = each.fallback.map(|fallback| {
                    let children = ast.children(fallback).to_vec();
                    self.sub_block(BlockKind::EachFallback, block, fallback, "create_else_block", vec![], &children, false)
                });
                self.tree.wrappers[id.index()].kind = WrapperKind::Each { item, fallback };
                Some(id)
            }
            NodeKind::AwaitBlock(await_block) => {
                let id = self.push(
                    node,
                    block,
                    WrapperKind::Await {
                        pending: None,
                        then: None,
                        catch: None,
                    },
                    "await_block",
                );
                let open_phase = |builder: &mut Self, node: Option<NodeId>, kind: BlockKind, base: &str, local: &Option<String>| {
                    node.map(|node| {
                        let children = ast.children(node).to_vec();
                        builder.sub_block(kind, block, node, base, local.iter().cloned().collect(), &children, false)
                    })
                };
                let pending = open_phase(self, await_block.pending, BlockKind::AwaitPending, "create_pending_block", &None);
                let then = open_phase(self, await_block.then, BlockKind::AwaitThen, "create_then_block", &await_block.value);
                let catch = open_phase(self, await_block.catch, BlockKind::AwaitCatch, "create_catch_block", &await_block.error);
                self.tree.wrappers[id.index()].kind = WrapperKind::Await { pending, then, catch };
                Some(id)
            }
            NodeKind::Fragment
            | NodeKind::ElseBlock
            | NodeKind::PendingBlock
            | NodeKind::ThenBlock
            | NodeKind::CatchBlock
            | NodeKind::Comment(_)
            | NodeKind::Script(_)
            | NodeKind::Style(_) => None,
        }
    }

    /// Flatten an `{#if}` with its `{:else if}` chain into branches.
    fn if_branches(&mut self, node: NodeId, block: BlockId) -> Vec<Branch> {
        let ast = self.ast;
        let mut branches = Vec::new();
        let mut current = Some(node);
        while let Some(if_node) = current.take() {
            let NodeKind::IfBlock(if_block) = ast.kind(if_node) else {
                break;
            };
            let consequent = self.sub_block(BlockKind::IfBranch, block, if_node, "create_if_block", vec![], &if_block.consequent, false);
            branches.push(Branch {
                test: Some(if_block.test),
                block: consequent,
            });
            let Some(alternate) = if_block.alternate else {
                break;
            };
            let children: Vec<NodeId> = ast.children(alternate).to_vec();
            let meaningful: Vec<NodeId> = children.iter().copied().filter(|c| !self.is_blank(*c)).collect();
            match meaningful.as_slice() {
                [nested] if matches!(ast.kind(*nested), NodeKind::IfBlock(b) if b.else_if) => current = Some(*nested),
                _ => {
                    let alt = self.sub_block(BlockKind::IfBranch, block, alternate, "create_else_block", vec![], &children, false);
                    branches.push(Branch { test: None, block: alt });
                }
            }
        }
        branches
    }

    /// Default slot content plus one block per `slot="name"` child.
    fn component_slots(&mut self, node: NodeId, block: BlockId) -> Vec<SlotContent> {
        let ast = self.ast;
        let mut named = Vec::new();
        let mut default = Vec::new();
        for &child in ast.children(node) {
            let slot_name = ast
                .kind(child)
                .as_element()
                .and_then(|c| c.static_attribute("slot"))
                .map(str::to_string);
            match slot_name {
                Some(name) => named.push((name, child)),
                None => default.push(child),
            }
        }

        let mut slots = Vec::new();
        if !default.iter().all(|c| self.is_blank(*c)) {
            let lets = let_bindings(ast, node);
            let locals = lets.iter().map(|(_, local)| local.clone()).collect();
            let content = self.sub_block(BlockKind::SlotContent, block, node, "create_default_slot", locals, &default, false);
            slots.push(SlotContent {
                name: "default".to_string(),
                block: content,
                lets,
            });
        }
        for (name, child) in named {
            let lets = let_bindings(ast, child);
            let locals = lets.iter().map(|(_, local)| local.clone()).collect();
            let base = format!("create_{}_slot", name.replace('-', "_"));
            let content = self.sub_block(BlockKind::SlotContent, block, child, &base, locals, &[child], false);
            slots.push(SlotContent { name, block: content, lets });
        }
        slots
    }

    fn propagate_transitions(&mut self) {
        for i in (1..self.tree.blocks.len()).rev() {
            let (intro, outro) = (self.tree.blocks[i].has_intro, self.tree.blocks[i].has_outro);
            if let Some(parent) = self.tree.blocks[i].parent {
                let parent = &mut self.tree.blocks[parent.index()];
                parent.has_intro |= intro;
                parent.has_outro |= outro;
            }
        }
    }

    /// Block a wrapper-bearing node is evaluated in.
    fn block_of(&self, node: NodeId) -> BlockId {
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(w) = self.tree.node_wrapper.get(&id) {
                return self.tree.wrappers[w.index()].block;
            }
            current = self.ast.parent(id);
        }
        BlockId::ROOT
    }

    /// Block that declares locals for scopes owned by `node`.
    fn introducing_block(&self, owner: NodeId) -> Option<BlockId> {
        self.tree
            .blocks
            .iter()
            .find(|b| {
                b.owner == owner
                    && matches!(
                        b.kind,
                        BlockKind::EachItem | BlockKind::AwaitThen | BlockKind::AwaitCatch | BlockKind::SlotContent
                    )
            })
            .map(|b| b.id)
    }

    /// Add `name` to the needs of `from` and its ancestors, stopping at `until`.
    fn require(&mut self, from: BlockId, name: &str, until: Option<BlockId>) {
        let mut current = Some(from);
        while let Some(block) = current {
            if Some(block) == until {
                return;
            }
            let block = &mut self.tree.blocks[block.index()];
            block.needs.insert(name.to_string());
            current = block.parent;
        }
    }

    fn compute_needs(&mut self) {
        let ast = self.ast;
        for expr in ast.expressions() {
            if self.scopes.is_declaration(expr.id) {
                continue;
            }
            let mut from = self.block_of(expr.node);
            // Keys are computed from the item context.
            if let NodeKind::EachBlock(each) = ast.kind(expr.node) {
                if each.key == Some(expr.id) {
                    if let Some(WrapperKind::Each { item, .. }) = self.tree.wrapper_of(expr.node).map(|w| &w.kind) {
                        from = *item;
                    }
                }
            }
            let resolutions = self.bindings.resolutions(expr.id).to_vec();
            for (reference, resolution) in expr.info.references.iter().zip(resolutions) {
                match resolution {
                    Resolution::Binding(i) if self.bindings.list[i].kind.is_instance() => {
                        self.require(from, &reference.name, None);
                    }
                    Resolution::Local { scope, origin } if origin != LocalOrigin::Event => {
                        let until = self.introducing_block(self.scopes.scope(scope).owner);
                        self.require(from, &reference.name, until);
                    }
                    _ => {}
                }
            }
            if !expr.info.writes.is_empty() {
                self.require(from, "$$bind", None);
            }
        }

        for id in ast.node_ids() {
            let Some(el) = ast.kind(id).as_element() else {
                continue;
            };
            if !self.tree.node_wrapper.contains_key(&id) {
                continue;
            }
            let from = self.block_of(id);
            let scope = ast.parent(id).map_or(crate::scope::ScopeId::ROOT, |p| self.scopes.node_scope(p));
            let mut names: Vec<&str> = el
                .directives
                .iter()
                .filter(|d| {
                    matches!(
                        d.kind,
                        DirectiveKind::Use | DirectiveKind::Transition | DirectiveKind::In | DirectiveKind::Out
                    )
                })
                .map(|d| d.name.as_str())
                .collect();
            if let NodeKind::Component(_) = ast.kind(id) {
                names.push(el.name.split('.').next().unwrap_or_default());
            }
            for name in names {
                if let Resolution::Binding(i) = self.bindings.resolve(self.scopes, scope, name) {
                    if self.bindings.list[i].kind.is_instance() {
                        self.require(from, name, None);
                    }
                }
            }
            if el.directives.iter().any(|d| d.kind == DirectiveKind::Bind) {
                self.require(from, "$$bind", None);
            }
            if el.directives.iter().any(|d| d.kind == DirectiveKind::On && d.expression.is_none()) {
                self.require(from, "$$bubble", None);
            }
            if let NodeKind::Slot(_) = ast.kind(id) {
                self.require(from, "$$slots", None);
                self.require(from, "$$scope", None);
            }
        }
    }
}

/// `let:` directives of a component or slotted element as (prop, local).
pub fn let_bindings(ast: &Ast, node: NodeId) -> Vec<(String, String)> {
    let Some(el) = ast.kind(node).as_element() else {
        return vec![];
    };
    el.directives_of(DirectiveKind::Let)
        .map(|d| {
            let local = match d.expression {
                Some(alias) => ast.expr(alias).source.clone(),
                None => d.name.clone(),
            };
            (d.name.clone(), local)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompileOptions;
    use crate::parse::parse;
    use crate::script::analyze_script;

    fn tree(source: &str) -> (Ast, BlockTree) {
        let ast = parse(source).unwrap();
        let scopes = ScopeTree::build(&ast);
        let instance = ast.instance.map(|id| match ast.kind(id) {
            NodeKind::Script(script) => analyze_script(&ast.source, script.content, script.context).unwrap(),
            _ => unreachable!(),
        });
        let mut session = CompileSession::new(source, &CompileOptions::default());
        let bindings = crate::binder::bind(&ast, instance.as_ref(), None, &scopes, &mut session).unwrap();
        let tree = build(&ast, &bindings, &scopes, &mut session);
        (ast, tree)
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_blocks_per_control_flow() {
        let (_, tree) = tree(
            "<script>let items = []; let show = true; let p;</script>\
             {#if show}<p>a</p>{:else if items}<p>b</p>{:else}<p>c</p>{/if}\
             {#each items as item}{item}{:else}none{/each}\
             {#await p}…{:then v}{v}{/await}",
        );
        let kinds: Vec<BlockKind> = tree.blocks().iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Fragment,
                BlockKind::IfBranch,
                BlockKind::IfBranch,
                BlockKind::IfBranch,
                BlockKind::EachItem,
                BlockKind::EachFallback,
                BlockKind::AwaitPending,
                BlockKind::AwaitThen,
            ]
        );
        let names: Vec<&str> = tree.blocks().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names[..4], ["create_fragment", "create_if_block", "create_if_block_1", "create_else_block"]);
    }

    #[test]
    fn test_needs_exclude_block_locals() {
        let (_, tree) = tree(
            "<script>export let items = []; export let prefix = '#';</script>\
             {#each items as { id, label }, i (id)}<li>{prefix}{label}{i}</li>{/each}",
        );
        let item = tree.blocks().iter().find(|b| b.kind == BlockKind::EachItem).unwrap();
        assert_eq!(names(&item.needs), vec!["prefix"]);
        assert_eq!(item.locals, vec!["id", "label", "i"]);
        assert!(item.keyed);
    }

    #[test]
    fn test_nested_needs_thread_through_parents() {
        let (_, tree) = tree(
            "<script>export let rows = []; export let active;</script>\
             {#each rows as row}{#if row.open}{active}{row.name}{/if}{/each}",
        );
        let item = tree.blocks().iter().find(|b| b.kind == BlockKind::EachItem).unwrap();
        let branch = tree.blocks().iter().find(|b| b.kind == BlockKind::IfBranch).unwrap();
        assert_eq!(names(&item.needs), vec!["active"]);
        assert_eq!(names(&branch.needs), vec!["active", "row"]);
    }

    #[test]
    fn test_whitespace_and_transitions() {
        let (ast, tree) = tree(
            "<script>import { fade } from 'weave/transition'; let on = true;</script>\n\
             {#if on}\n  <p transition:fade>a  b</p>\n{/if}",
        );
        let branch = tree.blocks().iter().find(|b| b.kind == BlockKind::IfBranch).unwrap();
        assert!(branch.has_intro && branch.has_outro);
        assert!(tree.block(BlockId::ROOT).has_outro);
        assert_eq!(branch.roots.len(), 1);
        let p = tree.wrapper(branch.roots[0]);
        let text = tree.wrapper(p.children[0]);
        assert!(matches!(&text.kind, WrapperKind::Text { data } if data == "a b"));
        assert!(tree.wrapper_of(ast.root).is_none());
    }

    #[test]
    fn test_component_slots() {
        let (_, tree) = tree(
            "<script>import List from './List.weave'; export let title = '';</script>\
             <List let:item><h2 slot=\"header\">{title}</h2>{item.name}</List>",
        );
        let list = tree
            .wrappers()
            .iter()
            .find(|w| matches!(w.kind, WrapperKind::Component { .. }))
            .unwrap();
        let WrapperKind::Component { slots } = &list.kind else {
            unreachable!()
        };
        let slot_names: Vec<&str> = slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(slot_names, vec!["default", "header"]);
        assert_eq!(slots[0].lets, vec![("item".to_string(), "item".to_string())]);
        assert!(tree.block(slots[0].block).needs.is_empty());
        assert_eq!(names(&tree.block(slots[1].block).needs), vec!["title"]);
    }
}
