//! Wrapper emission.
//!
//! Each [`WrapperKind`] knows how to write its part of the block lifecycle:
//! construction, mount, patch, intro, outro and destroy. Fragments are plain
//! JavaScript statements collected per block and assembled into a creator
//! function by [`FragmentEmitter::emit_block`]. Every patch fragment is guarded
//! by the dependency set of the expressions it re-evaluates.

use std::collections::BTreeSet;

use crate::ast::{Ast, AttributeChunk, AttributeValue, Directive, DirectiveKind, Element, ExprId, NodeKind};
use crate::binder::{BindingKind, Bindings, Resolution};
use crate::block::{BlockId, BlockTree, Branch, SlotContent, Wrapper, WrapperId, WrapperKind};
use crate::deps::{DepSet, DependencyInfo};
use crate::expression::ExprShape;
use crate::scope::{LocalOrigin, ScopeId, ScopeTree};
use crate::script::Rewriter;
use crate::session::CompileSession;
use crate::style::ScopedStyle;
use crate::validate::bind_target;

/// Read-only analysis results the emitter works from.
#[derive(Clone, Copy)]
pub struct EmitContext<'a> {
    pub ast: &'a Ast,
    pub bindings: &'a Bindings,
    pub scopes: &'a ScopeTree,
    pub deps: &'a DependencyInfo,
    pub tree: &'a BlockTree,
    pub style: Option<&'a ScopedStyle>,
}

/// Statements for each lifecycle operation of one block.
#[derive(Debug, Default)]
pub struct Fragments {
    pub declarations: Vec<String>,
    /// Runs when the creator function is called.
    pub init: Vec<String>,
    pub create: Vec<String>,
    pub mount: Vec<String>,
    pub patch: Vec<String>,
    pub intro: Vec<String>,
    pub outro: Vec<String>,
    pub destroy: Vec<String>,
    /// Helpers referenced only from `intro`/`outro`.
    pub lifecycle_helpers: BTreeSet<&'static str>,
}

impl Fragments {
    /// Register a helper whose call lands in `intro` or `outro`. Those bodies
    /// are dropped for blocks without transitions, and so are these helpers.
    pub fn lifecycle_helper(&mut self, name: &'static str) -> &'static str {
        self.lifecycle_helpers.insert(name);
        name
    }
}

/// JavaScript string literal.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Indent every line of every statement by `depth` levels.
pub fn indent(lines: &[String], depth: usize) -> String {
    let pad = "  ".repeat(depth);
    let mut out = String::new();
    for statement in lines {
        for line in statement.lines() {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str(&pad);
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

pub struct FragmentEmitter<'a, 's> {
    cx: EmitContext<'a>,
    session: &'s mut CompileSession,
    helpers: BTreeSet<&'static str>,
    /// Module-level functions emitted alongside the blocks.
    pub module: Vec<String>,
    /// Roots assigned through `bind:` or template write sites.
    pub bound: BTreeSet<String>,
    pub bubbles: bool,
}

/// Where a wrapper's host node goes: the block target, or a parent element.
type Place<'p> = Option<&'p str>;

fn mount_args(place: Place) -> String {
    match place {
        Some(parent) => format!("{}, null", parent),
        None => "target, anchor".to_string(),
    }
}

fn detaching(place: Place) -> &'static str {
    if place.is_some() {
        "0"
    } else {
        "detaching"
    }
}

impl<'a, 's> FragmentEmitter<'a, 's> {
    pub fn new(cx: EmitContext<'a>, session: &'s mut CompileSession) -> Self {
        FragmentEmitter {
            cx,
            session,
            helpers: BTreeSet::new(),
            module: Vec::new(),
            bound: BTreeSet::new(),
            bubbles: false,
        }
    }

    /// Runtime helpers referenced so far.
    pub fn helpers(&self) -> &BTreeSet<&'static str> {
        &self.helpers
    }

    pub fn helper(&mut self, name: &'static str) -> &'static str {
        self.helpers.insert(name);
        name
    }

    pub fn dev(&self) -> bool {
        self.session.options.dev
    }

    fn unique(&mut self, base: &str) -> String {
        self.session.unique(base)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn instance_name(&self, resolution: Resolution) -> bool {
        match resolution {
            Resolution::Binding(i) => self.cx.bindings.list[i].kind.is_instance(),
            Resolution::Local { origin, .. } => origin != LocalOrigin::Event,
            Resolution::Global | Resolution::Unresolved => false,
        }
    }

    /// Expression text with every context name read through `ctx`.
    pub fn render_expr(&mut self, expr: ExprId, ctx: &str) -> String {
        let ast = self.cx.ast;
        let e = ast.expr(expr);
        let resolutions = self.cx.bindings.resolutions(expr);
        let mut rewriter = Rewriter::new();

        let scope = self.cx.scopes.expr_scope(expr);
        for site in &e.info.writes {
            let roots: Vec<&String> = site
                .names
                .iter()
                .filter(|n| self.is_writable_root(scope, n))
                .collect();
            if roots.is_empty() {
                continue;
            }
            let tail: Vec<String> = roots
                .iter()
                .map(|n| format!("{ctx}.$$bind({}, {ctx}.{n})", js_string(n)))
                .collect();
            rewriter.insert(site.span.start, "(");
            rewriter.insert(site.span.end, format!(", {})", tail.join(", ")));
            self.bound.extend(roots.into_iter().cloned());
        }

        for (reference, resolution) in e.info.references.iter().zip(resolutions) {
            if !self.instance_name(*resolution) {
                continue;
            }
            let text = if reference.shorthand {
                format!("{0}: {ctx}.{0}", reference.name)
            } else {
                format!("{ctx}.{}", reference.name)
            };
            rewriter.replace(reference.span, text);
        }
        rewriter.render(&ast.source, e.span)
    }

    fn is_writable_root(&self, scope: ScopeId, name: &str) -> bool {
        match self.cx.bindings.resolve(self.cx.scopes, scope, name) {
            Resolution::Binding(i) => {
                let binding = &self.cx.bindings.list[i];
                binding.kind.is_reactive() && binding.kind != BindingKind::Derived
            }
            _ => false,
        }
    }

    /// A bare name (action, transition, component) evaluated in `scope`.
    fn render_name(&self, scope: ScopeId, name: &str, ctx: &str) -> String {
        let mut parts = name.splitn(2, '.');
        let root = parts.next().unwrap_or_default();
        let rest = parts.next().map(|r| format!(".{}", r)).unwrap_or_default();
        if self.instance_name(self.cx.bindings.resolve(self.cx.scopes, scope, root)) {
            format!("{ctx}.{root}{rest}")
        } else {
            format!("{root}{rest}")
        }
    }

    pub fn guard(&self, deps: &DepSet) -> Option<String> {
        if deps.is_empty() {
            return None;
        }
        let checks: Vec<String> = deps.iter().map(|d| format!("changed.has({})", js_string(d))).collect();
        Some(checks.join(" || "))
    }

    fn guarded(&self, deps: &DepSet, statement: String) -> Option<String> {
        self.guard(deps).map(|g| format!("if ({}) {}", g, statement))
    }

    /// `{ a: ctx.a, b: ctx.b }` for the names a child block needs.
    pub fn context_literal(&self, needs: &BTreeSet<String>, ctx: &str) -> String {
        if needs.is_empty() {
            return "{}".to_string();
        }
        let fields: Vec<String> = needs.iter().map(|n| format!("{n}: {ctx}.{n}")).collect();
        format!("{{ {} }}", fields.join(", "))
    }

    fn union_needs<'b>(&self, blocks: impl IntoIterator<Item = &'b BlockId>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for block in blocks {
            out.extend(self.cx.tree.block(*block).needs.iter().cloned());
        }
        out
    }

    fn parent_scope(&self, w: &Wrapper) -> ScopeId {
        self.cx
            .ast
            .parent(w.node)
            .map_or(ScopeId::ROOT, |p| self.cx.scopes.node_scope(p))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Blocks
    // ───────────────────────────────────────────────────────────────────────────

    /// The creator function for `id`.
    pub fn emit_block(&mut self, id: BlockId) -> String {
        let tree = self.cx.tree;
        let block = tree.block(id);
        let mut f = Fragments::default();
        for root in &block.roots {
            self.emit_wrapper(*root, None, &mut f);
        }
        let transitions = block.has_intro || block.has_outro;
        if transitions {
            self.helpers.extend(f.lifecycle_helpers.iter().copied());
            f.declarations.push("current".to_string());
            f.mount.push("current = true;".to_string());
        }

        let params = if block.keyed { "key, ctx" } else { "ctx" };
        let mut out = format!("function {}({}) {{\n", block.name, params);
        for decl in &f.declarations {
            out.push_str(&format!("  let {};\n", decl));
        }
        out.push_str(&indent(&f.init, 1));
        out.push_str("  return {\n");
        if block.keyed {
            out.push_str("    key,\n");
        }
        out.push_str(&format!("    create() {{\n{}    }},\n", indent(&f.create, 3)));
        out.push_str(&format!("    mount(target, anchor) {{\n{}    }},\n", indent(&f.mount, 3)));
        out.push_str(&format!(
            "    patch(changed, new_ctx) {{\n      ctx = new_ctx;\n{}    }},\n",
            indent(&f.patch, 3)
        ));
        if transitions {
            out.push_str(&format!(
                "    intro(local) {{\n      if (current) return;\n{}      current = true;\n    }},\n",
                indent(&f.intro, 3)
            ));
            out.push_str(&format!(
                "    outro(local) {{\n{}      current = false;\n    }},\n",
                indent(&f.outro, 3)
            ));
        } else {
            let noop = self.helper("noop");
            out.push_str(&format!("    intro: {},\n    outro: {},\n", noop, noop));
        }
        out.push_str(&format!("    destroy(detaching) {{\n{}    }}\n", indent(&f.destroy, 3)));
        out.push_str("  };\n}\n");
        out
    }

    fn emit_wrapper(&mut self, id: WrapperId, place: Place, f: &mut Fragments) {
        let tree = self.cx.tree;
        let w = tree.wrapper(id);
        match &w.kind {
            WrapperKind::Text { data } => self.text(w, data, place, f),
            WrapperKind::Mustache(expr) => self.mustache(w, *expr, place, f),
            WrapperKind::RawMustache(expr) => self.raw_mustache(w, *expr, place, f),
            WrapperKind::Debug(identifiers) => self.debug_tag(identifiers, f),
            WrapperKind::Element { svg } => self.element(w, *svg, place, f),
            WrapperKind::Component { slots } => self.component(w, slots, place, f),
            WrapperKind::Slot { name, fallback } => self.slot(w, name, *fallback, place, f),
            WrapperKind::If { branches } => self.if_block(w, branches, place, f),
            WrapperKind::Each { item, fallback } => self.each_block(w, *item, *fallback, place, f),
            WrapperKind::Await { pending, then, catch } => self.await_block(w, [*pending, *then, *catch], place, f),
        }
    }

    fn insert_node(&mut self, var: &str, place: Place, f: &mut Fragments) {
        match place {
            Some(parent) => {
                let append = self.helper("append");
                f.mount.push(format!("{}({}, {});", append, parent, var));
            }
            None => {
                let insert = self.helper("insert");
                let detach = self.helper("detach");
                f.mount.push(format!("{}(target, {}, anchor);", insert, var));
                f.destroy.push(format!("if (detaching) {}({});", detach, var));
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Leaves
    // ───────────────────────────────────────────────────────────────────────────

    fn text(&mut self, w: &Wrapper, data: &str, place: Place, f: &mut Fragments) {
        f.declarations.push(w.var.clone());
        let create = if data == " " {
            format!("{} = {}();", w.var, self.helper("space"))
        } else {
            format!("{} = {}({});", w.var, self.helper("text"), js_string(data))
        };
        f.create.push(create);
        self.insert_node(&w.var, place, f);
    }

    fn mustache(&mut self, w: &Wrapper, expr: ExprId, place: Place, f: &mut Fragments) {
        let value = self.render_expr(expr, "ctx");
        f.declarations.push(w.var.clone());
        let text = self.helper("text");
        f.create.push(format!("{} = {}({});", w.var, text, value));
        self.insert_node(&w.var, place, f);
        if let Some(guard) = self.guard(self.cx.deps.expr_deps(expr)) {
            let set_data = self.helper("set_data");
            f.patch.push(format!("if ({}) {}({}, {});", guard, set_data, w.var, value));
        }
    }

    fn raw_mustache(&mut self, w: &Wrapper, expr: ExprId, place: Place, f: &mut Fragments) {
        let value = self.render_expr(expr, "ctx");
        let anchor = self.unique(&format!("{}_anchor", w.var));
        f.declarations.push(w.var.clone());
        f.declarations.push(anchor.clone());
        let html_tag = self.helper("HtmlTag");
        let empty = self.helper("empty");
        f.create.push(format!("{} = new {}();\n{} = {}();", w.var, html_tag, anchor, empty));
        self.insert_node(&anchor, place, f);
        let parent = place.map_or_else(|| "target".to_string(), str::to_string);
        f.mount.push(format!("{}.m({}, {}, {});", w.var, value, parent, anchor));
        if let Some(patch) = self.guarded(self.cx.deps.expr_deps(expr), format!("{}.p({});", w.var, value)) {
            f.patch.push(patch);
        }
        f.destroy.push(format!("{}.d({});", w.var, detaching(place)));
    }

    fn debug_tag(&mut self, identifiers: &[ExprId], f: &mut Fragments) {
        if !self.dev() {
            return;
        }
        let fields: Vec<String> = identifiers
            .iter()
            .map(|id| format!("{}: {}", self.cx.ast.expr(*id).source, self.render_expr(*id, "ctx")))
            .collect();
        let body = if fields.is_empty() {
            "debugger;".to_string()
        } else {
            format!("console.log({{ {} }});\ndebugger;", fields.join(", "))
        };
        f.create.push(format!("{{\n{}}}", indent(&[body.clone()], 1)));
        let deps = self.cx.deps.union(identifiers);
        if let Some(guard) = self.guard(&deps) {
            f.patch.push(format!("if ({}) {{\n{}}}", guard, indent(&[body], 1)));
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Elements
    // ───────────────────────────────────────────────────────────────────────────

    fn element(&mut self, w: &Wrapper, svg: bool, place: Place, f: &mut Fragments) {
        let ast = self.cx.ast;
        let Some(el) = ast.kind(w.node).as_element() else {
            return;
        };
        let var = w.var.clone();
        f.declarations.push(var.clone());
        let create = if svg { self.helper("svg_element") } else { self.helper("element") };
        f.create.push(format!("{} = {}({});", var, create, js_string(&el.name)));

        if self.dev() {
            let offset = ast.node(w.node).span.start;
            let (line, column) = self.session.line_index().line_column(offset);
            let add_location = self.helper("add_location");
            f.create.push(format!("{}({}, file, {}, {}, {});", add_location, var, line, column, offset));
        }

        for child in &w.children {
            self.emit_wrapper(*child, Some(&var), f);
        }

        self.attributes(w, el, &var, f);
        self.insert_node(&var, place, f);

        let scope = self.parent_scope(w);
        for directive in &el.directives {
            match directive.kind {
                DirectiveKind::On => self.event_listener(directive, &var, f),
                DirectiveKind::Bind => self.element_binding(el, directive, &var, f),
                DirectiveKind::Class => self.class_toggle(directive, &var, f),
                DirectiveKind::Use => self.action(directive, scope, &var, f),
                DirectiveKind::Transition | DirectiveKind::In | DirectiveKind::Out => {
                    self.transition(directive, scope, &var, f)
                }
                DirectiveKind::Let => {}
            }
        }
    }

    fn attribute_value(&mut self, chunks: &[AttributeChunk]) -> String {
        if let [AttributeChunk::Expression(expr)] = chunks {
            return self.render_expr(*expr, "ctx");
        }
        let mut parts = Vec::new();
        for chunk in chunks {
            match chunk {
                AttributeChunk::Text(text) => parts.push(js_string(text)),
                AttributeChunk::Expression(expr) => parts.push(format!("({})", self.render_expr(*expr, "ctx"))),
            }
        }
        if !matches!(chunks.first(), Some(AttributeChunk::Text(_))) {
            parts.insert(0, "\"\"".to_string());
        }
        parts.join(" + ")
    }

    fn attributes(&mut self, w: &Wrapper, el: &Element, var: &str, f: &mut Fragments) {
        let token = self
            .cx
            .style
            .filter(|s| s.scoped_elements.contains(&w.node))
            .map(|s| s.token.clone());
        let mut class_seen = false;

        for attribute in &el.attributes {
            if attribute.name == "slot" {
                continue;
            }
            let is_class = attribute.name == "class";
            class_seen |= is_class;
            let token_suffix = token.as_ref().filter(|_| is_class);
            let property = matches!(attribute.name.as_str(), "value" | "checked")
                && matches!(el.name.as_str(), "input" | "textarea" | "select" | "option");

            let (value, deps) = match &attribute.value {
                AttributeValue::True => ("\"\"".to_string(), DepSet::new()),
                AttributeValue::Static(text) => {
                    let text = match token_suffix {
                        Some(token) => format!("{} {}", text, token),
                        None => text.clone(),
                    };
                    (js_string(&text), DepSet::new())
                }
                AttributeValue::Dynamic(chunks) => {
                    let mut value = self.attribute_value(chunks);
                    if let Some(token) = token_suffix {
                        value = format!("({}) + {}", value, js_string(&format!(" {}", token)));
                    }
                    let exprs: Vec<ExprId> = chunks
                        .iter()
                        .filter_map(|c| match c {
                            AttributeChunk::Expression(e) => Some(*e),
                            AttributeChunk::Text(_) => None,
                        })
                        .collect();
                    (value, self.cx.deps.union(&exprs))
                }
            };
            let statement = if property {
                format!("{}.{} = {};", var, attribute.name, value)
            } else {
                format!("{}({}, {}, {});", self.helper("attr"), var, js_string(&attribute.name), value)
            };
            f.create.push(statement.clone());
            if let Some(patch) = self.guarded(&deps, statement) {
                f.patch.push(patch);
            }
        }

        if let (Some(token), false) = (token, class_seen) {
            f.create.push(format!("{}({}, \"class\", {});", self.helper("attr"), var, js_string(&token)));
        }
    }

    fn handler(&mut self, directive: &Directive) -> String {
        let mut handler = match directive.expression {
            Some(expr) => {
                let call = self.render_expr(expr, "ctx");
                format!("function (event) {{\n  {};\n}}", call)
            }
            None => {
                self.bubbles = true;
                "ctx.$$bubble".to_string()
            }
        };
        for (modifier, helper) in [
            ("self", "self"),
            ("stopPropagation", "stop_propagation"),
            ("preventDefault", "prevent_default"),
            ("once", "once"),
        ] {
            if directive.modifiers.iter().any(|m| m == modifier) {
                let helper = self.helper(helper);
                handler = format!("{}({})", helper, handler);
            }
        }
        handler
    }

    fn event_listener(&mut self, directive: &Directive, var: &str, f: &mut Fragments) {
        let handler = self.handler(directive);
        let options: Vec<String> = ["capture", "passive"]
            .iter()
            .filter(|o| directive.modifiers.iter().any(|m| m == *o))
            .map(|o| format!("{}: true", o))
            .collect();
        let options = if options.is_empty() {
            String::new()
        } else {
            format!(", {{ {} }}", options.join(", "))
        };
        let dispose = self.unique(&format!("{}_{}_listener", var, directive.name));
        f.declarations.push(dispose.clone());
        let listen = self.helper("listen");
        f.create.push(format!(
            "{} = {}({}, {}, {}{});",
            dispose,
            listen,
            var,
            js_string(&directive.name),
            handler,
            options
        ));
        f.destroy.push(format!("{}();", dispose));
    }

    /// Statement writing `value` into a `bind:` target and invalidating its root.
    fn bind_assignment(&mut self, expr: ExprId, value: &str) -> Option<String> {
        let root = bind_target(self.cx.ast, self.cx.bindings, self.cx.scopes, expr).ok()?;
        self.bound.insert(root.clone());
        let shape = self.cx.ast.expr(expr).info.shape;
        Some(if shape == ExprShape::Identifier {
            format!("ctx.$$bind({}, {});", js_string(&root), value)
        } else {
            let target = self.render_expr(expr, "ctx");
            format!("{} = {};\nctx.$$bind({}, ctx.{});", target, value, js_string(&root), root)
        })
    }

    fn element_binding(&mut self, el: &Element, directive: &Directive, var: &str, f: &mut Fragments) {
        let Some(expr) = directive.expression else {
            return;
        };
        let target = self.render_expr(expr, "ctx");
        let deps = self.cx.deps.expr_deps(expr).clone();

        if directive.name == "this" {
            let Some(assign) = self.bind_assignment(expr, var) else {
                return;
            };
            let callbacks = self.helper("binding_callbacks");
            f.mount.push(format!("{}.push(() => {{\n{}}});", callbacks, indent(&[assign], 1)));
            if let Some(clear) = self.bind_assignment(expr, "null") {
                f.destroy.push(clear);
            }
            return;
        }

        let input_type = el.static_attribute("type").unwrap_or("");
        let (event, read) = match directive.name.as_str() {
            "checked" => ("change", format!("{}.checked", var)),
            "value" if el.name == "select" => ("change", format!("{}.value", var)),
            "value" if matches!(input_type, "number" | "range") => {
                let to_number = self.helper("to_number");
                ("input", format!("{}({}.value)", to_number, var))
            }
            name => ("input", format!("{}.{}", var, name)),
        };
        let Some(assign) = self.bind_assignment(expr, &read) else {
            return;
        };
        let listen = self.helper("listen");
        let dispose = self.unique(&format!("{}_{}_binding", var, directive.name));
        f.declarations.push(dispose.clone());
        f.create.push(format!(
            "{} = {}({}, {}, () => {{\n{}}});",
            dispose,
            listen,
            var,
            js_string(event),
            indent(&[assign], 1)
        ));
        f.destroy.push(format!("{}();", dispose));

        let write = match directive.name.as_str() {
            "value" => {
                let set_input_value = self.helper("set_input_value");
                format!("{}({}, {});", set_input_value, var, target)
            }
            name => format!("{}.{} = {};", var, name, target),
        };
        f.mount.push(write.clone());
        if let Some(guard) = self.guard(&deps) {
            f.patch.push(format!(
                "if (({}) && {}.{} !== {}) {}",
                guard, var, directive.name, target, write
            ));
        }
    }

    fn class_toggle(&mut self, directive: &Directive, var: &str, f: &mut Fragments) {
        let Some(expr) = directive.expression else {
            return;
        };
        let value = self.render_expr(expr, "ctx");
        let toggle = self.helper("toggle_class");
        let statement = format!("{}({}, {}, {});", toggle, var, js_string(&directive.name), value);
        f.create.push(statement.clone());
        if let Some(patch) = self.guarded(self.cx.deps.expr_deps(expr), statement) {
            f.patch.push(patch);
        }
    }

    fn action(&mut self, directive: &Directive, scope: ScopeId, var: &str, f: &mut Fragments) {
        let action = self.unique(&format!("{}_{}_action", var, directive.name));
        let function = self.render_name(scope, &directive.name, "ctx");
        let params = directive.expression.map(|e| self.render_expr(e, "ctx"));
        f.declarations.push(action.clone());
        let args = match &params {
            Some(p) => format!("{}, {}", var, p),
            None => var.to_string(),
        };
        f.mount.push(format!("{} = {}.call(null, {}) || {{}};", action, function, args));
        if let (Some(params), Some(expr)) = (params, directive.expression) {
            if let Some(guard) = self.guard(self.cx.deps.expr_deps(expr)) {
                f.patch.push(format!(
                    "if ({a} && typeof {a}.update === \"function\" && ({g})) {a}.update.call(null, {p});",
                    a = action,
                    g = guard,
                    p = params
                ));
            }
        }
        f.destroy.push(format!(
            "if ({a} && typeof {a}.destroy === \"function\") {a}.destroy();",
            a = action
        ));
    }

    fn transition(&mut self, directive: &Directive, scope: ScopeId, var: &str, f: &mut Fragments) {
        let function = self.render_name(scope, &directive.name, "ctx");
        let params = directive
            .expression
            .map(|e| self.render_expr(e, "ctx"))
            .unwrap_or_else(|| "{}".to_string());
        // `|local` transitions only run when their own block is added or removed.
        let local_only = directive.modifiers.iter().any(|m| m == "local");
        let when_local = |body: String| -> String {
            if local_only {
                format!("if (local) {{\n{}}}", indent(&[body], 1))
            } else {
                body
            }
        };
        match directive.kind {
            DirectiveKind::Transition => {
                let render_callback = self.helper("add_render_callback");
                let t = self.unique(&format!("{}_transition", var));
                let create = self.helper("create_bidirectional_transition");
                f.declarations.push(t.clone());
                f.intro.push(when_local(format!(
                    "{rc}(() => {{\n  if (!{t}) {t} = {c}({v}, {fun}, {p}, true);\n  {t}.run(1);\n}});",
                    rc = render_callback,
                    t = t,
                    c = create,
                    v = var,
                    fun = function,
                    p = params
                )));
                f.outro.push(when_local(format!(
                    "if (!{t}) {t} = {c}({v}, {fun}, {p}, false);\n{t}.run(0);",
                    t = t,
                    c = create,
                    v = var,
                    fun = function,
                    p = params
                )));
                f.destroy.push(format!("if (detaching && {t}) {t}.end();", t = t));
            }
            DirectiveKind::In => {
                let render_callback = self.helper("add_render_callback");
                let t = self.unique(&format!("{}_intro", var));
                let create = self.helper("create_in_transition");
                f.declarations.push(t.clone());
                f.intro.push(when_local(format!(
                    "if (!{t}) {{\n  {rc}(() => {{\n    {t} = {c}({v}, {fun}, {p});\n    {t}.start();\n  }});\n}}",
                    rc = render_callback,
                    t = t,
                    c = create,
                    v = var,
                    fun = function,
                    p = params
                )));
                f.outro.push(format!("if ({t}) {t}.invalidate();", t = t));
            }
            DirectiveKind::Out => {
                let t = self.unique(&format!("{}_outro", var));
                let create = self.helper("create_out_transition");
                f.declarations.push(t.clone());
                f.intro.push(format!("if ({t}) {t}.end(1);", t = t));
                f.outro.push(when_local(format!(
                    "{t} = {c}({v}, {fun}, {p});",
                    t = t,
                    c = create,
                    v = var,
                    fun = function,
                    p = params
                )));
                f.destroy.push(format!("if (detaching && {t}) {t}.end();", t = t));
            }
            _ => {}
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Components and slots
    // ───────────────────────────────────────────────────────────────────────────

    fn component(&mut self, w: &Wrapper, slots: &[SlotContent], place: Place, f: &mut Fragments) {
        let ast = self.cx.ast;
        let Some(el) = ast.kind(w.node).as_element() else {
            return;
        };
        let var = w.var.clone();
        let scope = self.parent_scope(w);
        let constructor = self.render_name(scope, &el.name, "ctx");
        let props = self.unique(&format!("{}_props", var));
        let changes = self.unique(&format!("{}_changes", var));
        f.declarations.push(var.clone());

        let mut fields = Vec::new();
        let mut patches = Vec::new();
        for attribute in &el.attributes {
            let (value, deps) = match &attribute.value {
                AttributeValue::True => ("true".to_string(), DepSet::new()),
                AttributeValue::Static(text) => (js_string(text), DepSet::new()),
                AttributeValue::Dynamic(chunks) => {
                    let value = self.attribute_value(chunks);
                    let exprs: Vec<ExprId> = chunks
                        .iter()
                        .filter_map(|c| match c {
                            AttributeChunk::Expression(e) => Some(*e),
                            AttributeChunk::Text(_) => None,
                        })
                        .collect();
                    (value, self.cx.deps.union(&exprs))
                }
            };
            let key = js_string(&attribute.name);
            fields.push(format!("{}: {}", key, value));
            if let Some(patch) = self.guarded(&deps, format!("{}[{}] = {};", changes, key, value)) {
                patches.push(patch);
            }
        }

        if !slots.is_empty() {
            let mut entries = Vec::new();
            for slot in slots {
                let block_name = &self.cx.tree.block(slot.block).name;
                let entry = if slot.lets.is_empty() {
                    format!("{}: [{}]", js_string(&slot.name), block_name)
                } else {
                    let mapped: Vec<String> = slot
                        .lets
                        .iter()
                        .map(|(prop, local)| format!("{}: props[{}]", local, js_string(prop)))
                        .collect();
                    format!(
                        "{}: [{}, (props) => ({{ {} }})]",
                        js_string(&slot.name),
                        block_name,
                        mapped.join(", ")
                    )
                };
                entries.push(entry);
            }
            let needs = self.union_needs(slots.iter().map(|s| &s.block));
            let scope_ctx = self.context_literal(&needs, "ctx");
            fields.push(format!("$$slots: {{ {} }}", entries.join(", ")));
            fields.push(format!("$$scope: {{ ctx: {} }}", scope_ctx));
            if let Some(guard) = self.guard(&needs) {
                patches.push(format!(
                    "if ({}) {}.$$scope = {{ changed, ctx: {} }};",
                    guard, changes, scope_ctx
                ));
            }
        }

        f.init.push(format!("const {} = {{ {} }};", props, fields.join(", ")));

        let mut bindings = Vec::new();
        for directive in el.directives_of(DirectiveKind::Bind) {
            let Some(expr) = directive.expression else {
                continue;
            };
            let target = self.render_expr(expr, "ctx");
            let key = js_string(&directive.name);
            f.init.push(format!("if ({} !== void 0) {}[{}] = {};", target, props, key, target));
            if let Some(assign) = self.bind_assignment(expr, "value") {
                let callbacks = self.helper("binding_callbacks");
                let bind = self.helper("bind");
                bindings.push(format!(
                    "{}.push(() => {}({}, {}, (value) => {{\n{}}}));",
                    callbacks,
                    bind,
                    var,
                    key,
                    indent(&[assign], 1)
                ));
            }
            let updating = self.unique(&format!("updating_{}", directive.name));
            f.declarations.push(updating.clone());
            if let Some(guard) = self.guard(self.cx.deps.expr_deps(expr)) {
                let flush = self.helper("add_flush_callback");
                patches.push(format!(
                    "if (!{u} && ({g})) {{\n  {u} = true;\n  {c}[{k}] = {t};\n  {fl}(() => {u} = false);\n}}",
                    u = updating,
                    g = guard,
                    c = changes,
                    k = key,
                    t = target,
                    fl = flush
                ));
            }
        }

        f.init.push(format!("{} = new {}({{ props: {} }});", var, constructor, props));
        f.init.extend(bindings);
        for directive in el.directives_of(DirectiveKind::On) {
            let handler = self.handler(directive);
            f.init.push(format!("{}.$on({}, {});", var, js_string(&directive.name), handler));
        }

        f.create.push(format!("{}({}.$$.fragment);", self.helper("create_component"), var));
        f.mount.push(format!("{}({}, {});", self.helper("mount_component"), var, mount_args(place)));
        if !patches.is_empty() {
            let mut patch = vec![format!("const {} = {{}};", changes)];
            patch.extend(patches);
            patch.push(format!("{}.$set({});", var, changes));
            f.patch.push(patch.join("\n"));
        }
        let transition_in = f.lifecycle_helper("transition_in");
        let transition_out = f.lifecycle_helper("transition_out");
        f.intro.push(format!("{}({}.$$.fragment, local);", transition_in, var));
        f.outro.push(format!("{}({}.$$.fragment, local);", transition_out, var));
        f.destroy.push(format!("{}({}, {});", self.helper("destroy_component"), var, detaching(place)));
    }

    fn slot(&mut self, w: &Wrapper, name: &str, fallback: Option<BlockId>, place: Place, f: &mut Fragments) {
        let ast = self.cx.ast;
        let Some(el) = ast.kind(w.node).as_element() else {
            return;
        };
        let var = w.var.clone();
        let template = self.unique(&format!("{}_template", var));

        let mut fields = Vec::new();
        let mut deps = DepSet::new();
        for attribute in el.attributes.iter().filter(|a| a.name != "name") {
            let value = match &attribute.value {
                AttributeValue::True => "true".to_string(),
                AttributeValue::Static(text) => js_string(text),
                AttributeValue::Dynamic(chunks) => {
                    for chunk in chunks {
                        if let AttributeChunk::Expression(e) = chunk {
                            deps.extend(self.cx.deps.expr_deps(*e).iter().cloned());
                        }
                    }
                    self.attribute_value(chunks)
                }
            };
            fields.push(format!("{}: {}", js_string(&attribute.name), value));
        }
        let slot_props = format!("{{ {} }}", fields.join(", "));
        let create_slot = self.helper("create_slot");
        f.init.push(format!("const {} = ctx.$$slots[{}];", template, js_string(name)));
        f.init.push(format!(
            "const {} = {}({}, ctx.$$scope, {});",
            var, create_slot, template, slot_props
        ));

        deps.insert("$$scope".to_string());
        let guard = self.guard(&deps).unwrap_or_else(|| "true".to_string());
        let args = mount_args(place);
        let det = detaching(place);

        match fallback {
            Some(block) => {
                let fb = self.unique(&format!("{}_fallback", var));
                let fb_name = self.cx.tree.block(block).name.clone();
                let fb_needs = self.cx.tree.block(block).needs.clone();
                let fb_ctx = self.context_literal(&fb_needs, "ctx");
                f.init.push(format!("const {} = {} ? null : {}({});", fb, var, fb_name, fb_ctx));
                f.create.push(format!("if ({v}) {v}.create();\nelse if ({fb}) {fb}.create();", v = var, fb = fb));
                f.mount.push(format!(
                    "if ({v}) {v}.mount({a});\nelse if ({fb}) {fb}.mount({a});",
                    v = var,
                    fb = fb,
                    a = args
                ));
                let mut patch = format!(
                    "if ({v} && ({g})) {v}.patch(changed, {p});",
                    v = var,
                    g = guard,
                    p = slot_props
                );
                if let Some(fb_guard) = self.guard(&fb_needs) {
                    patch.push_str(&format!(
                        "\nelse if ({fb} && ({g})) {fb}.patch(changed, {c});",
                        fb = fb,
                        g = fb_guard,
                        c = fb_ctx
                    ));
                }
                f.patch.push(patch);
                let transition_in = f.lifecycle_helper("transition_in");
                let transition_out = f.lifecycle_helper("transition_out");
                f.intro.push(format!("{}({} || {}, local);", transition_in, var, fb));
                f.outro.push(format!("{}({} || {}, local);", transition_out, var, fb));
                f.destroy.push(format!(
                    "if ({v}) {v}.destroy({d});\nelse if ({fb}) {fb}.destroy({d});",
                    v = var,
                    fb = fb,
                    d = det
                ));
            }
            None => {
                f.create.push(format!("if ({v}) {v}.create();", v = var));
                f.mount.push(format!("if ({v}) {v}.mount({a});", v = var, a = args));
                f.patch.push(format!(
                    "if ({v} && ({g})) {v}.patch(changed, {p});",
                    v = var,
                    g = guard,
                    p = slot_props
                ));
                let transition_in = f.lifecycle_helper("transition_in");
                let transition_out = f.lifecycle_helper("transition_out");
                f.intro.push(format!("{}({}, local);", transition_in, var));
                f.outro.push(format!("{}({}, local);", transition_out, var));
                f.destroy.push(format!("if ({v}) {v}.destroy({d});", v = var, d = det));
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Control flow
    // ───────────────────────────────────────────────────────────────────────────

    fn if_block(&mut self, w: &Wrapper, branches: &[Branch], place: Place, f: &mut Fragments) {
        let tree = self.cx.tree;
        let var = w.var.clone();
        let anchor = self.unique(&format!("{}_anchor", var));
        let creators = self.unique(&format!("{}_creators", var));
        let blocks = self.unique(&format!("{}_cache", var));
        let index = self.unique(&format!("{}_index", var));
        let previous = self.unique(&format!("previous_{}_index", var));
        let select = self.unique(&format!("select_{}_type", var));
        let get_ctx = self.unique(&format!("get_{}_context", var));

        let needs = self.union_needs(branches.iter().map(|b| &b.block));
        let has_outro = branches.iter().any(|b| tree.block(b.block).has_outro);
        let has_intro = branches.iter().any(|b| tree.block(b.block).has_intro);

        let mut tests = Vec::new();
        for (i, branch) in branches.iter().enumerate() {
            match branch.test {
                Some(test) => {
                    let test = self.render_expr(test, "ctx");
                    tests.push(format!("if ({}) return {};", test, i));
                }
                None => tests.push(format!("return {};", i)),
            }
        }
        if branches.last().map_or(true, |b| b.test.is_some()) {
            tests.push("return -1;".to_string());
        }
        let names: Vec<&str> = branches.iter().map(|b| tree.block(b.block).name.as_str()).collect();

        f.declarations.push(var.clone());
        f.declarations.push(anchor.clone());
        f.init.push(format!("const {} = [{}];", creators, names.join(", ")));
        f.init.push(format!("const {} = [];", blocks));
        f.init.push(format!("function {}(ctx) {{\n{}}}", select, indent(&tests, 1)));
        f.init.push(format!(
            "function {}(ctx) {{\n  return {};\n}}",
            get_ctx,
            self.context_literal(&needs, "ctx")
        ));
        f.init.push(format!("let {} = {}(ctx);", index, select));
        f.init.push(format!(
            "{v} = {i} >= 0 ? ({b}[{i}] = {c}[{i}]({g}(ctx))) : null;",
            v = var,
            i = index,
            b = blocks,
            c = creators,
            g = get_ctx
        ));

        let empty = self.helper("empty");
        f.create.push(format!("if ({v}) {v}.create();\n{a} = {e}();", v = var, a = anchor, e = empty));
        f.mount.push(format!("if ({v}) {v}.mount({args});", v = var, args = mount_args(place)));
        self.insert_node(&anchor, place, f);

        let leave = if has_outro {
            let group = self.helper("group_outros");
            let check = self.helper("check_outros");
            let out = self.helper("transition_out");
            format!(
                "if ({v}) {{\n  {group}();\n  {out}({b}[{p}], 1, 1, () => {{\n    {b}[{p}] = null;\n  }});\n  {check}();\n}}",
                v = var,
                b = blocks,
                p = previous,
                group = group,
                out = out,
                check = check
            )
        } else {
            format!("if ({v}) {{\n  {v}.destroy(1);\n  {b}[{p}] = null;\n}}", v = var, b = blocks, p = previous)
        };
        let reuse = if has_outro {
            format!(
                "{v} = {b}[{i}];\nif (!{v}) {{\n  {v} = {b}[{i}] = {c}[{i}]({g}(ctx));\n  {v}.create();\n}} else {{\n  {v}.patch(changed, {g}(ctx));\n}}",
                v = var,
                b = blocks,
                i = index,
                c = creators,
                g = get_ctx
            )
        } else {
            format!(
                "{v} = {b}[{i}] = {c}[{i}]({g}(ctx));\n{v}.create();",
                v = var,
                b = blocks,
                i = index,
                c = creators,
                g = get_ctx
            )
        };
        let enter = if has_intro || has_outro {
            format!("{}({}, 1);\n", self.helper("transition_in"), var)
        } else {
            String::new()
        };
        let enter_block = format!(
            "if ({i} >= 0) {{\n{reuse}{enter}  {v}.mount({a}.parentNode, {a});\n}} else {{\n  {v} = null;\n}}",
            i = index,
            reuse = indent(&[reuse], 1),
            enter = indent(&[enter], 1),
            v = var,
            a = anchor
        );
        let switch = format!(
            "const {p} = {i};\n{i} = {s}(ctx);\nif ({i} === {p}) {{\n  if ({v}) {v}.patch(changed, {g}(ctx));\n}} else {{\n{leave}{enter}}}",
            p = previous,
            i = index,
            s = select,
            v = var,
            g = get_ctx,
            leave = indent(&[leave], 1),
            enter = indent(&[enter_block], 1)
        );
        let conditions: Vec<ExprId> = branches.iter().filter_map(|b| b.test).collect();
        let mut guard_deps = self.cx.deps.union(&conditions);
        guard_deps.extend(needs.iter().cloned());
        match self.guard(&guard_deps) {
            Some(guard) => f.patch.push(format!("if ({}) {{\n{}}}", guard, indent(&[switch], 1))),
            None => tracing::trace!(block = %var, "static condition, no patch"),
        }

        let transition_in = f.lifecycle_helper("transition_in");
        let transition_out = f.lifecycle_helper("transition_out");
        f.intro.push(format!("{}({}, local);", transition_in, var));
        f.outro.push(format!("{}({}, local);", transition_out, var));
        f.destroy.push(format!("if ({v}) {v}.destroy({d});", v = var, d = detaching(place)));
    }

    fn each_block(&mut self, w: &Wrapper, item: BlockId, fallback: Option<BlockId>, place: Place, f: &mut Fragments) {
        let ast = self.cx.ast;
        let tree = self.cx.tree;
        let NodeKind::EachBlock(each) = ast.kind(w.node) else {
            return;
        };
        let item_block = tree.block(item);
        let var = w.var.clone();
        let value = self.unique("each_value");
        let anchor = self.unique(&format!("{}_anchor", var));
        let get_context = self.unique(&format!("get_{}_context", item_block.name.trim_start_matches("create_")));

        let list = self.render_expr(each.expression, "ctx");
        let list_deps = self.cx.deps.expr_deps(each.expression).clone();

        // Module-level context builder for one item.
        let mut fields: Vec<String> = item_block.needs.iter().map(|n| format!("{n}: ctx.{n}")).collect();
        fields.extend(each.context.names.iter().cloned());
        if let Some(index) = &each.index {
            fields.push(format!("{}: i", index));
        }
        self.module.push(format!(
            "function {}(ctx, list, i) {{\n  const {} = list[i];\n  return {{ {} }};\n}}\n",
            get_context,
            each.context.source,
            fields.join(", ")
        ));

        let mut locals: Vec<String> = each.context.names.clone();
        locals.extend(each.index.iter().cloned());
        let item_changes = format!(
            "{}(changed, [{}], [{}])",
            self.helper("extend_changed"),
            list_deps.iter().map(|d| js_string(d)).collect::<Vec<_>>().join(", "),
            locals.iter().map(|d| js_string(d)).collect::<Vec<_>>().join(", ")
        );
        let mut guard_deps = list_deps.clone();
        guard_deps.extend(item_block.needs.iter().cloned());
        if let Some(block) = fallback {
            guard_deps.extend(tree.block(block).needs.iter().cloned());
        }
        let guard = self.guard(&guard_deps);

        f.declarations.push(anchor.clone());
        f.init.push(format!("let {} = {};", value, list));
        f.init.push(format!("let {} = [];", var));

        let has_outro = item_block.has_outro;
        let has_intro = item_block.has_intro;

        let key_fn = match each.key {
            Some(key) => {
                let lookup = self.unique(&format!("{}_lookup", var));
                let get_key = self.unique("get_key");
                let key_expr = self.render_expr(key, "child_ctx");
                f.init.push(format!("const {} = new Map();", lookup));
                f.init.push(format!("const {} = (child_ctx) => {};", get_key, key_expr));
                if self.dev() {
                    let validate = self.helper("validate_each_keys");
                    f.init.push(format!("{}(ctx, {}, {}, {});", validate, value, get_context, get_key));
                }
                f.init.push(format!(
                    "for (let i = 0; i < {val}.length; i += 1) {{\n  const child_ctx = {gc}(ctx, {val}, i);\n  const key = {gk}(child_ctx);\n  {l}.set(key, {v}[i] = {c}(key, child_ctx));\n}}",
                    val = value,
                    gc = get_context,
                    gk = get_key,
                    l = lookup,
                    v = var,
                    c = item_block.name
                ));
                Some((lookup, get_key))
            }
            None => {
                f.init.push(format!(
                    "for (let i = 0; i < {val}.length; i += 1) {{\n  {v}[i] = {c}({gc}(ctx, {val}, i));\n}}",
                    val = value,
                    v = var,
                    c = item_block.name,
                    gc = get_context
                ));
                None
            }
        };

        let else_var = fallback.map(|block| {
            let fb = self.unique("each_else");
            let b = tree.block(block);
            f.declarations.push(fb.clone());
            f.init.push(format!(
                "if (!{val}.length) {fb} = {c}({ctx});",
                val = value,
                fb = fb,
                c = b.name,
                ctx = self.context_literal(&b.needs, "ctx")
            ));
            (fb, block)
        });

        let empty = self.helper("empty");
        f.create.push(format!(
            "for (let i = 0; i < {v}.length; i += 1) {{\n  {v}[i].create();\n}}\n{a} = {e}();",
            v = var,
            a = anchor,
            e = empty
        ));
        f.mount.push(format!(
            "for (let i = 0; i < {v}.length; i += 1) {{\n  {v}[i].mount({args});\n}}",
            v = var,
            args = mount_args(place)
        ));
        self.insert_node(&anchor, place, f);

        let mut patch = vec![format!("{} = {};", value, list)];
        match &key_fn {
            Some((lookup, get_key)) => {
                if self.dev() {
                    let validate = self.helper("validate_each_keys");
                    patch.push(format!("{}(ctx, {}, {}, {});", validate, value, get_context, get_key));
                }
                let destroy = if has_outro {
                    self.helper("outro_and_destroy_block")
                } else {
                    self.helper("destroy_block")
                };
                let update = self.helper("update_keyed_each");
                if has_outro {
                    patch.push(format!("{}();", self.helper("group_outros")));
                }
                patch.push(format!(
                    "{v} = {u}({v}, {ch}, {gk}, ctx, {val}, {l}, {a}, {d}, {c}, {gc});",
                    v = var,
                    u = update,
                    ch = item_changes,
                    gk = get_key,
                    val = value,
                    l = lookup,
                    a = anchor,
                    d = destroy,
                    c = item_block.name,
                    gc = get_context
                ));
                if has_outro {
                    patch.push(format!("{}();", self.helper("check_outros")));
                }
            }
            None => {
                let enter = if has_intro || has_outro {
                    format!("\n    {}({}[i], 1);", self.helper("transition_in"), var)
                } else {
                    String::new()
                };
                patch.push(format!(
                    "let i;\nfor (i = 0; i < {val}.length; i += 1) {{\n  const child_ctx = {gc}(ctx, {val}, i);\n  if ({v}[i]) {{\n    {v}[i].patch({ch}, child_ctx);{enter}\n  }} else {{\n    {v}[i] = {c}(child_ctx);\n    {v}[i].create();{enter}\n    {v}[i].mount({a}.parentNode, {a});\n  }}\n}}",
                    val = value,
                    gc = get_context,
                    v = var,
                    ch = item_changes,
                    c = item_block.name,
                    a = anchor,
                    enter = enter
                ));
                if has_outro {
                    // Outgoing items keep their slot until the outro ends, so
                    // an item that comes back mid-outro is patched and resumed.
                    let group = self.helper("group_outros");
                    let check = self.helper("check_outros");
                    let out = self.helper("transition_out");
                    patch.push(format!(
                        "{group}();\nfor (let j = {val}.length; j < {v}.length; j += 1) {{\n  const outgoing = {v}[j];\n  if (!outgoing) continue;\n  const slot = j;\n  {out}(outgoing, 1, 1, () => {{\n    if ({v}[slot] === outgoing) {v}[slot] = null;\n  }});\n}}\n{check}();",
                        group = group,
                        check = check,
                        out = out,
                        v = var,
                        val = value
                    ));
                } else {
                    patch.push(format!(
                        "for (; i < {v}.length; i += 1) {{\n  {v}[i].destroy(1);\n}}\n{v}.length = {val}.length;",
                        v = var,
                        val = value
                    ));
                }
            }
        }

        if let Some((fb, block)) = &else_var {
            let b = tree.block(*block);
            let ctx = self.context_literal(&b.needs, "ctx");
            patch.push(format!(
                "if (!{val}.length && {fb}) {{\n  {fb}.patch(changed, {ctx});\n}} else if (!{val}.length) {{\n  {fb} = {c}({ctx});\n  {fb}.create();\n  {fb}.mount({a}.parentNode, {a});\n}} else if ({fb}) {{\n  {fb}.destroy(1);\n  {fb} = null;\n}}",
                val = value,
                fb = fb,
                ctx = ctx,
                c = b.name,
                a = anchor
            ));
            f.create.push(format!("if ({fb}) {fb}.create();", fb = fb));
            f.mount.push(format!("if ({fb}) {fb}.mount({args});", fb = fb, args = mount_args(place)));
            f.destroy.push(format!("if ({fb}) {fb}.destroy({d});", fb = fb, d = detaching(place)));
        }

        match guard {
            Some(guard) => f.patch.push(format!("if ({}) {{\n{}}}", guard, indent(&patch, 1))),
            None => tracing::trace!(each = %var, "static list, no patch"),
        }

        let transition_in = f.lifecycle_helper("transition_in");
        let transition_out = f.lifecycle_helper("transition_out");
        f.intro.push(format!(
            "for (let i = 0; i < {val}.length; i += 1) {{\n  {ti}({v}[i], local);\n}}",
            val = value,
            ti = transition_in,
            v = var
        ));
        f.outro.push(format!(
            "for (let i = 0; i < {v}.length; i += 1) {{\n  if ({v}[i]) {to}({v}[i], local);\n}}",
            v = var,
            to = transition_out
        ));
        f.destroy.push(format!(
            "for (let i = 0; i < {v}.length; i += 1) {{\n  if ({v}[i]) {v}[i].destroy({d});\n}}",
            v = var,
            d = detaching(place)
        ));
    }

    fn await_block(&mut self, w: &Wrapper, phases: [Option<BlockId>; 3], place: Place, f: &mut Fragments) {
        let ast = self.cx.ast;
        let tree = self.cx.tree;
        let NodeKind::AwaitBlock(block) = ast.kind(w.node) else {
            return;
        };
        let info = w.var.clone();
        let promise = self.unique("promise");
        let anchor = self.unique(&format!("{}_anchor", info));

        let value_name = block.value.clone();
        let error_name = block.error.clone();
        let creators: Vec<String> = phases
            .iter()
            .map(|p| p.map_or_else(|| "null".to_string(), |b| tree.block(b).name.clone()))
            .collect();
        let contexts: Vec<String> = phases
            .iter()
            .zip([None, value_name.as_ref(), error_name.as_ref()])
            .map(|(phase, local)| {
                let needs = phase.map(|b| tree.block(b).needs.clone()).unwrap_or_default();
                let mut fields: Vec<String> = needs.iter().map(|n| format!("{n}: ctx.{n}")).collect();
                if let Some(local) = local {
                    fields.push(format!("{}: value", local));
                }
                format!("(ctx, value) => ({{ {} }})", fields.join(", "))
            })
            .collect();

        let expression = self.render_expr(block.expression, "ctx");
        let handle = self.helper("handle_promise");
        f.declarations.push(anchor.clone());
        f.declarations.push(promise.clone());
        f.init.push(format!(
            "let {i} = {{\n  ctx,\n  current: null,\n  token: null,\n  pending: {p},\n  then: {t},\n  catch: {c},\n  contexts: [\n    {c0},\n    {c1},\n    {c2}\n  ],\n  blocks: [null, null, null]\n}};",
            i = info,
            p = creators[0],
            t = creators[1],
            c = creators[2],
            c0 = contexts[0],
            c1 = contexts[1],
            c2 = contexts[2]
        ));
        f.init.push(format!("{}({} = {}, {});", handle, promise, expression, info));

        let empty = self.helper("empty");
        f.create.push(format!("{i}.block.create();\n{a} = {e}();", i = info, a = anchor, e = empty));
        f.mount.push(format!(
            "{i}.block.mount({args});\n{i}.mount = () => {a}.parentNode;\n{i}.anchor = {a};",
            i = info,
            args = mount_args(place),
            a = anchor
        ));
        self.insert_node(&anchor, place, f);

        let dependency_info = self.cx.deps;
        let deps = dependency_info.expr_deps(block.expression);
        let mut guard_deps = deps.clone();
        guard_deps.extend(self.union_needs(phases.iter().flatten()));
        match self.guard(&guard_deps) {
            Some(outer) => {
                let update = self.helper("update_await_block_branch");
                let patch = match self.guard(deps) {
                    Some(guard) => format!(
                        "{i}.ctx = ctx;\nif (!(({g}) && {p} !== ({p} = {e}) && {h}({p}, {i}))) {{\n  {u}({i}, changed, ctx);\n}}",
                        i = info,
                        g = guard,
                        p = promise,
                        e = expression,
                        h = handle,
                        u = update
                    ),
                    None => format!("{i}.ctx = ctx;\n{u}({i}, changed, ctx);", i = info, u = update),
                };
                f.patch.push(format!("if ({}) {{\n{}}}", outer, indent(&[patch], 1)));
            }
            None => tracing::trace!(block = %info, "settled promise, no patch"),
        }

        let transition_in = f.lifecycle_helper("transition_in");
        let transition_out = f.lifecycle_helper("transition_out");
        f.intro.push(format!("{}({}.block, local);", transition_in, info));
        f.outro.push(format!(
            "for (let i = 0; i < 3; i += 1) {{\n  {}({}.blocks[i], local);\n}}",
            transition_out, info
        ));
        f.destroy.push(format!(
            "{i}.block.destroy({d});\n{i}.token = null;\n{i} = null;",
            i = info,
            d = detaching(place)
        ));
    }
}
