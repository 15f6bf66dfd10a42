//! String-render target.
//!
//! Emits a module whose `render(props)` returns the component's markup as a
//! string. It needs only the parse tree and the binding classification:
//! template expressions are evaluated as written inside `render`, where the
//! instance script runs once, so no context threading, dependency guards or
//! block tree are involved.

use std::collections::BTreeSet;

use crate::ast::{Ast, AttributeChunk, AttributeValue, DirectiveKind, Element, ExprId, NodeId, NodeKind};
use crate::block::let_bindings;
use crate::codegen::{dedent, hoisted, instance_rewriter, script_imports, statement_text, Program};
use crate::parse::is_void;
use crate::session::CompileSession;
use crate::style::ScopedStyle;
use crate::wrapper::{indent, js_string};

/// Escape text for a JavaScript template literal.
fn literal(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

fn attribute_text(text: &str) -> String {
    literal(&text.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;"))
}

pub fn generate(program: &Program, session: &mut CompileSession) -> String {
    let mut renderer = Renderer {
        ast: program.ast,
        style: program.style,
        helpers: BTreeSet::new(),
    };
    let ast = program.ast;
    let markup = renderer.children(ast.template_children(ast.root).collect::<Vec<_>>().as_slice());

    let mut body: Vec<String> = Vec::new();
    if let Some(instance) = program.instance {
        for implicit in program.bindings.instance().filter(|b| b.implicit) {
            body.push(format!("let {};", implicit.name));
        }
        let rewriter = instance_rewriter(instance, program.bindings);
        let rendered = dedent(&rewriter.render(&ast.source, instance.content));
        if !rendered.is_empty() {
            body.push(rendered);
        }
        // Reactive statements settle once, in dependency order.
        for reactive in program.deps.order.iter().filter_map(|&i| instance.reactive.get(i)) {
            body.push(statement_text(ast.slice(reactive.body)));
        }
    }
    body.push(format!("return `{}`;", markup));

    let mut out = String::from("/* generated by weave-compiler (ssr) */\n");
    if !renderer.helpers.is_empty() {
        let helpers: Vec<&str> = renderer.helpers.iter().copied().collect();
        out.push_str(&format!(
            "import {{ {} }} from {};\n",
            helpers.join(", "),
            js_string(&session.options.runtime)
        ));
    }
    for import in script_imports(program) {
        out.push_str(&import);
        out.push('\n');
    }
    out.push('\n');
    if let Some(module) = program.module {
        out.push_str(ast.slice(module.content).trim());
        out.push_str("\n\n");
    }
    for statement in hoisted(program) {
        out.push_str(&statement);
        out.push('\n');
    }
    let name = session.unique("render");
    out.push_str(&format!(
        "export function {}($$props = {{}}, $$slots = {{}}) {{\n{}}}\n\nexport default {{ render: {} }};\n",
        name,
        indent(&body, 1),
        name
    ));
    tracing::debug!(bytes = out.len(), "emitted string renderer");
    out
}

struct Renderer<'a> {
    ast: &'a Ast,
    style: Option<&'a ScopedStyle>,
    helpers: BTreeSet<&'static str>,
}

impl<'a> Renderer<'a> {
    fn helper(&mut self, name: &'static str) -> &'static str {
        self.helpers.insert(name);
        name
    }

    fn source(&self, expr: ExprId) -> &'a str {
        &self.ast.expr(expr).source
    }

    fn children(&mut self, nodes: &[NodeId]) -> String {
        nodes.iter().map(|n| self.node(*n)).collect()
    }

    fn node(&mut self, id: NodeId) -> String {
        let ast = self.ast;
        match ast.kind(id) {
            NodeKind::Text(text) => literal(&text.raw),
            NodeKind::Comment(_) | NodeKind::DebugTag(_) | NodeKind::Script(_) | NodeKind::Style(_) => String::new(),
            NodeKind::MustacheTag(expr) => format!("${{{}({})}}", self.helper("escape"), self.source(*expr)),
            NodeKind::RawMustacheTag(expr) => format!("${{{}}}", self.source(*expr)),
            NodeKind::Element(el) => self.element(id, el),
            NodeKind::Component(el) => self.component(id, el),
            NodeKind::Slot(el) => self.slot(id, el),
            NodeKind::IfBlock(block) => {
                let consequent = self.children(&block.consequent);
                // An `{:else if}` chain renders as a nested conditional inside the else content.
                let alternate = block.alternate.map_or_else(String::new, |alt| self.children(ast.children(alt)));
                format!("${{{} ? `{}` : `{}`}}", self.source(block.test), consequent, alternate)
            }
            NodeKind::EachBlock(block) => {
                let each = self.helper("each");
                let params = match &block.index {
                    Some(index) => format!("({}, {})", block.context.source, index),
                    None => format!("({})", block.context.source),
                };
                let body = self.children(&block.body);
                let list = self.source(block.expression);
                let rendered = format!("{}({}, {} => `{}`)", each, list, params, body);
                match block.fallback {
                    Some(fallback) => {
                        let fallback = self.children(ast.children(fallback));
                        format!("${{{}.length ? {} : `{}`}}", list, rendered, fallback)
                    }
                    None => format!("${{{}}}", rendered),
                }
            }
            NodeKind::AwaitBlock(block) => {
                let is_promise = self.helper("is_promise");
                let pending = block.pending.map_or_else(String::new, |p| self.children(ast.children(p)));
                let then = block.then.map_or_else(String::new, |t| self.children(ast.children(t)));
                let value = block.value.clone().unwrap_or_else(|| "_".to_string());
                format!(
                    "${{(($$value) => {}($$value) ? `{}` : (({}) => `{}`)($$value))({})}}",
                    is_promise,
                    pending,
                    value,
                    then,
                    self.source(block.expression)
                )
            }
            NodeKind::Fragment | NodeKind::ElseBlock | NodeKind::PendingBlock | NodeKind::ThenBlock | NodeKind::CatchBlock => {
                self.children(ast.children(id))
            }
        }
    }

    fn class_parts(&mut self, id: NodeId, el: &Element) -> Option<String> {
        let token = self
            .style
            .filter(|style| style.scoped_elements.contains(&id))
            .map(|style| style.token.clone());
        let toggles: Vec<String> = el
            .directives_of(DirectiveKind::Class)
            .map(|d| {
                let test = d.expression.map_or_else(|| d.name.clone(), |e| self.source(e).to_string());
                format!("({}) ? {} : \"\"", test, js_string(&d.name))
            })
            .collect();
        if token.is_none() && toggles.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(class) = el.attribute("class") {
            parts.push(self.value_expression(&class.value));
        }
        if let Some(token) = token {
            parts.push(js_string(&token));
        }
        parts.extend(toggles);
        let escape = self.helper("escape");
        Some(format!(
            " class=\"${{{}([{}].filter(Boolean).join(\" \"))}}\"",
            escape,
            parts.join(", ")
        ))
    }

    /// An attribute value as a JavaScript expression.
    fn value_expression(&self, value: &AttributeValue) -> String {
        match value {
            AttributeValue::True => "true".to_string(),
            AttributeValue::Static(text) => js_string(text),
            AttributeValue::Dynamic(chunks) => match chunks.as_slice() {
                [AttributeChunk::Expression(expr)] => self.source(*expr).to_string(),
                _ => {
                    let inner: String = chunks
                        .iter()
                        .map(|c| match c {
                            AttributeChunk::Text(text) => literal(text),
                            AttributeChunk::Expression(e) => format!("${{{}}}", self.source(*e)),
                        })
                        .collect();
                    format!("`{}`", inner)
                }
            },
        }
    }

    fn element(&mut self, id: NodeId, el: &Element) -> String {
        let mut out = format!("<{}", el.name);
        let class = self.class_parts(id, el);
        for attribute in &el.attributes {
            if attribute.name == "slot" || (attribute.name == "class" && class.is_some()) {
                continue;
            }
            match &attribute.value {
                AttributeValue::True => out.push_str(&format!(" {}", attribute.name)),
                AttributeValue::Static(text) => {
                    out.push_str(&format!(" {}=\"{}\"", attribute.name, attribute_text(text)))
                }
                AttributeValue::Dynamic(chunks) => match chunks.as_slice() {
                    [AttributeChunk::Expression(expr)] => {
                        let add = self.helper("add_attribute");
                        out.push_str(&format!(
                            "${{{}({}, {})}}",
                            add,
                            js_string(&attribute.name),
                            self.source(*expr)
                        ));
                    }
                    _ => {
                        let escape = self.helper("escape");
                        let inner: String = chunks
                            .iter()
                            .map(|c| match c {
                                AttributeChunk::Text(text) => attribute_text(text),
                                AttributeChunk::Expression(e) => format!("${{{}({})}}", escape, self.source(*e)),
                            })
                            .collect();
                        out.push_str(&format!(" {}=\"{}\"", attribute.name, inner));
                    }
                },
            }
        }
        if let Some(class) = class {
            out.push_str(&class);
        }

        let mut content = None;
        for directive in el.directives_of(DirectiveKind::Bind) {
            let Some(expr) = directive.expression else {
                continue;
            };
            let target = self.source(expr);
            match directive.name.as_str() {
                "value" if el.name == "textarea" => {
                    content = Some(format!("${{{}({})}}", self.helper("escape"), target));
                }
                "value" => {
                    let add = self.helper("add_attribute");
                    out.push_str(&format!("${{{}(\"value\", {})}}", add, target));
                }
                "checked" => out.push_str(&format!("${{{} ? \" checked\" : \"\"}}", target)),
                _ => {}
            }
        }
        out.push('>');

        if is_void(&el.name) {
            return out;
        }
        match content {
            Some(content) => out.push_str(&content),
            None => out.push_str(&self.children(self.ast.children(id))),
        }
        out.push_str(&format!("</{}>", el.name));
        out
    }

    fn component(&mut self, id: NodeId, el: &Element) -> String {
        let ast = self.ast;
        let mut props: Vec<String> = el
            .attributes
            .iter()
            .map(|a| format!("{}: {}", js_string(&a.name), self.value_expression(&a.value)))
            .collect();
        for directive in el.directives_of(DirectiveKind::Bind) {
            if let Some(expr) = directive.expression {
                props.push(format!("{}: {}", js_string(&directive.name), self.source(expr)));
            }
        }

        let lets = let_bindings(ast, id);
        let params = if lets.is_empty() {
            "()".to_string()
        } else {
            let fields: Vec<String> = lets.iter().map(|(prop, local)| format!("{}: {}", js_string(prop), local)).collect();
            format!("({{ {} }})", fields.join(", "))
        };

        let mut default = Vec::new();
        let mut named: Vec<(String, String)> = Vec::new();
        for &child in ast.children(id) {
            let slot = ast
                .kind(child)
                .as_element()
                .filter(|_| !matches!(ast.kind(child), NodeKind::Slot(_)))
                .and_then(|c| c.static_attribute("slot"));
            match slot {
                Some(name) => {
                    let child_lets = let_bindings(ast, child);
                    let child_params = if child_lets.is_empty() {
                        params.clone()
                    } else {
                        let fields: Vec<String> = child_lets
                            .iter()
                            .map(|(prop, local)| format!("{}: {}", js_string(prop), local))
                            .collect();
                        format!("({{ {} }})", fields.join(", "))
                    };
                    let markup = self.node(child);
                    named.push((name.to_string(), format!("{} => `{}`", child_params, markup)));
                }
                None => default.push(child),
            }
        }
        let mut slots: Vec<String> = Vec::new();
        let default_markup = self.children(&default);
        if !default_markup.trim().is_empty() {
            slots.push(format!("default: {} => `{}`", params, default_markup));
        }
        for (name, function) in named {
            slots.push(format!("{}: {}", js_string(&name), function));
        }

        let validate = self.helper("validate_component");
        format!(
            "${{{}({}, {}).render({{ {} }}, {{ {} }})}}",
            validate,
            el.name,
            js_string(&el.name),
            props.join(", "),
            slots.join(", ")
        )
    }

    fn slot(&mut self, id: NodeId, el: &Element) -> String {
        let name = el.static_attribute("name").unwrap_or("default");
        let props: Vec<String> = el
            .attributes
            .iter()
            .filter(|a| a.name != "name")
            .map(|a| format!("{}: {}", js_string(&a.name), self.value_expression(&a.value)))
            .collect();
        let fallback = self.children(self.ast.children(id));
        let slot = format!("$$slots[{}]", js_string(name));
        format!(
            "${{{s} ? {s}({{ {p} }}) : `{f}`}}",
            s = slot,
            p = props.join(", "),
            f = fallback
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::options::{CompileOptions, Generate};

    fn render(source: &str) -> String {
        let options = CompileOptions::default().generate(Generate::Ssr);
        crate::compile(source, &options).unwrap().js
    }

    #[test]
    fn test_text_and_mustache() {
        let js = render("<script>export let name = 'world';</script>\n<h1>Hello {name}!</h1>");
        assert!(js.contains("export function render($$props = {}, $$slots = {})"));
        assert!(js.contains("let name = \"name\" in $$props ? $$props[\"name\"] : ('world');"));
        assert!(js.contains("<h1>Hello ${escape(name)}!</h1>"));
        assert!(js.contains("import { escape } from \"weave/internal\";"));
    }

    #[test]
    fn test_control_flow() {
        let js = render(
            "<script>export let items = []; export let ok = true;</script>\n\
             {#if ok}<p>yes</p>{:else}<p>no</p>{/if}\n\
             {#each items as item, i}<li>{i}: {item}</li>{:else}<p>empty</p>{/each}",
        );
        assert!(js.contains("${ok ? `<p>yes</p>` : `<p>no</p>`}"));
        assert!(js.contains("${items.length ? each(items, (item, i) => `<li>${escape(i)}: ${escape(item)}</li>`) : `<p>empty</p>`}"));
    }

    #[test]
    fn test_reactive_statements_run_once_in_dependency_order() {
        let js = render("<script>export let a = 1; $: c = b + 1; $: b = a * 2;</script>\n<p>{c}</p>");
        let b = js.find("b = a * 2;").unwrap();
        let c = js.find("c = b + 1;").unwrap();
        assert!(b < c);
        assert!(js.contains("let b;"));
        assert!(!js.contains("$$invalidate"));
    }

    #[test]
    fn test_instance_lines_share_one_indent() {
        let js = render("<script>\n    export let title = 'a';\n    export let count = 0;\n</script>\n<p>{title} {count}</p>");
        assert!(js.contains("{\n  let title = \"title\" in $$props"));
        assert!(js.contains("\n  let count = \"count\" in $$props"));
        assert!(!js.contains("\n    let count"));
    }

    #[test]
    fn test_template_literal_escaping() {
        let js = render("<p>a `tick` \\ b</p>");
        assert!(js.contains("<p>a \\`tick\\` \\\\ b</p>"));
    }

    #[test]
    fn test_void_and_attributes() {
        let js = render("<script>export let v = '';</script>\n<input type=\"text\" bind:value={v} disabled>");
        assert!(js.contains("<input type=\"text\" disabled${add_attribute(\"value\", v)}>"));
        assert!(!js.contains("</input>"));
    }
}
