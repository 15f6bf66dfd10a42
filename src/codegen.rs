//! Program assembly.
//!
//! Turns the analysed component into one ES module: runtime imports, the
//! module script and hoisted declarations, one creator function per block,
//! the instrumented instance function and the component class.

use crate::ast::{Ast, ScriptContext};
use crate::binder::{BindingKind, Bindings, Resolution};
use crate::block::{self, BlockTree};
use crate::deps::DependencyInfo;
use crate::diagnostic::{CompilerError, ERR_UNRESOLVED_IDENTIFIER};
use crate::scope::ScopeTree;
use crate::script::{Rewriter, ScriptAnalysis, StatementKind};
use crate::session::CompileSession;
use crate::style::ScopedStyle;
use crate::wrapper::{indent, js_string, EmitContext, FragmentEmitter};

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the emitter reads. Built by `compile` once analysis succeeded.
#[derive(Clone, Copy)]
pub struct Program<'a> {
    pub ast: &'a Ast,
    pub instance: Option<&'a ScriptAnalysis>,
    pub module: Option<&'a ScriptAnalysis>,
    pub bindings: &'a Bindings,
    pub scopes: &'a ScopeTree,
    pub deps: &'a DependencyInfo,
    pub style: Option<&'a ScopedStyle>,
    /// Slot names declared by the template.
    pub slots: &'a [String],
}

/// Generate the interactive program.
pub fn generate(program: &Program, session: &mut CompileSession) -> Result<String, CompilerError> {
    if session.options.strict {
        check_resolved(program)?;
    }

    let tree = block::build(program.ast, program.bindings, program.scopes, session);
    session.stats.blocks = tree.len();
    tracing::debug!(blocks = tree.len(), "built block tree");

    let cx = EmitContext {
        ast: program.ast,
        bindings: program.bindings,
        scopes: program.scopes,
        deps: program.deps,
        tree: &tree,
        style: program.style,
    };
    let component_name = session.options.component_name();
    let class_name = session.unique(&component_name);
    let instance_name = session.unique("instance");
    let dev = session.options.dev;
    let inject_css = session.options.css;
    let runtime = session.options.runtime.clone();
    let filename = session.filename().to_string();

    let mut emitter = FragmentEmitter::new(cx, session);
    let blocks = emit_blocks(&tree, &mut emitter)?;
    let instance = instance_function(program, &instance_name, &mut emitter);

    let css = match program.style {
        Some(style) if inject_css && !style.css.is_empty() => {
            let append = emitter.helper("append_styles");
            Some(format!(
                "function add_css(target) {{\n  {}(target, {}, {});\n}}\n",
                append,
                js_string(&style.token),
                js_string(&style.css)
            ))
        }
        _ => None,
    };

    let props: Vec<String> = program.bindings.props().iter().map(|p| js_string(p)).collect();
    let mut init_args = vec![
        "this".to_string(),
        "options".to_string(),
        instance_name,
        tree.block(block::BlockId::ROOT).name.clone(),
        emitter.helper("safe_not_equal").to_string(),
        format!("[{}]", props.join(", ")),
    ];
    if css.is_some() {
        init_args.push("add_css".to_string());
    }
    let init = emitter.helper("init");
    let component = emitter.helper("Component");
    let class = format!(
        "class {name} extends {component} {{\n  constructor(options) {{\n    super();\n    {init}({args});\n  }}\n}}\n\nexport default {name};\n",
        name = class_name,
        component = component,
        init = init,
        args = init_args.join(", ")
    );

    let mut out = String::from("/* generated by weave-compiler */\n");
    let helpers: Vec<&str> = emitter.helpers().iter().copied().collect();
    out.push_str(&format!(
        "import {{ {} }} from {};\n",
        helpers.join(", "),
        js_string(&runtime)
    ));
    for import in script_imports(program) {
        out.push_str(&import);
        out.push('\n');
    }
    out.push('\n');

    if let Some(module) = program.module {
        out.push_str(program.ast.slice(module.content).trim());
        out.push_str("\n\n");
    }
    for statement in hoisted(program) {
        out.push_str(&statement);
        out.push('\n');
    }
    if dev {
        out.push_str(&format!("const file = {};\n\n", js_string(&filename)));
    }
    if let Some(css) = css {
        out.push_str(&css);
        out.push('\n');
    }
    for function in &emitter.module {
        out.push_str(function);
        out.push('\n');
    }
    for block in blocks {
        out.push_str(&block);
        out.push('\n');
    }
    out.push_str(&instance);
    out.push('\n');
    out.push_str(&class);

    tracing::debug!(bytes = out.len(), helpers = helpers.len(), "emitted program");
    Ok(out)
}

/// Strict mode: every template identifier must resolve.
fn check_resolved(program: &Program) -> Result<(), CompilerError> {
    for expr in program.ast.expressions() {
        if program.scopes.is_declaration(expr.id) {
            continue;
        }
        let resolutions = program.bindings.resolutions(expr.id);
        for (reference, resolution) in expr.info.references.iter().zip(resolutions) {
            if *resolution == Resolution::Unresolved {
                return Err(CompilerError::binding(
                    ERR_UNRESOLVED_IDENTIFIER,
                    format!("`{}` is not defined", reference.name),
                    reference.span.start,
                ));
            }
        }
    }
    Ok(())
}

/// Creator functions, children before the blocks that instantiate them.
fn emit_blocks(tree: &BlockTree, emitter: &mut FragmentEmitter) -> Result<Vec<String>, CompilerError> {
    if tree.is_empty() {
        return Err(CompilerError::internal("block tree has no root fragment"));
    }
    let mut out = Vec::with_capacity(tree.len());
    for block in tree.blocks().iter().rev() {
        out.push(emitter.emit_block(block.id));
    }
    Ok(out)
}

pub(crate) fn script_imports(program: &Program) -> Vec<String> {
    let Some(instance) = program.instance else {
        return vec![];
    };
    instance
        .imports()
        .map(|s| {
            s.import
                .clone()
                .unwrap_or_else(|| program.ast.slice(s.span).to_string())
        })
        .collect()
}

pub(crate) fn hoisted(program: &Program) -> Vec<String> {
    let Some(instance) = program.instance else {
        return vec![];
    };
    program
        .bindings
        .hoisted_statements
        .iter()
        .filter_map(|&i| instance.statements.get(i))
        .map(|s| program.ast.slice(s.span).to_string())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

fn is_reactive_root(bindings: &Bindings, name: &str) -> bool {
    bindings
        .get(name)
        .map_or(false, |b| b.kind.is_reactive() && b.context == ScriptContext::Instance)
}

/// Edits shared by both targets: drop statements that are emitted elsewhere,
/// strip `export` keywords and read props from `$$props`.
pub fn instance_rewriter(instance: &ScriptAnalysis, bindings: &Bindings) -> Rewriter {
    let mut rewriter = Rewriter::new();
    for (i, statement) in instance.statements.iter().enumerate() {
        let drop = match statement.kind {
            StatementKind::Import | StatementKind::ExportList | StatementKind::Reactive => true,
            StatementKind::Declaration => bindings.hoisted_statements.contains(&i),
            StatementKind::Other => false,
        };
        if drop {
            rewriter.remove(statement.span);
        } else if let Some(keyword) = statement.export_keyword {
            rewriter.remove(keyword);
        }
    }
    for decl in &instance.declarations {
        if decl.destructured || bindings.kind_of(&decl.name) != Some(BindingKind::Prop) {
            continue;
        }
        let key = js_string(&decl.name);
        match decl.init {
            Some(init) => {
                rewriter.insert(init.start, format!("{} in $$props ? $$props[{}] : (", key, key));
                rewriter.insert(init.end, ")");
            }
            None => rewriter.insert(decl.span.end, format!(" = $$props[{}]", key)),
        }
    }
    rewriter
}

/// Wrap every write to a reactive binding in `$$invalidate`, nesting when one
/// site writes several names.
fn instrument_writes(instance: &ScriptAnalysis, bindings: &Bindings, rewriter: &mut Rewriter) {
    for (_, site) in instance.write_sites() {
        let names: Vec<&String> = site.names.iter().filter(|n| is_reactive_root(bindings, n)).collect();
        if names.is_empty() {
            continue;
        }
        let open: String = names
            .iter()
            .map(|n| format!("$$invalidate({}, ", js_string(n)))
            .collect();
        let close: String = names.iter().rev().map(|n| format!(", {})", n)).collect();
        rewriter.insert(site.span.start, open);
        rewriter.insert(site.span.end, close);
    }
}

/// Drop surrounding blank lines and the indentation every line shares.
pub(crate) fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().skip_while(|l| l.trim().is_empty()).collect();
    let margin = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let stripped: Vec<&str> = lines
        .iter()
        .map(|l| l.get(margin..).unwrap_or_else(|| l.trim_start()))
        .collect();
    stripped.join("\n").trim_end().to_string()
}

pub(crate) fn statement_text(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(';') || text.ends_with('}') {
        text.to_string()
    } else {
        format!("{};", text)
    }
}

fn instance_function(program: &Program, name: &str, emitter: &mut FragmentEmitter) -> String {
    let ast = program.ast;
    let bindings = program.bindings;
    let dev = emitter.dev();
    let mut body: Vec<String> = Vec::new();

    if dev {
        let dispatch = emitter.helper("dispatch_dev");
        body.push(format!(
            "const $$invalidate_base = $$invalidate;\n$$invalidate = (key, ret, value = ret) => {{\n  {}(\"WeaveStateChange\", {{ component: $$self, key, value }});\n  return $$invalidate_base(key, ret, value);\n}};",
            dispatch
        ));
    }
    let has_slots = !program.slots.is_empty();
    if has_slots {
        body.push("let { $$slots = {}, $$scope } = $$props;".to_string());
    }

    let mut reactive_bodies: Vec<(usize, String)> = Vec::new();
    if let Some(instance) = program.instance {
        let mut rewriter = instance_rewriter(instance, bindings);
        instrument_writes(instance, bindings, &mut rewriter);

        for implicit in bindings.instance().filter(|b| b.implicit) {
            body.push(format!("let {};", implicit.name));
        }
        let rendered = dedent(&rewriter.render(&ast.source, instance.content));
        if !rendered.is_empty() {
            body.push(rendered);
        }
        for &i in &program.deps.order {
            if let Some(reactive) = instance.reactive.get(i) {
                reactive_bodies.push((i, statement_text(&rewriter.render(&ast.source, reactive.body))));
            }
        }
    }

    let bound: Vec<String> = emitter.bound.iter().cloned().collect();
    if !bound.is_empty() {
        let cases: Vec<String> = bound
            .iter()
            .map(|n| format!("case {}:\n  $$invalidate({}, {} = value);\n  break;", js_string(n), js_string(n), n))
            .collect();
        body.push(format!(
            "function $$bind(name, value) {{\n  switch (name) {{\n{}  }}\n}}",
            indent(&cases, 2)
        ));
    }
    if emitter.bubbles {
        let bubble = emitter.helper("bubble");
        body.push(format!("function $$bubble(event) {{\n  {}($$self, event);\n}}", bubble));
    }

    let props = bindings.props();
    if !props.is_empty() || has_slots {
        let mut setters: Vec<String> = props
            .iter()
            .map(|p| {
                let key = js_string(p);
                format!("if ({k} in $$props) $$invalidate({k}, {p} = $$props[{k}]);", k = key, p = p)
            })
            .collect();
        if has_slots {
            setters.push("if (\"$$scope\" in $$props) $$invalidate(\"$$scope\", $$scope = $$props.$$scope);".to_string());
        }
        body.push(format!("$$self.$set = ($$props) => {{\n{}}};", indent(&setters, 1)));
    }

    let ctx_names: Vec<String> = bindings
        .instance()
        .filter(|b| b.kind.is_instance())
        .map(|b| b.name.clone())
        .collect();

    if dev {
        body.push(format!("$$self.$capture_state = () => ({{ {} }});", ctx_names.join(", ")));
    }

    if !reactive_bodies.is_empty() {
        let mut update = Vec::new();
        for (i, text) in &reactive_bodies {
            let mut checks = vec!["changed.has(\"$$initial\")".to_string()];
            if let Some(reads) = program.deps.reactive_reads.get(*i) {
                checks.extend(reads.iter().map(|r| format!("changed.has({})", js_string(r))));
            }
            update.push(format!("if ({}) {{\n{}}}", checks.join(" || "), indent(&[text.clone()], 1)));
        }
        body.push(format!("$$self.$$.update = (changed) => {{\n{}}};", indent(&update, 1)));
    }

    let mut returned = ctx_names;
    if !bound.is_empty() {
        returned.push("$$bind".to_string());
    }
    if emitter.bubbles {
        returned.push("$$bubble".to_string());
    }
    if has_slots {
        returned.push("$$slots".to_string());
        returned.push("$$scope".to_string());
    }
    body.push(format!("return {{ {} }};", returned.join(", ")));

    format!("function {}($$self, $$props, $$invalidate) {{\n{}}}\n", name, indent(&body, 1))
}
