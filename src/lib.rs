//! # Weave Compiler
//!
//! Compiles one `.weave` component (markup, an instance script, an optional
//! module script and a scoped stylesheet) into an ES module that updates a
//! live host tree incrementally.
//!
//! ## Pipeline
//!
//! Data flows strictly forward; no stage mutates what an earlier one built.
//!
//! 1. **Parse** (`parse`): markup, expressions and style into an arena [`ast::Ast`].
//!    Script and style regions are independent; their errors are batched with
//!    the first template error.
//! 2. **Script analysis** (`script`): declarations, write sites and `$:`
//!    statements of both scripts.
//! 3. **Scopes and binding** (`scope`, `binder`): every template identifier is
//!    resolved against the chain of each/await/slot frames, then against the
//!    top-level declarations. Each declaration is classified once:
//!    - `Prop`: `export let`, settable from outside.
//!    - `State`: reassigned after initialization.
//!    - `Derived`: assigned only by its own `$:` statement.
//!    - `Local` / `Hoistable` / `Import` / `ModuleLocal`: never reactive.
//! 4. **Validation** (`validate`): directive shapes, binding targets, slots.
//! 5. **Dependencies** (`deps`): read sets of reactive statements, a stable
//!    topological order, cycle detection, and per-expression dependency sets
//!    closed over Derived bindings down to State and Prop roots.
//! 6. **Blocks and emission** (`block`, `wrapper`, `codegen`): one block per
//!    control-flow boundary, each exposing `create`, `mount`, `patch`, `intro`,
//!    `outro` and `destroy`. Every patch fragment is guarded by its dependency set.
//!
//! With `generate: ssr` step 6 is replaced by `ssr`, which renders markup
//! from the parse tree and the classification only.
//!
//! ## Runtime contracts
//!
//! `reconcile`, `transition`, `scheduler` and `host` are reference models of the
//! runtime behaviour generated code relies on: keyed list reconciliation,
//! resumable transitions on a shared clock, and the batched update turn.

#[cfg(feature = "napi")]
use napi_derive::napi;

use rayon::prelude::*;
use serde::Serialize;

pub mod ast;
pub mod binder;
pub mod block;
pub mod codegen;
pub mod deps;
pub mod diagnostic;
pub mod expression;
pub mod host;
pub mod options;
pub mod parse;
pub mod reconcile;
pub mod scheduler;
pub mod scope;
pub mod script;
pub mod session;
pub mod ssr;
pub mod style;
pub mod transition;
pub mod validate;
pub mod visitor;
pub mod wrapper;

#[cfg(test)]
mod analysis_tests;
#[cfg(test)]
mod compile_tests;
#[cfg(test)]
mod parse_tests;

pub use binder::BindingKind;
pub use diagnostic::{CompilerError, Diagnostics, ErrorKind, Severity};
pub use options::{CompileOptions, Generate};
pub use session::CompileStats;

use ast::{NodeKind, ScriptContext};
use codegen::Program;
use scope::ScopeTree;
use script::{analyze_script, ScriptAnalysis};
use session::CompileSession;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

/// One top-level binding as classified by the compiler.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Var {
    pub name: String,
    pub kind: BindingKind,
    pub module: bool,
    pub exported: bool,
    pub referenced_in_template: bool,
    pub mutated: bool,
    pub hoisted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    pub js: String,
    /// Scoped stylesheet, when the component has one.
    pub css: Option<String>,
    pub warnings: Vec<CompilerError>,
    pub vars: Vec<Var>,
    pub props: Vec<String>,
    pub stats: CompileStats,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE
// ═══════════════════════════════════════════════════════════════════════════════

fn script_analysis(
    ast: &ast::Ast,
    node: Option<ast::NodeId>,
    errors: &mut Vec<CompilerError>,
) -> Option<ScriptAnalysis> {
    let NodeKind::Script(script) = ast.kind(node?) else {
        return None;
    };
    match analyze_script(&ast.source, script.content, script.context) {
        Ok(analysis) => Some(analysis),
        Err(err) => {
            errors.push(err);
            None
        }
    }
}

/// Compile one component. Either a program plus warnings, or diagnostics with
/// at least one error; never a partial program.
#[tracing::instrument(skip_all, fields(file = options.filename()))]
pub fn compile(source: &str, options: &CompileOptions) -> Result<CompileOutput, Diagnostics> {
    let mut session = CompileSession::new(source, options);

    let ast = match parse::parse(source) {
        Ok(ast) => ast,
        Err(errors) => return Err(session.fail(errors)),
    };
    session.stats.nodes = ast.len();
    session.stats.expressions = ast.expressions().len();
    tracing::debug!(nodes = ast.len(), expressions = ast.expressions().len(), "parsed");

    let mut errors = Vec::new();
    let instance = script_analysis(&ast, ast.instance, &mut errors);
    let module = script_analysis(&ast, ast.module, &mut errors);
    if !errors.is_empty() {
        return Err(session.fail(errors));
    }

    let scopes = ScopeTree::build(&ast);
    session.stats.scopes = scopes.len();

    let bindings = match binder::bind(&ast, instance.as_ref(), module.as_ref(), &scopes, &mut session) {
        Ok(bindings) => bindings,
        Err(err) => return Err(session.fail(vec![err])),
    };
    session.stats.bindings = bindings.len();

    if let Err(err) = validate::validate(&ast, &bindings, &scopes, &mut session) {
        return Err(session.fail(vec![err]));
    }
    let slots = match validate::slot_names(&ast) {
        Ok(slots) => slots,
        Err(err) => return Err(session.fail(vec![err])),
    };
    if session.diagnostics.has_errors() {
        return Err(session.fail(vec![]));
    }

    let deps = match deps::analyze(&ast, instance.as_ref(), &bindings, &scopes) {
        Ok(deps) => deps,
        Err(errors) => return Err(session.fail(errors)),
    };
    session.stats.reactive_statements = deps.order.len();
    tracing::debug!(order = ?deps.order, "ordered reactive statements");

    let style = ast.style.and_then(|id| match ast.kind(id) {
        NodeKind::Style(block) => Some(style::scope_stylesheet(&ast, &block.stylesheet)),
        _ => None,
    });
    if let Some(style) = &style {
        for warning in &style.warnings {
            session.report(warning.clone());
        }
    }

    let program = Program {
        ast: &ast,
        instance: instance.as_ref(),
        module: module.as_ref(),
        bindings: &bindings,
        scopes: &scopes,
        deps: &deps,
        style: style.as_ref(),
        slots: &slots,
    };
    let js = match options.generate {
        Generate::Dom => match codegen::generate(&program, &mut session) {
            Ok(js) => js,
            Err(err) => return Err(session.fail(vec![err])),
        },
        Generate::Ssr => ssr::generate(&program, &mut session),
    };

    let vars = bindings
        .list
        .iter()
        .map(|b| Var {
            name: b.name.clone(),
            kind: b.kind,
            module: b.context == ScriptContext::Module,
            exported: b.exported,
            referenced_in_template: b.referenced_in_template,
            mutated: b.mutated,
            hoisted: b.hoisted,
        })
        .collect();

    Ok(CompileOutput {
        js,
        css: style.map(|s| s.css).filter(|css| !css.is_empty()),
        warnings: session.diagnostics.warnings,
        vars,
        props: bindings.props().iter().map(|p| p.to_string()).collect(),
        stats: session.stats,
    })
}

/// Compile independent components in parallel. Results keep input order.
pub fn compile_many(
    sources: &[(String, String)],
    options: &CompileOptions,
) -> Vec<(String, Result<CompileOutput, Diagnostics>)> {
    sources
        .par_iter()
        .map(|(name, source)| {
            let mut options = options.clone();
            options.filename = Some(name.clone());
            (name.clone(), compile(source, &options))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON bridge: `{ ok: true, ...output }` or `{ ok: false, errors, warnings }`.
#[cfg(feature = "napi")]
#[napi]
pub fn compile_native(source: String, options_json: Option<String>) -> napi::Result<serde_json::Value> {
    let options = match options_json {
        Some(json) => CompileOptions::from_json(&json).map_err(|e| napi::Error::from_reason(e.to_string()))?,
        None => CompileOptions::default(),
    };
    let value = match compile(&source, &options) {
        Ok(output) => serde_json::json!({ "ok": true, "output": output }),
        Err(diagnostics) => serde_json::json!({ "ok": false, "diagnostics": diagnostics }),
    };
    Ok(value)
}
