//! Per-compile state.
//!
//! A [`CompileSession`] is created for every compile and passed by reference
//! into each stage. It owns the generated-name counters, the diagnostics sink
//! and the optional counters reported on the output. Nothing here outlives
//! the compile.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::diagnostic::{CompilerError, Diagnostics, LineIndex};
use crate::options::CompileOptions;

/// Runtime imports and the fixed locals of generated block functions.
/// Generated identifiers never take these names.
const RESERVED: &[&str] = &[
    "add_attribute", "add_css", "add_flush_callback", "add_location", "add_render_callback",
    "anchor", "append", "append_styles", "attr", "bind", "binding_callbacks", "bubble", "changed",
    "check_outros", "Component", "create_bidirectional_transition", "create_component",
    "create_in_transition", "create_out_transition", "create_slot", "ctx", "current",
    "destroy_block", "destroy_component", "detach", "detaching", "dispatch_dev", "each", "element",
    "empty", "escape", "extend_changed", "file", "group_outros", "handle_promise", "HtmlTag",
    "init", "insert", "is_promise", "key", "listen", "local", "mount_component", "new_ctx", "noop",
    "once", "options", "outro_and_destroy_block", "prevent_default", "safe_not_equal", "self",
    "set_data", "set_input_value", "space", "stop_propagation", "svg_element", "target", "text",
    "to_number", "toggle_class", "transition_in", "transition_out", "update_await_block_branch",
    "update_keyed_each", "validate_component", "validate_each_keys",
];

/// Optional diagnostic counters for one compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileStats {
    pub nodes: usize,
    pub expressions: usize,
    pub scopes: usize,
    pub bindings: usize,
    pub reactive_statements: usize,
    pub blocks: usize,
}

pub struct CompileSession {
    pub options: CompileOptions,
    pub diagnostics: Diagnostics,
    pub stats: CompileStats,
    index: LineIndex,
    reserved: HashSet<String>,
    counters: HashMap<String, usize>,
}

impl CompileSession {
    pub fn new(source: &str, options: &CompileOptions) -> Self {
        CompileSession {
            options: options.clone(),
            diagnostics: Diagnostics::new(),
            stats: CompileStats::default(),
            index: LineIndex::new(source),
            reserved: RESERVED.iter().map(|s| s.to_string()).collect(),
            counters: HashMap::new(),
        }
    }

    pub fn filename(&self) -> &str {
        self.options.filename()
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.index
    }

    /// Attach line, column, file and frame to a diagnostic.
    pub fn locate(&self, diagnostic: CompilerError) -> CompilerError {
        diagnostic.locate(&self.index, self.options.filename())
    }

    /// Record a diagnostic. Warnings are mirrored to the log.
    pub fn report(&mut self, diagnostic: CompilerError) {
        let diagnostic = self.locate(diagnostic);
        if !diagnostic.is_fatal() {
            tracing::warn!(
                code = %diagnostic.code,
                line = diagnostic.line,
                column = diagnostic.column,
                "{}",
                diagnostic.message
            );
        }
        self.diagnostics.push(diagnostic);
    }

    /// A binding error: fatal under `strict`, a warning otherwise.
    pub fn report_binding(&mut self, diagnostic: CompilerError) {
        if self.options.strict {
            self.report(diagnostic);
        } else {
            self.report(diagnostic.as_warning());
        }
    }

    /// Consume the session into a failure carrying `error` and every
    /// diagnostic collected so far.
    pub fn fail(mut self, errors: Vec<CompilerError>) -> Diagnostics {
        for error in errors {
            let error = self.locate(error);
            self.diagnostics.push(error);
        }
        self.diagnostics
    }

    /// Keep user-visible names out of the generated-name space.
    pub fn reserve(&mut self, name: &str) {
        self.reserved.insert(name.to_string());
    }

    /// A fresh identifier derived from `base`. The first request for a base
    /// gets the bare name when it is free, later ones get `_1`, `_2`, ...
    pub fn unique(&mut self, base: &str) -> String {
        let base = sanitize(base);
        loop {
            let count = self.counters.entry(base.clone()).or_insert(0);
            let candidate = if *count == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, count)
            };
            *count += 1;
            if self.reserved.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn sanitize(base: &str) -> String {
    let mut out: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{ERR_UNRESOLVED_IDENTIFIER, Severity};

    #[test]
    fn test_unique_names_skip_reserved() {
        let mut session = CompileSession::new("", &CompileOptions::default());
        session.reserve("div");
        assert_eq!(session.unique("div"), "div_1");
        assert_eq!(session.unique("div"), "div_2");
        assert_eq!(session.unique("span"), "span");
        assert_eq!(session.unique("font-face"), "font_face");
        assert_eq!(session.unique("text"), "text_1");
    }

    #[test]
    fn test_binding_errors_follow_strict() {
        let err = || CompilerError::binding(ERR_UNRESOLVED_IDENTIFIER, "`x` is not defined", 0);

        let mut lenient = CompileSession::new("x", &CompileOptions::default());
        lenient.report_binding(err());
        assert_eq!(lenient.diagnostics.warnings[0].severity, Severity::Warning);
        assert!(!lenient.diagnostics.has_errors());

        let mut strict = CompileSession::new("x", &CompileOptions::default().strict(true));
        strict.report_binding(err());
        assert!(strict.diagnostics.has_errors());
        assert_eq!(strict.diagnostics.errors[0].line, 1);
    }
}
