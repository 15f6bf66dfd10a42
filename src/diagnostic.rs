//! Diagnostics for the weave compiler.
//!
//! Every parser, binder and analysis failure is a [`CompilerError`] carrying
//! `{code, message, offset, line, column}` plus a rendered source frame.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_UNEXPECTED_EOF: &str = "unexpected-eof";
pub const ERR_UNCLOSED_ELEMENT: &str = "unclosed-element";
pub const ERR_UNCLOSED_BLOCK: &str = "unclosed-block";
pub const ERR_UNCLOSED_SCRIPT: &str = "unclosed-script";
pub const ERR_UNCLOSED_STYLE: &str = "unclosed-style";
pub const ERR_UNCLOSED_COMMENT: &str = "unclosed-comment";
pub const ERR_INVALID_CLOSING_TAG: &str = "invalid-closing-tag";
pub const ERR_VOID_CLOSING_TAG: &str = "void-element-closing-tag";
pub const ERR_UNEXPECTED_BLOCK_CLOSE: &str = "unexpected-block-close";
pub const ERR_INVALID_BLOCK_CONTINUATION: &str = "invalid-block-continuation";
pub const ERR_UNKNOWN_BLOCK: &str = "unknown-block";
pub const ERR_DUPLICATE_SCRIPT: &str = "duplicate-script";
pub const ERR_DUPLICATE_STYLE: &str = "duplicate-style";
pub const ERR_INVALID_DIRECTIVE: &str = "invalid-directive";
pub const ERR_DUPLICATE_ATTRIBUTE: &str = "duplicate-attribute";
pub const ERR_INVALID_EXPRESSION: &str = "invalid-expression";
pub const ERR_INVALID_EVENT_HANDLER: &str = "invalid-event-handler";
pub const ERR_INVALID_EACH_CONTEXT: &str = "invalid-each-context";
pub const ERR_INVALID_DEBUG_ARGS: &str = "invalid-debug-args";
pub const ERR_SCRIPT_SYNTAX: &str = "script-syntax";
pub const ERR_UNRESOLVED_IDENTIFIER: &str = "unresolved-identifier";
pub const ERR_ILLEGAL_REDECLARATION: &str = "illegal-redeclaration";
pub const ERR_INVALID_BINDING: &str = "invalid-binding";
pub const ERR_INVALID_TEMPLATE_ASSIGNMENT: &str = "invalid-template-assignment";
pub const ERR_RESERVED_NAME: &str = "reserved-name";
pub const ERR_DEPENDENCY_CYCLE: &str = "dependency-cycle";
pub const ERR_CSS_SYNTAX: &str = "css-syntax";
pub const ERR_CSS_REF_SELECTOR: &str = "css-removed-ref-selector";
pub const ERR_CSS_EMPTY_DECLARATION: &str = "css-empty-declaration";
pub const WARN_CSS_UNUSED_SELECTOR: &str = "css-unused-selector";
pub const WARN_MODULE_SCRIPT_REACTIVE: &str = "module-script-reactive";
pub const ERR_MISSING_COMPONENT: &str = "missing-component";
pub const ERR_INVALID_SLOT: &str = "invalid-slot";
pub const ERR_INVALID_OPTIONS: &str = "invalid-options";
pub const ERR_INTERNAL: &str = "internal-invariant";

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR KINDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error taxonomy. Every diagnostic belongs to exactly one kind.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    #[error("SyntaxError")]
    Syntax,
    #[error("BindingError")]
    Binding,
    #[error("DependencyCycleError")]
    DependencyCycle,
    #[error("StyleError")]
    Style,
    #[error("InternalError")]
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind} [{code}] {message} ({file}:{line}:{column})")]
pub struct CompilerError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    /// Byte offset into the component source.
    pub offset: usize,
    pub line: u32,
    pub column: u32,
    pub file: String,
    pub frame: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(kind: ErrorKind, code: &str, message: impl Into<String>, offset: usize) -> Self {
        CompilerError {
            kind,
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            offset,
            line: 0,
            column: 0,
            file: String::new(),
            frame: None,
            hints: vec![],
        }
    }

    pub fn syntax(code: &str, message: impl Into<String>, offset: usize) -> Self {
        Self::new(ErrorKind::Syntax, code, message, offset)
    }

    pub fn binding(code: &str, message: impl Into<String>, offset: usize) -> Self {
        Self::new(ErrorKind::Binding, code, message, offset)
    }

    pub fn style(code: &str, message: impl Into<String>, offset: usize) -> Self {
        Self::new(ErrorKind::Style, code, message, offset)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, ERR_INTERNAL, message, 0)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn as_warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Fill in line, column, file and frame from the source text.
    pub fn locate(mut self, index: &LineIndex, file: &str) -> Self {
        let (line, column) = index.line_column(self.offset);
        self.line = line;
        self.column = column;
        self.file = file.to_string();
        self.frame = Some(index.frame(line, column));
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// The failure value of a compile: at least one fatal error, plus any warnings
/// collected before compilation stopped.
#[derive(Error, Debug, Clone, Default, Serialize, Deserialize)]
#[error("compilation failed with {} error(s)", .errors.len())]
pub struct Diagnostics {
    pub errors: Vec<CompilerError>,
    pub warnings: Vec<CompilerError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: CompilerError) {
        if diagnostic.is_fatal() {
            self.errors.push(diagnostic);
        } else {
            self.warnings.push(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn codes(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.code.as_str()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINE INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Maps byte offsets to 1-based line/column pairs (columns count characters).
#[derive(Debug, Clone)]
pub struct LineIndex {
    lines: Vec<String>,
    /// Byte offset at which each line starts.
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                starts.push(i + 1);
            }
        }
        LineIndex {
            lines: source.split('\n').map(|l| l.to_string()).collect(),
            starts,
        }
    }

    pub fn line_column(&self, offset: usize) -> (u32, u32) {
        let line = match self.starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next.saturating_sub(1),
        };
        let text = &self.lines[line];
        let mut within = (offset - self.starts[line]).min(text.len());
        while !text.is_char_boundary(within) {
            within -= 1;
        }
        let column = text[..within].chars().count();
        (line as u32 + 1, column as u32 + 1)
    }

    /// Render the offending line with two lines of context and a caret.
    pub fn frame(&self, line: u32, column: u32) -> String {
        let line_idx = (line as usize).saturating_sub(1);
        let first = line_idx.saturating_sub(2);
        let last = (line_idx + 1).min(self.lines.len().saturating_sub(1));
        let width = (last + 1).to_string().len();

        let mut out = String::new();
        for i in first..=last {
            let Some(text) = self.lines.get(i) else {
                break;
            };
            out.push_str(&format!("{:>width$}: {}\n", i + 1, text.replace('\t', "  ")));
            if i == line_idx {
                let pad = width + 2 + (column as usize).saturating_sub(1);
                out.push_str(&" ".repeat(pad));
                out.push_str("^\n");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.line_column(0), (1, 1));
        assert_eq!(index.line_column(1), (1, 2));
        assert_eq!(index.line_column(3), (2, 1));
        assert_eq!(index.line_column(6), (3, 1));
        assert_eq!(index.line_column(8), (4, 2));
    }

    #[test]
    fn test_frame_points_at_column() {
        let index = LineIndex::new("<div>\n  {oops\n</div>");
        let frame = index.frame(2, 3);
        assert!(frame.contains("2:   {oops"));
        assert!(frame.lines().any(|l| l.trim() == "^"));
    }

    #[test]
    fn test_locate_sets_position() {
        let index = LineIndex::new("a\nbc");
        let err = CompilerError::syntax(ERR_UNEXPECTED_EOF, "Unexpected end of input", 3)
            .locate(&index, "App.weave");
        assert_eq!((err.line, err.column), (2, 2));
        assert_eq!(err.file, "App.weave");
        assert!(err.to_string().contains("SyntaxError [unexpected-eof]"));
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(CompilerError::binding(ERR_UNRESOLVED_IDENTIFIER, "x", 0).as_warning());
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warnings.len(), 1);
    }
}
