use serde::{Deserialize, Serialize};

use crate::diagnostic::{CompilerError, ErrorKind, ERR_INVALID_OPTIONS};

/// Output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Generate {
    /// Interactive program with create/mount/patch/destroy blocks.
    #[default]
    Dom,
    /// Non-interactive string rendering.
    Ssr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub filename: Option<String>,
    /// Generated component class name.
    pub name: Option<String>,
    /// Unresolved identifiers are fatal instead of warnings.
    pub strict: bool,
    /// Emit development-only diagnostics.
    pub dev: bool,
    pub generate: Generate,
    /// Inject the scoped stylesheet from the generated program.
    pub css: bool,
    /// Import path of the runtime helpers.
    pub runtime: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            filename: None,
            name: None,
            strict: false,
            dev: false,
            generate: Generate::Dom,
            css: true,
            runtime: "weave/internal".to_string(),
        }
    }
}

impl CompileOptions {
    pub fn from_json(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::new(
                ErrorKind::Internal,
                ERR_INVALID_OPTIONS,
                format!("Invalid compile options: {}", e),
                0,
            )
        })
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    pub fn generate(mut self, generate: Generate) -> Self {
        self.generate = generate;
        self
    }

    pub fn filename(&self) -> &str {
        self.filename.as_deref().unwrap_or("Component.weave")
    }

    /// Class name for the generated component: explicit `name`, else the
    /// capitalised filename stem, else `Component`.
    pub fn component_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let stem = self
            .filename
            .as_deref()
            .and_then(|f| f.rsplit(['/', '\\']).next())
            .map(|f| f.split('.').next().unwrap_or(f))
            .unwrap_or("");
        let cleaned: String = stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        let mut chars = cleaned.chars();
        match chars.next() {
            Some(first) if !first.is_ascii_digit() => {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            }
            _ => "Component".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let options = CompileOptions::from_json("{}").unwrap();
        assert!(!options.strict);
        assert!(options.css);
        assert_eq!(options.generate, Generate::Dom);
        assert_eq!(options.runtime, "weave/internal");
    }

    #[test]
    fn test_camel_case_json() {
        let options =
            CompileOptions::from_json(r#"{"strict": true, "generate": "ssr", "filename": "a/todo-list.weave"}"#)
                .unwrap();
        assert!(options.strict);
        assert_eq!(options.generate, Generate::Ssr);
        assert_eq!(options.component_name(), "Todolist");
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let err = CompileOptions::from_json(r#"{"strict": "yes"}"#).unwrap_err();
        assert_eq!(err.code, ERR_INVALID_OPTIONS);
    }

    #[test]
    fn test_component_name_fallback() {
        assert_eq!(CompileOptions::default().component_name(), "Component");
        let options = CompileOptions {
            filename: Some("1up.weave".to_string()),
            ..Default::default()
        };
        assert_eq!(options.component_name(), "Component");
    }
}
