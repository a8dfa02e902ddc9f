//! Statement templating boundary

use crate::error::{RuntimeError, RuntimeResult};
use cascade_core::tree;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

/// Expands literal statement text with the call arguments before dispatch
pub trait StatementTemplate: Send + Sync {
    fn render(&self, text: &str, args: &JsonValue) -> RuntimeResult<String>;
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_$][A-Za-z0-9_$.]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Built-in renderer replacing `{{ path }}` with the value found at `path`.
///
/// Strings are inserted verbatim, other values as JSON, missing values as
/// nothing. In strict mode a missing value is an error instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderTemplate {
    strict: bool,
}

impl PlaceholderTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl StatementTemplate for PlaceholderTemplate {
    fn render(&self, text: &str, args: &JsonValue) -> RuntimeResult<String> {
        if !text.contains("{{") {
            return Ok(text.to_string());
        }

        let mut missing: Option<String> = None;
        let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
            match tree::get(args, &caps[1]) {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Null) | None => {
                    if missing.is_none() {
                        missing = Some(caps[1].to_string());
                    }
                    String::new()
                }
                Some(other) => other.to_string(),
            }
        });

        match missing {
            Some(path) if self.strict => {
                Err(RuntimeError::template(format!("no value for '{}' in statement template", path)))
            }
            _ => Ok(rendered.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_placeholders() {
        let args = json!({"table": "units", "limit": 10, "__context": {"org": 5}});
        let text = "select * from {{ table }} where org = {{__context.org}} limit {{limit}}";
        assert_eq!(
            PlaceholderTemplate::new().render(text, &args).unwrap(),
            "select * from units where org = 5 limit 10"
        );
    }

    #[test]
    fn missing_values() {
        let args = json!({});
        assert_eq!(PlaceholderTemplate::new().render("a{{x}}b", &args).unwrap(), "ab");
        let err = PlaceholderTemplate::strict().render("a{{x}}b", &args).unwrap_err();
        assert!(matches!(err, RuntimeError::Template(_)));
        assert_eq!(PlaceholderTemplate::strict().render("plain", &args).unwrap(), "plain");
    }
}
