//! `${VAR}` / `${VAR:default}` substitution in provider configuration

use regex::{Captures, Regex};
use serde_json::{Map, Value as JsonValue};
use std::env;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvResolverError {
    #[error("Environment variable '{0}' not found and no default provided")]
    VarNotFound(String),
    #[error("Environment variable '{0}' is not in whitelist. Allowed prefixes: {1:?}")]
    VarNotWhitelisted(String, Vec<String>),
    #[error("Recursive variable reference detected in '{0}'")]
    RecursiveReference(String),
}

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").expect("variable pattern is valid")
});

/// Resolves environment references, restricted to a set of name prefixes
#[derive(Debug, Clone)]
pub struct EnvResolver {
    /// Empty means every variable may be referenced
    allowed_prefixes: Vec<String>,
    /// Substitution passes allowed for values that reference other variables
    max_depth: usize,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(
            ["CASCADE_", "APP_", "DB_", "PG_", "LOG_"].iter().map(|p| p.to_string()).collect(),
        )
    }
}

impl EnvResolver {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes, max_depth: 10 }
    }

    pub fn unrestricted() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Resolve every string inside `value`.
    ///
    /// A string that is exactly one reference takes the type of the resolved
    /// text (`true`, `42`, `{"a":1}`); embedded references stay strings.
    pub fn resolve(&self, value: &JsonValue) -> Result<JsonValue, EnvResolverError> {
        match value {
            JsonValue::String(s) => self.resolve_string(s),
            JsonValue::Object(obj) => obj
                .iter()
                .map(|(key, val)| Ok((key.clone(), self.resolve(val)?)))
                .collect::<Result<Map<_, _>, _>>()
                .map(JsonValue::Object),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            other => Ok(other.clone()),
        }
    }

    /// Check references without reading the environment
    pub fn validate_all_vars(&self, value: &JsonValue) -> Result<(), EnvResolverError> {
        match value {
            JsonValue::String(s) => {
                VARIABLE.captures_iter(s).try_for_each(|caps| self.validate_var_name(&caps[1]))
            }
            JsonValue::Object(obj) => obj.values().try_for_each(|v| self.validate_all_vars(v)),
            JsonValue::Array(items) => items.iter().try_for_each(|v| self.validate_all_vars(v)),
            _ => Ok(()),
        }
    }

    fn resolve_string(&self, input: &str) -> Result<JsonValue, EnvResolverError> {
        if !input.contains("${") {
            return Ok(JsonValue::String(input.to_string()));
        }

        let whole_reference = VARIABLE
            .find(input)
            .is_some_and(|m| m.start() == 0 && m.end() == input.len());

        let mut current = input.to_string();
        for _ in 0..self.max_depth {
            if !VARIABLE.is_match(&current) {
                break;
            }
            current = self.substitute(&current)?;
        }
        if VARIABLE.is_match(&current) {
            return Err(EnvResolverError::RecursiveReference(input.to_string()));
        }

        if whole_reference {
            Ok(typed(current))
        } else {
            Ok(JsonValue::String(current))
        }
    }

    /// One substitution pass over `text`
    fn substitute(&self, text: &str) -> Result<String, EnvResolverError> {
        let mut failure = None;
        let replaced = VARIABLE.replace_all(text, |caps: &Captures<'_>| {
            match self.lookup(&caps[1], caps.get(2).map(|m| m.as_str())) {
                Ok(value) => value,
                Err(err) => {
                    failure.get_or_insert(err);
                    String::new()
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(replaced.into_owned()),
        }
    }

    fn lookup(&self, name: &str, default: Option<&str>) -> Result<String, EnvResolverError> {
        self.validate_var_name(name)?;
        match (env::var(name), default) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(default)) => Ok(default.to_string()),
            (Err(_), None) => Err(EnvResolverError::VarNotFound(name.to_string())),
        }
    }

    fn validate_var_name(&self, name: &str) -> Result<(), EnvResolverError> {
        if self.allowed_prefixes.is_empty()
            || self.allowed_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
        {
            return Ok(());
        }
        Err(EnvResolverError::VarNotWhitelisted(name.to_string(), self.allowed_prefixes.clone()))
    }
}

/// Interpret resolved text as JSON structure or a scalar when it looks like one
fn typed(text: String) -> JsonValue {
    if text.starts_with('{') || text.starts_with('[') || text.starts_with('"') {
        return serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
    }
    if let Ok(b) = text.parse::<bool>() {
        return JsonValue::Bool(b);
    }
    if let Ok(i) = text.parse::<i64>() {
        return JsonValue::from(i);
    }
    match text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) => JsonValue::Number(n),
        None => JsonValue::String(text),
    }
}
