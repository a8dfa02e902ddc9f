//! Redaction of sensitive values before arguments or session data reach the logs

use serde_json::{Map, Value as JsonValue};

/// Field names that are always redacted
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "private_key",
    "authorization",
    "credentials",
];

/// Suffixes that mark a field as sensitive (case-insensitive)
const SENSITIVE_SUFFIXES: &[&str] = &["_password", "_secret", "_token", "_key"];

const REDACTED: &str = "***REDACTED***";

/// Check if a field name indicates sensitive data
pub fn is_sensitive_field(field_name: &str) -> bool {
    let lower = field_name.to_lowercase();
    SENSITIVE_FIELDS.iter().any(|&f| lower == f)
        || SENSITIVE_SUFFIXES.iter().any(|&s| lower.ends_with(s))
}

/// Copy of `value` with every sensitive field replaced by a placeholder
pub fn redact_json_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let redacted: Map<String, JsonValue> = map
                .iter()
                .map(|(key, val)| {
                    let val = match val {
                        JsonValue::Object(_) | JsonValue::Array(_) => redact_json_value(val),
                        JsonValue::Null => JsonValue::Null,
                        _ if is_sensitive_field(key) => JsonValue::String(REDACTED.to_string()),
                        other => other.clone(),
                    };
                    (key.clone(), val)
                })
                .collect();
            JsonValue::Object(redacted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(redact_json_value).collect()),
        other => other.clone(),
    }
}
