//! Session collaborator and the credential / context resolver built on it

use crate::config::CredentialsSource;
use crate::provider::Provider;
use cascade_core::tree;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Identity used to open a provider connection
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: Some(user.into()), password: Some(password.into()) }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Session variable pushed onto a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBinding {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub value: JsonValue,
}

/// Declaration in `context.prv` mapping a session field to a provider variable
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextDeclaration {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    /// Field under `context` holding the value
    ctx: String,
    /// Provider type the binding applies to; empty means all
    #[serde(default)]
    prv_type: Option<String>,
}

/// User session as seen by the engine
pub trait Session: Send + Sync {
    /// Value at a dot path of the session, if present
    fn get(&self, path: &str) -> Option<JsonValue>;

    /// The `context` mapping exposed to compose expressions and templates
    fn context(&self) -> JsonValue {
        self.get("context").unwrap_or_else(|| JsonValue::Object(Map::new()))
    }

    /// Credentials for `provider`: session fields when the provider asks for
    /// them, its static configuration otherwise.
    fn credentials(&self, provider: &dyn Provider) -> Credentials {
        match provider.config().credentials_source {
            CredentialsSource::Session => {
                let field = |path: &str| {
                    self.get(path).and_then(|v| v.as_str().map(str::to_string))
                };
                Credentials { user: field("context.user"), password: field("context.password") }
            }
            CredentialsSource::Config => provider.config_credentials(),
        }
    }

    /// Session variables for `provider`, filtered by its type tag
    fn provider_context(&self, provider: &dyn Provider) -> Vec<ContextBinding> {
        let Some(JsonValue::Array(entries)) = self.get("context.prv") else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                match serde_json::from_value::<ContextDeclaration>(entry.clone()) {
                    Ok(decl) => Some(decl),
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping malformed provider context entry");
                        None
                    }
                }
            })
            .filter(|decl| match decl.prv_type.as_deref() {
                None | Some("") => true,
                Some(kind) => kind == provider.kind(),
            })
            .map(|decl| ContextBinding {
                value: self.get(&format!("context.{}", decl.ctx)).unwrap_or(JsonValue::Null),
                name: decl.name,
                namespace: decl.namespace,
            })
            .collect()
    }
}

/// Session held in memory, mostly for tests and the CLI
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    data: JsonValue,
}

impl MemorySession {
    pub fn new(data: JsonValue) -> Self {
        Self { data }
    }

    /// Session whose `context` is `context`
    pub fn with_context(context: JsonValue) -> Self {
        let mut data = Map::new();
        data.insert("context".to_string(), context);
        Self { data: JsonValue::Object(data) }
    }

    pub fn set(&mut self, path: &str, value: JsonValue) -> cascade_core::CoreResult<()> {
        tree::set(&mut self.data, path, value)
    }
}

impl Session for MemorySession {
    fn get(&self, path: &str) -> Option<JsonValue> {
        tree::get(&self.data, path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::stub::StubProvider;
    use serde_json::json;

    fn provider(kind: &str, source: CredentialsSource) -> StubProvider {
        StubProvider::with_config(
            ProviderConfig::new("default", kind)
                .with_credentials_source(source)
                .with_connect_config(json!({"user": "cfg_user", "password": "cfg_pw"})),
        )
    }

    fn session() -> MemorySession {
        MemorySession::with_context(json!({
            "user": "alice",
            "password": "wonderland",
            "org": 42,
            "lang": "en",
            "prv": [
                {"name": "org", "namespace": "app", "ctx": "org", "prvType": "db-postgres"},
                {"name": "lang", "ctx": "lang"},
                {"name": "lang2", "ctx": "lang", "prvType": ""},
                {"name": "script_only", "ctx": "org", "prvType": "script"},
                {"broken": true}
            ]
        }))
    }

    #[test]
    fn credentials_from_session_or_config() {
        let session = session();

        let from_session = session.credentials(&provider("test", CredentialsSource::Session));
        assert_eq!(from_session, Credentials::new("alice", "wonderland"));

        let from_config = session.credentials(&provider("test", CredentialsSource::Config));
        assert_eq!(from_config, Credentials::new("cfg_user", "cfg_pw"));
    }

    #[test]
    fn provider_context_is_filtered_by_type() {
        let session = session();

        let pg = session.provider_context(&provider("db-postgres", CredentialsSource::Config));
        let names: Vec<&str> = pg.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["org", "lang", "lang2"]);
        assert_eq!(pg[0].namespace.as_deref(), Some("app"));
        assert_eq!(pg[0].value, json!(42));
        assert_eq!(pg[1].value, json!("en"));

        let script = session.provider_context(&provider("script", CredentialsSource::Config));
        let names: Vec<&str> = script.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["lang", "lang2", "script_only"]);
    }

    #[test]
    fn missing_context_yields_defaults() {
        let empty = MemorySession::default();
        assert_eq!(empty.context(), json!({}));
        assert!(empty
            .provider_context(&provider("test", CredentialsSource::Config))
            .is_empty());
        assert_eq!(
            empty.credentials(&provider("test", CredentialsSource::Session)),
            Credentials::default()
        );
    }

    #[test]
    fn debug_hides_password() {
        let printed = format!("{:?}", Credentials::new("bob", "hunter2"));
        assert!(printed.contains("bob"));
        assert!(!printed.contains("hunter2"));
    }
}
