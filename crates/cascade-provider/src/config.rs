//! Static provider configuration

use crate::error::{ProviderError, ProviderResult};
use crate::session::Credentials;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How a provider obtains connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectType {
    /// A fresh connection per request
    #[default]
    User,
    /// One shared pool opened with the first caller's credentials
    Pool,
    /// One pool per data-source user
    PoolPerUser,
}

/// Where connection credentials come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialsSource {
    /// The user's web session
    Session,
    /// Always `connectConfig`
    #[default]
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Registry name, referenced by actions through their `provider` attribute
    pub name: String,
    /// Provider type tag (`db-postgres`, `script`, `test`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub connect_type: ConnectType,
    #[serde(default)]
    pub credentials_source: CredentialsSource,
    /// Backend specific connection settings
    #[serde(default)]
    pub connect_config: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_pool_config: Option<JsonValue>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            connect_type: ConnectType::default(),
            credentials_source: CredentialsSource::default(),
            connect_config: JsonValue::Object(Default::default()),
            connect_pool_config: None,
        }
    }

    pub fn with_connect_type(mut self, connect_type: ConnectType) -> Self {
        self.connect_type = connect_type;
        self
    }

    pub fn with_credentials_source(mut self, source: CredentialsSource) -> Self {
        self.credentials_source = source;
        self
    }

    pub fn with_connect_config(mut self, connect_config: JsonValue) -> Self {
        self.connect_config = connect_config;
        self
    }

    /// A shared pool cannot serve per-session identities.
    pub fn validate_connect(&self) -> ProviderResult<()> {
        if self.connect_type == ConnectType::Pool
            && self.credentials_source == CredentialsSource::Session
        {
            return Err(ProviderError::config(format!(
                "provider '{}': connectType = pool cannot be combined with credentialsSource = session",
                self.name
            )));
        }
        Ok(())
    }

    /// User and password from `connectConfig`
    pub fn config_credentials(&self) -> Credentials {
        let field = |name: &str| {
            self.connect_config.get(name).and_then(JsonValue::as_str).map(str::to_string)
        };
        Credentials { user: field("user"), password: field("password") }
    }
}
