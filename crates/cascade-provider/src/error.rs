//! Error types for providers and the provider registry

use thiserror::Error;

/// Boxed backend error kept as the source of provider failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection to provider '{provider}' failed: {message}")]
    Connection {
        provider: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Execution failed on provider '{provider}': {message}")]
    Execution {
        provider: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Provider '{provider}' does not support {operation}")]
    Unsupported { provider: String, operation: &'static str },

    #[error("Provider '{0}' is not registered")]
    NotFound(String),
}

impl ProviderError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection { provider: provider.into(), message: message.into(), source: None }
    }

    pub fn connection_with_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn execution(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution { provider: provider.into(), message: message.into(), source: None }
    }

    pub fn execution_with_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Execution {
            provider: provider.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn unsupported(provider: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported { provider: provider.into(), operation }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
