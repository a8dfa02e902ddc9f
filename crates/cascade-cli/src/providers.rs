//! Provider construction from manifest entries

use crate::error::{CliError, CliResult};
use cascade_provider::{
    Provider, ProviderConfig, ProviderRegistry, ScriptCall, ScriptProvider, StubProvider,
    SCRIPT_KIND, STUB_KIND,
};
use serde_json::json;
use std::sync::Arc;

/// Provider types this binary can build
pub fn supported_kinds() -> Vec<&'static str> {
    let mut kinds = vec![STUB_KIND, SCRIPT_KIND];
    #[cfg(feature = "postgresql")]
    kinds.push(cascade_provider::POSTGRES_KIND);
    kinds
}

/// Build one provider from its configuration
pub fn build_provider(config: &ProviderConfig) -> CliResult<Arc<dyn Provider>> {
    match config.kind.as_str() {
        STUB_KIND => Ok(Arc::new(StubProvider::with_config(config.clone()))),
        SCRIPT_KIND => Ok(Arc::new(builtin_scripts(config.clone()))),
        #[cfg(feature = "postgresql")]
        cascade_provider::POSTGRES_KIND => {
            Ok(Arc::new(cascade_provider::PostgresProvider::new(config.clone())?))
        }
        other => Err(CliError::InvalidArgument(format!(
            "provider '{}' has unsupported type '{}' (supported: {})",
            config.name,
            other,
            supported_kinds().join(", ")
        ))),
    }
}

pub fn build_registry(configs: &[ProviderConfig]) -> CliResult<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for config in configs {
        registry.register(build_provider(config)?);
        tracing::debug!(provider = %config.name, kind = %config.kind, "Provider registered");
    }
    Ok(registry)
}

/// Script handlers available from the command line
fn builtin_scripts(config: ProviderConfig) -> ScriptProvider {
    ScriptProvider::with_config(config)
        .handler("echo", |call: ScriptCall| async move { Ok(call.params) })
        .handler("context", |call: ScriptCall| async move { Ok(call.context) })
        .handler("now", |_call: ScriptCall| async move {
            let epoch_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .map_err(anyhow::Error::from);
            epoch_ms.map(|ms| json!({"epoch_ms": ms}))
        })
}
