//! Provider registry injected into the executor

use crate::error::{ProviderError, ProviderResult};
use crate::provider::Provider;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named provider instances available to actions
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its configured name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        let name = provider.name().to_string();
        tracing::debug!(provider = %name, kind = %provider.kind(), "Registered provider");
        self.providers.insert(name, provider)
    }

    /// Builder style registration
    pub fn with(mut self, provider: impl Provider + 'static) -> Self {
        self.register(Arc::new(provider));
        self
    }

    pub fn get(&self, name: &str) -> ProviderResult<Arc<dyn Provider>> {
        self.providers.get(name).cloned().ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.names()).finish()
    }
}
