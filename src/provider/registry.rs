//! Provider lookup by resource type name.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::command::CommandRunner;
use crate::config::StackSettings;
use crate::error::ReconcileError;

use super::{
    Capabilities, CommandProvider, ResourceProvider, StaticWebsiteProvider, WebsiteContentProvider,
};

/// Maps resource type names to providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in providers.
    #[must_use]
    pub fn builtin(settings: &StackSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommandProvider::new(settings, Arc::clone(&runner))));
        registry.register(Arc::new(StaticWebsiteProvider::new(settings, Arc::clone(&runner))));
        registry.register(Arc::new(WebsiteContentProvider::new(settings, runner)));
        registry
    }

    /// Registers a provider under its type name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) {
        let type_name = provider.type_name().to_string();
        debug!("Registering provider for {type_name}");
        self.providers.insert(type_name, provider);
    }

    /// Looks up the provider for a type.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn ResourceProvider>> {
        self.providers.get(type_name).cloned()
    }

    /// Looks up the provider for a type, failing when none is registered.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownResourceType`].
    pub fn require(&self, type_name: &str) -> Result<Arc<dyn ResourceProvider>, ReconcileError> {
        self.get(type_name)
            .ok_or_else(|| ReconcileError::UnknownResourceType {
                type_name: type_name.to_string(),
            })
    }

    /// Returns registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Returns every registered type with its capabilities.
    #[must_use]
    pub fn describe(&self) -> Vec<(&str, Capabilities)> {
        self.providers
            .iter()
            .map(|(name, provider)| (name.as_str(), provider.capabilities()))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandExecutor;
    use crate::provider::{COMMAND_TYPE, STATIC_WEBSITE_TYPE, WEBSITE_CONTENT_TYPE};

    #[test]
    fn test_builtin_registry() {
        let settings = StackSettings::new("demo02", "dev");
        let registry = ProviderRegistry::builtin(&settings, Arc::new(CommandExecutor::new()));

        assert_eq!(
            registry.type_names(),
            vec![STATIC_WEBSITE_TYPE, WEBSITE_CONTENT_TYPE, COMMAND_TYPE]
        );
        assert!(registry.get(COMMAND_TYPE).is_some());
        assert!(matches!(
            registry.require("nope:Nope"),
            Err(ReconcileError::UnknownResourceType { .. })
        ));
    }
}
