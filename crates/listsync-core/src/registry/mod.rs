//! Plugin-based API registry
//!
//! The registry allows list API clients and state stores to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use listsync_core::registry::ApiRegistry;
//! use listsync_core::config::ProviderConfig;
//!
//! let registry = ApiRegistry::with_builtin_state_stores();
//! listsync_provider_cloudflare::register(&registry);
//!
//! let config = ProviderConfig::Cloudflare { api_token: "...".into(), base_url: None };
//! let api = registry.create_api(&config)?;
//! ```
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! // In listsync-provider-cloudflare crate
//! pub fn register(registry: &ApiRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::{ProviderConfig, StateStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileStateStoreFactory, MemoryStateStoreFactory};
use crate::traits::{ListApi, ListApiFactory, StateStore, StateStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry for plugin-based client and state store creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ApiRegistry {
    /// Registered list API factories
    providers: RwLock<HashMap<String, Box<dyn ListApiFactory>>>,

    /// Registered state store factories
    state_stores: RwLock<HashMap<String, Arc<dyn StateStoreFactory>>>,
}

fn poisoned<T>(_: T) -> Error {
    Error::Other("registry lock poisoned".to_string())
}

impl ApiRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `file` and `memory` state stores registered
    pub fn with_builtin_state_stores() -> Self {
        let registry = Self::new();
        registry.register_state_store("file", Box::new(FileStateStoreFactory));
        registry.register_state_store("memory", Box::new(MemoryStateStoreFactory));
        registry
    }

    /// Register a list API factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "cloudflare")
    /// - `factory`: Factory object for creating client instances
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn ListApiFactory>) {
        match self.providers.write() {
            Ok(mut providers) => {
                providers.insert(name.into(), factory);
            }
            Err(_) => tracing::error!("Provider registry lock poisoned, registration skipped"),
        }
    }

    /// Register a state store factory
    ///
    /// # Parameters
    ///
    /// - `name`: State store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating state store instances
    pub fn register_state_store(&self, name: impl Into<String>, factory: Box<dyn StateStoreFactory>) {
        match self.state_stores.write() {
            Ok(mut stores) => {
                stores.insert(name.into(), Arc::from(factory));
            }
            Err(_) => tracing::error!("State store registry lock poisoned, registration skipped"),
        }
    }

    /// Create a list API client from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ListApi>)`: Created client
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_api(&self, config: &ProviderConfig) -> Result<Box<dyn ListApi>> {
        let provider_type = config.type_name();
        let providers = self.providers.read().map_err(poisoned)?;

        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// Create a state store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn StateStore>)`: Created state store instance
    /// - `Err(Error)`: If store type is not registered or creation fails
    pub async fn create_state_store(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>> {
        let store_type = config.type_name();

        let factory = {
            let stores = self.state_stores.read().map_err(poisoned)?;
            stores
                .get(store_type)
                .ok_or_else(|| Error::config(format!("Unknown state store type: {}", store_type)))?
                .clone()
        };

        let config_json = serde_json::to_value(config)?;
        factory.create(&config_json).await
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        self.providers
            .read()
            .map(|providers| providers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// List all registered state store types
    pub fn list_state_stores(&self) -> Vec<String> {
        self.state_stores
            .read()
            .map(|stores| stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .map(|providers| providers.contains_key(name))
            .unwrap_or(false)
    }

    /// Check if a state store type is registered
    pub fn has_state_store(&self, name: &str) -> bool {
        self.state_stores
            .read()
            .map(|stores| stores.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockApiFactory;

    impl ListApiFactory for MockApiFactory {
        fn create(&self, _config: &ProviderConfig) -> Result<Box<dyn ListApi>> {
            Err(Error::config("Mock client not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ApiRegistry::new();

        assert!(!registry.has_provider("mock"));

        registry.register_provider("mock", Box::new(MockApiFactory));

        assert!(registry.has_provider("mock"));
        assert!(registry.list_providers().contains(&"mock".to_string()));
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let registry = ApiRegistry::new();
        let config = ProviderConfig::Cloudflare {
            api_token: "token".to_string(),
            base_url: None,
        };
        let err = registry.create_api(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_builtin_state_stores() {
        let registry = ApiRegistry::with_builtin_state_stores();
        assert!(registry.has_state_store("file"));
        assert!(registry.has_state_store("memory"));

        let store = registry
            .create_state_store(&StateStoreConfig::Memory)
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
