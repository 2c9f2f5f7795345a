//! Configuration types for listsync
//!
//! This module defines all configuration structures used throughout the crate.

use crate::model::RawItem;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main listsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// List API provider configuration
    pub provider: ProviderConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Declared list items
    #[serde(default)]
    pub items: Vec<ItemConfig>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            provider: ProviderConfig::default(),
            state_store: StateStoreConfig::default(),
            items: Vec::new(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    ///
    /// Item payloads are validated later, per item, so one malformed item
    /// does not block the others.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()?;
        self.engine.validate()?;

        let mut seen = HashSet::new();
        for item in &self.items {
            item.validate()?;
            if !seen.insert(item.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate item name: {}",
                    item.name
                )));
            }
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// List API provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare account lists
    Cloudflare {
        /// Cloudflare API token
        api_token: String,
        /// API base URL override (tests, proxies)
        #[serde(default)]
        base_url: Option<String>,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare { api_token, .. } => {
                if api_token.is_empty() {
                    return Err(crate::Error::config("Cloudflare API token cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Cloudflare {
            api_token: String::new(),
            base_url: None,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,

    /// Custom state store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StateStoreConfig {
    /// Get the state store type name
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory => "memory",
            StateStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// A declared list item
///
/// ```json
/// {
///   "name": "office",
///   "account_id": "f037e56e89293a057740de681ac9abbe",
///   "list_id": "2c0fc9fa937b11eaa1b71c4d701ab86e",
///   "comment": "office egress",
///   "ip": "192.0.2.0/24"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Local resource name (unique within a configuration)
    pub name: String,

    /// Account that owns the list
    pub account_id: String,

    /// Identifier of the owning list
    pub list_id: String,

    /// Optional free-text comment
    #[serde(default)]
    pub comment: Option<String>,

    /// Variant fields; exactly one must be set
    #[serde(flatten)]
    pub fields: RawItem,
}

impl ItemConfig {
    /// Check the identifying fields (the payload is validated separately)
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("Item name cannot be empty"));
        }
        if self.account_id.is_empty() {
            return Err(crate::Error::config(format!(
                "Item {}: account_id cannot be empty",
                self.name
            )));
        }
        if self.list_id.is_empty() {
            return Err(crate::Error::config(format!(
                "Item {}: list_id cannot be empty",
                self.name
            )));
        }
        Ok(())
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for a single remote call (in seconds)
    ///
    /// A call that exceeds it is abandoned, not retried.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Delay between polls of an asynchronous remote operation (in milliseconds)
    #[serde(default = "default_operation_poll_interval_ms")]
    pub operation_poll_interval_ms: u64,

    /// Maximum number of polls before an operation is reported as timed out
    #[serde(default = "default_operation_max_polls")]
    pub operation_max_polls: usize,

    /// Maximum number of items reconciled concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Capacity of the reconcile event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.call_timeout_secs == 0 {
            return Err(crate::Error::config("call_timeout_secs must be > 0"));
        }
        if self.operation_max_polls == 0 {
            return Err(crate::Error::config("operation_max_polls must be > 0"));
        }
        if self.max_concurrency == 0 {
            return Err(crate::Error::config("max_concurrency must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn operation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.operation_poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            operation_poll_interval_ms: default_operation_poll_interval_ms(),
            operation_max_polls: default_operation_max_polls(),
            max_concurrency: default_max_concurrency(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_operation_poll_interval_ms() -> u64 {
    500
}

fn default_operation_max_polls() -> usize {
    60
}

fn default_max_concurrency() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_config_flattened_fields() {
        let json = serde_json::json!({
            "name": "edge",
            "account_id": "acc",
            "list_id": "l1",
            "hostname": { "url_hostname": "example.com" }
        });
        let item: ItemConfig = serde_json::from_value(json).unwrap();
        assert_eq!(item.fields.hostname.unwrap().url_hostname, "example.com");
        assert!(item.fields.ip.is_none());
        assert!(item.comment.is_none());
    }

    #[test]
    fn test_engine_defaults_applied() {
        let config: SyncConfig = serde_json::from_value(serde_json::json!({
            "provider": { "type": "cloudflare", "api_token": "t" }
        }))
        .unwrap();
        assert_eq!(config.engine.call_timeout_secs, 30);
        assert_eq!(config.engine.max_concurrency, 4);
        assert!(matches!(config.state_store, StateStoreConfig::Memory));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_item_names_rejected() {
        let item = ItemConfig {
            name: "a".to_string(),
            account_id: "acc".to_string(),
            list_id: "l1".to_string(),
            comment: None,
            fields: RawItem {
                asn: Some(1),
                ..Default::default()
            },
        };
        let config = SyncConfig {
            provider: ProviderConfig::Cloudflare {
                api_token: "t".to_string(),
                base_url: None,
            },
            items: vec![item.clone(), item],
            ..SyncConfig::new()
        };
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_empty_token_rejected() {
        let config = SyncConfig::new();
        assert!(config.validate().is_err());
    }
}
