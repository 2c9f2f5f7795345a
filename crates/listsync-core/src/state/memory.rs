// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Crash Behavior
//
// - All tracked state is lost on restart
// - The next pass finds existing remote items by content and adopts them,
//   so losing state does not create duplicates
//
// ## When to Use
//
// - Testing environments
// - One-shot runs where nothing needs pruning afterwards

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;

use crate::traits::state_store::{ItemState, StateStore, StateStoreFactory};
use crate::Error;

/// In-memory state store implementation
///
/// # Example
///
/// ```rust,no_run
/// use listsync_core::state::MemoryStateStore;
/// use listsync_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     assert!(store.get("office").await?.is_none());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<String, ItemState>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the number of tracked items
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Clear all tracked items
    pub async fn clear(&self) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.clear();
        Ok(())
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> Result<Option<ItemState>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(name).cloned())
    }

    async fn set(&self, name: &str, state: &ItemState) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(name.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for [`MemoryStateStore`]
pub struct MemoryStateStoreFactory;

#[async_trait]
impl StateStoreFactory for MemoryStateStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Box<dyn StateStore>, Error> {
        Ok(Box::new(MemoryStateStore::new()))
    }
}
