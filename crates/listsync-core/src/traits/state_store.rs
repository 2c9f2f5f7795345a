// # State Store Trait
//
// Defines the interface for tracked item state.
//
// ## Purpose
//
// The state store remembers, per declared item:
// - The server-assigned item identifier
// - The comment and payload last applied
// - The lifecycle phase the item was last seen in
//
// Knowing the identifier lets the reconciler read by id instead of searching
// by content, and lets a later pass delete items whose declaration was removed.
//
// ## Implementations
//
// - `MemoryStateStore`: in-process only
// - `FileStateStore`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{DesiredItem, ItemPayload, ListItem};

/// Lifecycle phase of a tracked item
///
/// `Absent → Creating → Present → Updating → Present → Deleting → Absent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Absent,
    Creating,
    Present,
    Updating,
    Deleting,
}

/// Tracked state of one declared item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub account_id: String,
    pub list_id: String,
    /// Server-assigned identifier, `None` until a create is confirmed
    pub item_id: Option<String>,
    pub comment: Option<String>,
    pub payload: ItemPayload,
    pub phase: Lifecycle,
    /// Timestamp of the last successful reconciliation step
    pub last_reconciled: chrono::DateTime<chrono::Utc>,
}

impl ItemState {
    /// State mirroring a remote record
    pub(crate) fn present(account_id: &str, list_id: &str, item: &ListItem) -> Self {
        Self {
            account_id: account_id.to_string(),
            list_id: list_id.to_string(),
            item_id: Some(item.id.clone()),
            comment: item.comment.clone(),
            payload: item.payload.clone(),
            phase: Lifecycle::Present,
            last_reconciled: chrono::Utc::now(),
        }
    }

    /// Whether the state belongs to the same list as the desired item
    pub fn same_list(&self, desired: &DesiredItem) -> bool {
        self.account_id == desired.account_id && self.list_id == desired.list_id
    }
}

/// Trait for state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
/// Distinct items are reconciled in parallel and write distinct keys.
///
/// ## Implementation Guidelines
///
/// - **Async I/O only**: Use async file/database operations, never blocking I/O
/// - **Explicit flush**: `flush()` must persist all pending changes
/// - **No business logic**: deciding what to create or delete belongs to `Reconciler`
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the tracked state for an item
    ///
    /// - `Ok(Some(ItemState))`: tracked
    /// - `Ok(None)`: never reconciled (or dropped)
    async fn get(&self, name: &str) -> Result<Option<ItemState>, crate::Error>;

    /// Create or replace the tracked state for an item
    async fn set(&self, name: &str, state: &ItemState) -> Result<(), crate::Error>;

    /// Stop tracking an item
    ///
    /// Removing an untracked item is success.
    async fn delete(&self, name: &str) -> Result<(), crate::Error>;

    /// List all tracked item names
    async fn list(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing state stores from configuration
#[async_trait]
pub trait StateStoreFactory: Send + Sync {
    /// Create a StateStore instance from configuration
    ///
    /// `config` is the serialized [`crate::config::StateStoreConfig`].
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn StateStore>, crate::Error>;
}
