// # List API Trait
//
// Defines the interface to the remote list-management service.
//
// ## Implementations
//
// - Cloudflare account lists: `listsync-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use listsync_core::ListApi;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let api = /* ListApi implementation */;
//
//     let list = api.get_list("account", "list-id").await?;
//     println!("list {} holds {} items", list.name, list.kind);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::model::{ItemPatch, List, ListItem, NewItem};

/// Result of a mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome<T> {
    /// The change is visible and its result is known
    Applied(T),
    /// The remote service accepted the change and is applying it asynchronously
    Pending {
        /// Identifier to poll with [`ListApi::get_operation`]
        operation_id: String,
    },
}

/// State of an asynchronous remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed {
        /// Failure reported by the remote service
        error: String,
    },
}

/// Trait for list API implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks;
/// the reconciler shares one client between concurrently reconciled items.
///
/// # Responsibilities
///
/// Clients perform single-shot API calls and translate responses. They do not:
/// - retry or back off (transport policy lives below this trait)
/// - poll asynchronous operations (owned by `Reconciler`)
/// - decide whether an item needs to change (owned by `Reconciler`)
/// - cache remote state between calls
///
/// # Errors
///
/// - Absent records map to [`crate::Error::NotFound`]
/// - Network, authentication and rate-limit failures map to [`crate::Error::Transport`]
/// - Remote validation failures map through [`crate::Error::rejected`]
#[async_trait]
pub trait ListApi: Send + Sync {
    /// Fetch list metadata, including its declared kind
    async fn get_list(&self, account_id: &str, list_id: &str) -> Result<List, crate::Error>;

    /// Add an item to a list
    async fn create_item(
        &self,
        account_id: &str,
        list_id: &str,
        item: &NewItem,
    ) -> Result<ApplyOutcome<ListItem>, crate::Error>;

    /// Fetch one item by its server-assigned identifier
    ///
    /// Must return [`crate::Error::NotFound`] when the item is absent.
    async fn get_item(
        &self,
        account_id: &str,
        list_id: &str,
        item_id: &str,
    ) -> Result<ListItem, crate::Error>;

    /// List items, optionally filtered by a content search string
    ///
    /// Implementations follow pagination and return every matching item.
    async fn list_items(
        &self,
        account_id: &str,
        list_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<ListItem>, crate::Error>;

    /// Apply a partial update to an existing item
    async fn update_item(
        &self,
        account_id: &str,
        list_id: &str,
        item_id: &str,
        patch: &ItemPatch,
    ) -> Result<ApplyOutcome<ListItem>, crate::Error>;

    /// Remove an item
    ///
    /// Removing an item that is already absent is success (or `NotFound`,
    /// which the reconciler treats as success).
    async fn delete_item(
        &self,
        account_id: &str,
        list_id: &str,
        item_id: &str,
    ) -> Result<ApplyOutcome<()>, crate::Error>;

    /// Fetch the status of an asynchronous operation
    async fn get_operation(
        &self,
        account_id: &str,
        operation_id: &str,
    ) -> Result<OperationStatus, crate::Error>;

    /// Whether [`ListApi::update_item`] can change an item's payload in place
    ///
    /// When `false`, the reconciler replaces the item instead.
    fn supports_payload_update(&self) -> bool {
        false
    }

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing list API clients from configuration
pub trait ListApiFactory: Send + Sync {
    /// Create a ListApi instance from configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn ListApi>, crate::Error>;
}
