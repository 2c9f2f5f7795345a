//! Core traits for listsync
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ListApi`]: The remote list-management service
//! - [`StateStore`]: Tracked item state across passes

pub mod list_api;
pub mod state_store;

pub use list_api::{ApplyOutcome, ListApi, ListApiFactory, OperationStatus};
pub use state_store::{ItemState, Lifecycle, StateStore, StateStoreFactory};
