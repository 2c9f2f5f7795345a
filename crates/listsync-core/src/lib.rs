// # listsync-core
//
// Core library for declarative management of account-level list items.
//
// ## Architecture Overview
//
// - **ItemPayload**: Exactly one validated variant (IP, ASN, hostname, redirect)
// - **validate**: Item kind vs. list kind compatibility, checked before any mutation
// - **ListApi**: Trait for the remote list-management service
// - **Resolver**: Existence by identifier, identity by content
// - **Reconciler**: Create/read/update/delete orchestration with deadlines and cancellation
// - **StateStore**: Tracked identifiers and last-applied attributes across passes
// - **ApiRegistry**: Plugin-based registry for clients and state stores
//
// ## Design Principles
//
// 1. **Validate First**: A kind mismatch never reaches the remote service
// 2. **Idempotency**: Existing records are found by content before anything is created
// 3. **No Hidden Retries**: A call that times out is abandoned and reported
// 4. **Plugin-Based**: Clients are registered dynamically, no hard-coded if-else
// 5. **Library-First**: All core functionality can be used as a library

pub mod config;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod traits;
pub mod validate;

// Re-export core types for convenience
pub use config::{EngineConfig, ItemConfig, ProviderConfig, StateStoreConfig, SyncConfig};
pub use error::{Error, ErrorKind, Result};
pub use model::{DesiredItem, ItemPayload, List, ListItem, ListKind};
pub use reconciler::{
    Action, Applied, CancelHandle, Drift, PassReport, PlanReport, ReconcileEvent,
    ReconcileOutcome, Reconciler,
};
pub use registry::ApiRegistry;
pub use resolver::Existence;
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{ApplyOutcome, ItemState, Lifecycle, ListApi, OperationStatus, StateStore};
