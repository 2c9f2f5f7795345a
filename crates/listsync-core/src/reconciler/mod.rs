//! Remote reconciler
//!
//! The Reconciler is responsible for:
//! - Validating an item's kind against its list before any mutation
//! - Resolving whether the item already exists (by id, then by content)
//! - Creating, updating, replacing or deleting remote items
//! - Waiting for asynchronous remote operations to finish
//! - Emitting events for monitoring
//!
//! ## Architecture
//!
//! ```text
//!   DesiredItem + ItemState
//!            │
//!            ▼
//!    ┌───────────────┐   get_list   ┌─────────────┐
//!    │  Reconciler   │─────────────▶│   ListApi   │
//!    │ (validate,    │◀─────────────│ (one call,  │
//!    │  resolve,     │  get/list/   │  no retry)  │
//!    │  apply)       │  create/...  └─────────────┘
//!    └───────────────┘
//!            │
//!            ▼
//!   ReconcileOutcome (new ItemState)  +  ReconcileEvent stream
//! ```
//!
//! ## Failure Semantics
//!
//! - Kind mismatches fail before any remote mutation
//! - Every remote call is bounded by `call_timeout_secs` and abandoned, not
//!   retried, when it expires
//! - A tracked item the remote service reports absent is dropped from tracking
//!   and re-resolved; transport failures are surfaced instead

pub(crate) mod context;
mod pass;

pub use context::CancelHandle;
pub use pass::{PassReport, PlanReport};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, KIND_MISMATCH_PHRASE, Result};
use crate::model::{DesiredItem, ItemPatch, ItemPayload, ItemTarget, ListItem, ListKind, normalize_comment};
use crate::resolver::{Existence, Resolver};
use crate::traits::{ApplyOutcome, ItemState, Lifecycle, ListApi, OperationStatus};
use crate::validate;
use context::CallContext;

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// A pass over several items started
    PassStarted { items: usize },

    /// An item entered a lifecycle phase
    PhaseChanged { name: String, phase: Lifecycle },

    /// A tracked item differs from its declaration
    DriftDetected {
        name: String,
        item_id: String,
        drift: Drift,
    },

    /// A tracked item is gone remotely and is no longer tracked by id
    TrackingDropped { name: String, item_id: String },

    /// An item reached its declared state
    ItemReconciled { name: String, applied: Applied },

    /// Reconciling an item failed
    ItemFailed { name: String, error: String },

    /// A pass finished
    PassFinished { succeeded: usize, failed: usize },
}

/// Attributes in which a remote item differs from the declaration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Drift {
    pub comment: bool,
    pub payload: bool,
}

impl Drift {
    /// Compare declared attributes with a remote record
    pub fn between(comment: &Option<String>, payload: &ItemPayload, remote: &ListItem) -> Self {
        Self {
            comment: normalize_comment(comment.clone()) != normalize_comment(remote.comment.clone()),
            payload: !payload.matches(&remote.payload),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.comment && !self.payload
    }

    /// The update that removes this drift
    pub fn patch(&self, desired: &DesiredItem) -> ItemPatch {
        ItemPatch {
            comment: self.comment.then(|| desired.comment.clone()),
            payload: self.payload.then(|| desired.payload.clone()),
        }
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.comment, self.payload) {
            (false, false) => write!(f, "none"),
            (true, false) => write!(f, "comment"),
            (false, true) => write!(f, "payload"),
            (true, true) => write!(f, "comment, payload"),
        }
    }
}

/// What reconciling an item will do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing matches remotely; add the item
    Create,
    /// An untracked record already has this content; take it over
    Adopt { existing: ListItem, drift: Drift },
    /// Change the tracked record in place
    Update { existing: ListItem, patch: ItemPatch },
    /// The payload changed and cannot be updated in place; delete and re-add
    Replace { existing: ListItem },
    /// Already in the declared state
    Noop { existing: ListItem },
    /// The declaration moved to another list; remove the old record first
    Relocate { previous: ItemState },
}

impl Action {
    pub fn is_noop(&self) -> bool {
        matches!(self, Action::Noop { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Adopt { existing, drift } if drift.is_empty() => {
                write!(f, "adopt {}", existing.id)
            }
            Action::Adopt { existing, drift } => write!(f, "adopt {} and update {}", existing.id, drift),
            Action::Update { existing, patch } => {
                let drift = Drift {
                    comment: patch.comment.is_some(),
                    payload: patch.payload.is_some(),
                };
                write!(f, "update {} ({})", existing.id, drift)
            }
            Action::Replace { existing } => write!(f, "replace {}", existing.id),
            Action::Noop { existing } => write!(f, "keep {}", existing.id),
            Action::Relocate { previous } => write!(
                f,
                "remove from list {} and add to new list",
                previous.list_id
            ),
        }
    }
}

/// What reconciling an item did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Created { item_id: String },
    Adopted { item_id: String },
    Updated { item_id: String },
    Replaced { previous_id: String, item_id: String },
    Unchanged { item_id: String },
    Deleted { item_id: String },
    /// Nothing to delete
    AlreadyAbsent,
}

impl Applied {
    /// Whether the remote service was changed
    pub fn is_change(&self) -> bool {
        !matches!(self, Applied::Unchanged { .. } | Applied::AlreadyAbsent)
    }
}

impl fmt::Display for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Created { item_id } => write!(f, "created {}", item_id),
            Applied::Adopted { item_id } => write!(f, "adopted {}", item_id),
            Applied::Updated { item_id } => write!(f, "updated {}", item_id),
            Applied::Replaced {
                previous_id,
                item_id,
            } => write!(f, "replaced {} with {}", previous_id, item_id),
            Applied::Unchanged { item_id } => write!(f, "unchanged {}", item_id),
            Applied::Deleted { item_id } => write!(f, "deleted {}", item_id),
            Applied::AlreadyAbsent => write!(f, "already absent"),
        }
    }
}

/// Result of reconciling or deleting one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// State to track afterwards, `None` once the item is gone
    pub state: Option<ItemState>,
    pub applied: Applied,
}

/// Remote reconciler
///
/// Cloning is cheap and clones share the client, the cancellation handle,
/// the list kind cache and the event channel.
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`]
/// 2. Call [`Reconciler::reconcile()`] / [`Reconciler::delete()`] per item, or
///    [`Reconciler::reconcile_all()`] for a whole pass
/// 3. Cancel in-flight work through [`Reconciler::cancel_handle()`]
#[derive(Clone)]
pub struct Reconciler {
    /// Remote list service
    api: Arc<dyn ListApi>,

    /// Deadlines and cancellation
    ctx: CallContext,

    /// Maximum number of items reconciled at once in a pass
    max_concurrency: usize,

    /// List kinds never change after creation, so they are fetched once
    list_kinds: Arc<RwLock<HashMap<(String, String), ListKind>>>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields reconcile events
    pub fn new(
        api: Arc<dyn ListApi>,
        config: &EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let reconciler = Self {
            api,
            ctx: CallContext::new(config),
            max_concurrency: config.max_concurrency,
            list_kinds: Arc::new(RwLock::new(HashMap::new())),
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// Handle that aborts in-flight and future remote calls
    pub fn cancel_handle(&self) -> CancelHandle {
        self.ctx.cancel_handle()
    }

    pub fn provider_name(&self) -> &'static str {
        self.api.provider_name()
    }

    /// Check the item's kind against its list
    ///
    /// Runs before every mutation; a mismatch never reaches the remote service.
    pub async fn validate(&self, desired: &DesiredItem) -> Result<ListKind> {
        let key = (desired.account_id.clone(), desired.list_id.clone());
        let cached = self.list_kinds.read().await.get(&key).copied();

        let list_kind = match cached {
            Some(kind) => kind,
            None => {
                let list = self
                    .ctx
                    .call(
                        "get list",
                        self.api.get_list(&desired.account_id, &desired.list_id),
                    )
                    .await
                    .map_err(|e| Error::remote(desired.target().to_string(), e))?;
                self.list_kinds.write().await.insert(key, list.kind);
                list.kind
            }
        };

        validate::validate(desired, list_kind)?;
        Ok(list_kind)
    }

    /// Decide what reconciling would do, without changing anything remotely
    pub async fn plan(&self, desired: &DesiredItem, current: Option<&ItemState>) -> Result<Action> {
        self.validate(desired).await?;

        if let Some(previous) = current
            && !previous.same_list(desired)
        {
            return Ok(Action::Relocate {
                previous: previous.clone(),
            });
        }

        self.decide(desired, current).await
    }

    /// Bring one remote item to its declared state
    ///
    /// # Parameters
    ///
    /// - `desired`: the validated declaration
    /// - `current`: tracked state from a previous pass, if any
    ///
    /// # Returns
    ///
    /// The state to track from now on. Running it twice with the returned
    /// state is a no-op.
    pub async fn reconcile(
        &self,
        desired: &DesiredItem,
        current: Option<ItemState>,
    ) -> Result<ReconcileOutcome> {
        let result = self.reconcile_inner(desired, current).await;
        self.report(&desired.name, &result);
        result
    }

    async fn reconcile_inner(
        &self,
        desired: &DesiredItem,
        current: Option<ItemState>,
    ) -> Result<ReconcileOutcome> {
        let action = self.plan(desired, current.as_ref()).await?;

        let action = match action {
            Action::Relocate { previous } => {
                info!(
                    "{} moved from list {} to list {}",
                    desired.name, previous.list_id, desired.list_id
                );
                self.delete_inner(&desired.name, &previous).await?;
                self.decide(desired, None).await?
            }
            action => action,
        };

        self.apply(desired, action).await
    }

    /// Fetch the current remote attributes of a tracked item
    ///
    /// `Existence::Gone` means the remote service reported the item absent and
    /// the caller should stop tracking it. Other failures are errors.
    pub async fn read(&self, state: &ItemState) -> Result<Existence> {
        let resolver = Resolver::new(self.api.as_ref(), &self.ctx);
        match state.item_id.as_deref() {
            Some(item_id) => {
                resolver
                    .exists(&ItemTarget {
                        account_id: &state.account_id,
                        list_id: &state.list_id,
                        item_id: Some(item_id),
                    })
                    .await
            }
            None => Ok(resolver
                .find_by_content(&state.account_id, &state.list_id, &state.payload)
                .await?
                .map_or(Existence::Gone, Existence::Present)),
        }
    }

    /// Remove a tracked item
    ///
    /// Deleting an item that is already gone succeeds with [`Applied::AlreadyAbsent`].
    pub async fn delete(&self, name: &str, state: &ItemState) -> Result<ReconcileOutcome> {
        let result = self.delete_inner(name, state).await;
        self.report(name, &result);
        result
    }

    async fn delete_inner(&self, name: &str, state: &ItemState) -> Result<ReconcileOutcome> {
        let item_id = match &state.item_id {
            Some(item_id) => Some(item_id.clone()),
            // Creation was never confirmed; the record may still exist
            None => Resolver::new(self.api.as_ref(), &self.ctx)
                .find_by_content(&state.account_id, &state.list_id, &state.payload)
                .await?
                .map(|item| item.id),
        };

        let Some(item_id) = item_id else {
            debug!("{} has no remote record, nothing to delete", name);
            return Ok(ReconcileOutcome {
                state: None,
                applied: Applied::AlreadyAbsent,
            });
        };

        self.enter_phase(name, Lifecycle::Deleting);
        let target = ItemTarget {
            account_id: &state.account_id,
            list_id: &state.list_id,
            item_id: Some(&item_id),
        };
        let applied = if self.remove(&target).await? {
            info!("Deleted {} ({})", name, target);
            Applied::Deleted { item_id }
        } else {
            debug!("{} was already gone ({})", name, target);
            Applied::AlreadyAbsent
        };
        self.enter_phase(name, Lifecycle::Absent);

        Ok(ReconcileOutcome {
            state: None,
            applied,
        })
    }

    /// Resolve the existing record and compare it with the declaration
    async fn decide(&self, desired: &DesiredItem, current: Option<&ItemState>) -> Result<Action> {
        let resolver = Resolver::new(self.api.as_ref(), &self.ctx);

        let tracked = match current.and_then(|state| state.item_id.as_deref()) {
            Some(item_id) => {
                let target = ItemTarget {
                    account_id: &desired.account_id,
                    list_id: &desired.list_id,
                    item_id: Some(item_id),
                };
                match resolver.exists(&target).await? {
                    Existence::Present(item) => Some(item),
                    Existence::Gone => {
                        warn!("{} ({}) was removed remotely, dropping it from tracking", desired.name, target);
                        self.emit_event(ReconcileEvent::TrackingDropped {
                            name: desired.name.clone(),
                            item_id: item_id.to_string(),
                        });
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(existing) = tracked {
            let drift = Drift::between(&desired.comment, &desired.payload, &existing);
            if drift.is_empty() {
                return Ok(Action::Noop { existing });
            }

            debug!("{} drifted ({}) on {}", desired.name, drift, existing.id);
            self.emit_event(ReconcileEvent::DriftDetected {
                name: desired.name.clone(),
                item_id: existing.id.clone(),
                drift,
            });

            if drift.payload && !self.api.supports_payload_update() {
                return Ok(Action::Replace { existing });
            }
            return Ok(Action::Update {
                patch: drift.patch(desired),
                existing,
            });
        }

        match resolver
            .find_by_content(&desired.account_id, &desired.list_id, &desired.payload)
            .await?
        {
            Some(existing) => {
                let drift = Drift::between(&desired.comment, &desired.payload, &existing);
                Ok(Action::Adopt { existing, drift })
            }
            None => Ok(Action::Create),
        }
    }

    async fn apply(&self, desired: &DesiredItem, action: Action) -> Result<ReconcileOutcome> {
        let (item, applied) = match action {
            Action::Create => {
                let item = self.create(desired).await?;
                info!("Created {} as {} in list {}", desired.name, item.id, desired.list_id);
                let applied = Applied::Created {
                    item_id: item.id.clone(),
                };
                (item, applied)
            }
            Action::Adopt { existing, drift } => {
                info!("Adopting existing record {} for {}", existing.id, desired.name);
                let item = if drift.is_empty() {
                    existing
                } else {
                    self.update(desired, &existing, &drift.patch(desired)).await?
                };
                let applied = Applied::Adopted {
                    item_id: item.id.clone(),
                };
                (item, applied)
            }
            Action::Update { existing, patch } => {
                let item = self.update(desired, &existing, &patch).await?;
                info!("Updated {} ({})", desired.name, item.id);
                let applied = Applied::Updated {
                    item_id: item.id.clone(),
                };
                (item, applied)
            }
            Action::Replace { existing } => {
                let item = self.replace(desired, &existing).await?;
                info!("Replaced {} with {} for {}", existing.id, item.id, desired.name);
                let applied = Applied::Replaced {
                    previous_id: existing.id,
                    item_id: item.id.clone(),
                };
                (item, applied)
            }
            Action::Noop { existing } => {
                debug!("{} is up to date ({})", desired.name, existing.id);
                let applied = Applied::Unchanged {
                    item_id: existing.id.clone(),
                };
                (existing, applied)
            }
            Action::Relocate { .. } => {
                return Err(Error::Other(format!(
                    "{}: relocation must be resolved before applying",
                    desired.name
                )));
            }
        };

        self.enter_phase(&desired.name, Lifecycle::Present);
        Ok(ReconcileOutcome {
            state: Some(ItemState::present(&desired.account_id, &desired.list_id, &item)),
            applied,
        })
    }

    async fn create(&self, desired: &DesiredItem) -> Result<ListItem> {
        self.enter_phase(&desired.name, Lifecycle::Creating);
        let target = desired.target();

        let outcome = self
            .ctx
            .call(
                "create item",
                self.api
                    .create_item(&desired.account_id, &desired.list_id, &desired.new_item()),
            )
            .await
            .map_err(|e| Error::remote(target.to_string(), e))?;

        match outcome {
            ApplyOutcome::Applied(item) => Ok(item),
            ApplyOutcome::Pending { operation_id } => {
                self.wait_operation(&target, &operation_id).await?;
                self.await_visible(desired).await
            }
        }
    }

    async fn update(
        &self,
        desired: &DesiredItem,
        existing: &ListItem,
        patch: &ItemPatch,
    ) -> Result<ListItem> {
        self.enter_phase(&desired.name, Lifecycle::Updating);
        let target = ItemTarget {
            account_id: &desired.account_id,
            list_id: &desired.list_id,
            item_id: Some(&existing.id),
        };

        let outcome = self
            .ctx
            .call(
                "update item",
                self.api
                    .update_item(&desired.account_id, &desired.list_id, &existing.id, patch),
            )
            .await
            .map_err(|e| Error::remote(target.to_string(), e))?;

        match outcome {
            ApplyOutcome::Applied(item) => Ok(item),
            ApplyOutcome::Pending { operation_id } => {
                self.wait_operation(&target, &operation_id).await?;
                let resolver = Resolver::new(self.api.as_ref(), &self.ctx);
                match resolver.exists(&target).await? {
                    Existence::Present(item) => Ok(item),
                    // Some services re-key a record when it is rewritten
                    Existence::Gone => self.await_visible(desired).await,
                }
            }
        }
    }

    async fn replace(&self, desired: &DesiredItem, existing: &ListItem) -> Result<ListItem> {
        self.enter_phase(&desired.name, Lifecycle::Deleting);
        let target = ItemTarget {
            account_id: &desired.account_id,
            list_id: &desired.list_id,
            item_id: Some(&existing.id),
        };
        self.remove(&target).await?;

        let resolver = Resolver::new(self.api.as_ref(), &self.ctx);
        match resolver
            .find_by_content(&desired.account_id, &desired.list_id, &desired.payload)
            .await?
        {
            Some(found) => {
                let drift = Drift::between(&desired.comment, &desired.payload, &found);
                if drift.is_empty() {
                    Ok(found)
                } else {
                    self.update(desired, &found, &drift.patch(desired)).await
                }
            }
            None => self.create(desired).await,
        }
    }

    /// Delete by id; `false` when the record was already gone
    async fn remove(&self, target: &ItemTarget<'_>) -> Result<bool> {
        let item_id = target.item_id.unwrap_or_default();
        let outcome = self
            .ctx
            .call(
                "delete item",
                self.api
                    .delete_item(target.account_id, target.list_id, item_id),
            )
            .await;

        match outcome {
            Ok(ApplyOutcome::Applied(())) => Ok(true),
            Ok(ApplyOutcome::Pending { operation_id }) => {
                self.wait_operation(target, &operation_id).await?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(Error::remote(target.to_string(), e)),
        }
    }

    /// Poll an asynchronous operation until it finishes
    async fn wait_operation(&self, target: &ItemTarget<'_>, operation_id: &str) -> Result<()> {
        let result = self.poll_operation(target.account_id, operation_id).await;
        result.map_err(|e| Error::remote(target.to_string(), e))
    }

    async fn poll_operation(&self, account_id: &str, operation_id: &str) -> Result<()> {
        for attempt in 1..=self.ctx.max_polls() {
            let status = self
                .ctx
                .call("get operation", self.api.get_operation(account_id, operation_id))
                .await?;

            match status {
                OperationStatus::Completed => return Ok(()),
                OperationStatus::Failed { error } if error.contains(KIND_MISMATCH_PHRASE) => {
                    return Err(Error::rejected(error));
                }
                OperationStatus::Failed { error } => {
                    return Err(Error::Operation {
                        operation_id: operation_id.to_string(),
                        message: error,
                    });
                }
                OperationStatus::Pending | OperationStatus::Running => {
                    debug!("Operation {} still in progress (poll {})", operation_id, attempt);
                    self.ctx.pause("wait for operation").await?;
                }
            }
        }

        Err(Error::Timeout(self.ctx.poll_budget()))
    }

    /// Find a just-created record by content, tolerating read-after-write lag
    async fn await_visible(&self, desired: &DesiredItem) -> Result<ListItem> {
        let resolver = Resolver::new(self.api.as_ref(), &self.ctx);
        for attempt in 1..=self.ctx.max_polls() {
            if let Some(item) = resolver
                .find_by_content(&desired.account_id, &desired.list_id, &desired.payload)
                .await?
            {
                return Ok(item);
            }
            debug!("{} not visible yet (poll {})", desired.payload, attempt);
            self.ctx.pause("wait for item").await?;
        }

        Err(Error::remote(
            desired.target().to_string(),
            Error::not_found(format!("{} not visible after the operation completed", desired.payload)),
        ))
    }

    fn enter_phase(&self, name: &str, phase: Lifecycle) {
        self.emit_event(ReconcileEvent::PhaseChanged {
            name: name.to_string(),
            phase,
        });
    }

    fn report(&self, name: &str, result: &Result<ReconcileOutcome>) {
        let event = match result {
            Ok(outcome) => ReconcileEvent::ItemReconciled {
                name: name.to_string(),
                applied: outcome.applied.clone(),
            },
            Err(e) => ReconcileEvent::ItemFailed {
                name: name.to_string(),
                error: e.to_string(),
            },
        };
        self.emit_event(event);
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        // Full channel means the consumer is behind; drop rather than block reconciliation
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}
