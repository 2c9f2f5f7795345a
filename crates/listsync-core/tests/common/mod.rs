//! Test doubles and common utilities for contract tests
//!
//! [`FakeListApi`] is an in-memory list service. It enforces list kinds the
//! way the real service does, counts every call, and can be told to fail,
//! hang, or answer mutations asynchronously.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use listsync_core::config::EngineConfig;
use listsync_core::error::{Error, Result};
use listsync_core::model::{DesiredItem, ItemPatch, ItemPayload, List, ListItem, ListKind, NewItem};
use listsync_core::traits::{ApplyOutcome, ListApi, OperationStatus};
use listsync_core::{ReconcileEvent, Reconciler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ACCOUNT: &str = "acc-1";
pub const IP_LIST: &str = "list-ip";
pub const ASN_LIST: &str = "list-asn";
pub const HOSTNAME_LIST: &str = "list-hostname";
pub const REDIRECT_LIST: &str = "list-redirect";

/// Remote calls the fake can count and misbehave on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    GetList,
    CreateItem,
    GetItem,
    ListItems,
    UpdateItem,
    DeleteItem,
    GetOperation,
}

/// Injected behavior for a call
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with a transport error
    Transport,
    /// Fail with not found
    NotFound,
    /// Never answer
    Hang,
    /// Answer normally after a delay
    Delay(Duration),
}

#[derive(Debug, Default)]
struct Remote {
    lists: HashMap<(String, String), List>,
    /// Kind reported by get_list when it differs from the enforced one
    reported_kinds: HashMap<(String, String), ListKind>,
    items: HashMap<(String, String), Vec<ListItem>>,
    /// Operation id → remaining in-progress polls and final status
    operations: HashMap<String, (usize, OperationStatus)>,
    next_id: usize,
    calls: HashMap<Call, usize>,
    faults: HashMap<Call, Fault>,
    async_polls: Option<usize>,
    payload_updates: bool,
}

/// In-memory list service
#[derive(Debug, Default)]
pub struct FakeListApi {
    remote: Mutex<Remote>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a FakeListApi);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn key(account_id: &str, list_id: &str) -> (String, String) {
    (account_id.to_string(), list_id.to_string())
}

fn timestamp(seq: usize) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap()
}

fn mismatch(item: ListKind, list: ListKind) -> String {
    format!("{} can not be added to lists of type {}", item, list)
}

impl FakeListApi {
    /// A service with one list of each kind in [`ACCOUNT`]
    pub fn new() -> Self {
        let api = Self::default();
        api.add_list(ACCOUNT, IP_LIST, ListKind::Ip);
        api.add_list(ACCOUNT, ASN_LIST, ListKind::Asn);
        api.add_list(ACCOUNT, HOSTNAME_LIST, ListKind::Hostname);
        api.add_list(ACCOUNT, REDIRECT_LIST, ListKind::Redirect);
        api
    }

    pub fn add_list(&self, account_id: &str, list_id: &str, kind: ListKind) {
        let mut remote = self.remote.lock().unwrap();
        remote.lists.insert(
            key(account_id, list_id),
            List {
                id: list_id.to_string(),
                account_id: account_id.to_string(),
                name: format!("{}-list", kind),
                description: None,
                kind,
                num_items: 0,
                created_on: None,
                modified_on: None,
            },
        );
    }

    /// Make get_list report a different kind than the one create enforces
    pub fn misreport_kind(&self, account_id: &str, list_id: &str, kind: ListKind) {
        let mut remote = self.remote.lock().unwrap();
        remote.reported_kinds.insert(key(account_id, list_id), kind);
    }

    /// Answer mutations with operations that stay in progress for `polls` polls
    pub fn use_async_operations(&self, polls: usize) {
        self.remote.lock().unwrap().async_polls = Some(polls);
    }

    /// Allow update_item to change payloads
    pub fn allow_payload_updates(&self) {
        self.remote.lock().unwrap().payload_updates = true;
    }

    pub fn inject(&self, call: Call, fault: Fault) {
        self.remote.lock().unwrap().faults.insert(call, fault);
    }

    pub fn clear_faults(&self) {
        self.remote.lock().unwrap().faults.clear();
    }

    /// Add an item behind the reconciler's back
    pub fn seed(&self, account_id: &str, list_id: &str, payload: ItemPayload, comment: Option<&str>) -> String {
        let mut remote = self.remote.lock().unwrap();
        Self::insert(&mut remote, account_id, list_id, payload, comment.map(str::to_string))
    }

    /// Remove an item behind the reconciler's back
    pub fn remove(&self, account_id: &str, list_id: &str, item_id: &str) {
        let mut remote = self.remote.lock().unwrap();
        if let Some(items) = remote.items.get_mut(&key(account_id, list_id)) {
            items.retain(|item| item.id != item_id);
        }
    }

    pub fn items(&self, account_id: &str, list_id: &str) -> Vec<ListItem> {
        let remote = self.remote.lock().unwrap();
        remote
            .items
            .get(&key(account_id, list_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self, call: Call) -> usize {
        self.remote.lock().unwrap().calls.get(&call).copied().unwrap_or(0)
    }

    /// Number of mutating calls (create, update, delete)
    pub fn mutations(&self) -> usize {
        self.calls(Call::CreateItem) + self.calls(Call::UpdateItem) + self.calls(Call::DeleteItem)
    }

    /// Highest number of calls that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn insert(
        remote: &mut Remote,
        account_id: &str,
        list_id: &str,
        payload: ItemPayload,
        comment: Option<String>,
    ) -> String {
        remote.next_id += 1;
        let id = format!("item-{:04}", remote.next_id);
        let created = timestamp(remote.next_id);
        remote.items.entry(key(account_id, list_id)).or_default().push(ListItem {
            id: id.clone(),
            comment,
            payload,
            created_on: Some(created),
            modified_on: Some(created),
        });
        id
    }

    async fn enter(&self, call: Call) -> Result<InFlight<'_>> {
        let fault = {
            let mut remote = self.remote.lock().unwrap();
            *remote.calls.entry(call).or_default() += 1;
            remote.faults.get(&call).cloned()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(self);

        match fault {
            Some(Fault::Transport) => Err(Error::transport("connection reset by peer")),
            Some(Fault::NotFound) => Err(Error::not_found("no such record")),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(guard)
            }
            None => Ok(guard),
        }
    }

    /// Register an operation, or `None` when mutations are synchronous
    fn operation(remote: &mut Remote, status: OperationStatus) -> Option<String> {
        let polls = remote.async_polls?;
        remote.next_id += 1;
        let operation_id = format!("op-{:04}", remote.next_id);
        remote.operations.insert(operation_id.clone(), (polls, status));
        Some(operation_id)
    }
}

#[async_trait]
impl ListApi for FakeListApi {
    async fn get_list(&self, account_id: &str, list_id: &str) -> Result<List> {
        let _guard = self.enter(Call::GetList).await?;
        let remote = self.remote.lock().unwrap();
        let k = key(account_id, list_id);
        let mut list = remote
            .lists
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("list {}", list_id)))?;
        if let Some(kind) = remote.reported_kinds.get(&k) {
            list.kind = *kind;
        }
        Ok(list)
    }

    async fn create_item(
        &self,
        account_id: &str,
        list_id: &str,
        item: &NewItem,
    ) -> Result<ApplyOutcome<ListItem>> {
        let _guard = self.enter(Call::CreateItem).await?;
        let mut remote = self.remote.lock().unwrap();
        let list_kind = remote
            .lists
            .get(&key(account_id, list_id))
            .map(|list| list.kind)
            .ok_or_else(|| Error::not_found(format!("list {}", list_id)))?;

        let item_kind = item.payload.kind();
        if item_kind != list_kind {
            let message = mismatch(item_kind, list_kind);
            return match Self::operation(&mut remote, OperationStatus::Failed { error: message.clone() }) {
                Some(operation_id) => Ok(ApplyOutcome::Pending { operation_id }),
                None => Err(Error::rejected(message)),
            };
        }

        let id = Self::insert(&mut remote, account_id, list_id, item.payload.clone(), item.comment.clone());
        if let Some(operation_id) = Self::operation(&mut remote, OperationStatus::Completed) {
            return Ok(ApplyOutcome::Pending { operation_id });
        }

        let created = remote.items[&key(account_id, list_id)]
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .unwrap();
        Ok(ApplyOutcome::Applied(created))
    }

    async fn get_item(&self, account_id: &str, list_id: &str, item_id: &str) -> Result<ListItem> {
        let _guard = self.enter(Call::GetItem).await?;
        let remote = self.remote.lock().unwrap();
        remote
            .items
            .get(&key(account_id, list_id))
            .and_then(|items| items.iter().find(|item| item.id == item_id))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("item {}", item_id)))
    }

    async fn list_items(
        &self,
        account_id: &str,
        list_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<ListItem>> {
        let _guard = self.enter(Call::ListItems).await?;
        let remote = self.remote.lock().unwrap();
        let items = remote
            .items
            .get(&key(account_id, list_id))
            .cloned()
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .filter(|item| search.is_none_or(|s| item.payload.search_key().contains(s)))
            .collect())
    }

    async fn update_item(
        &self,
        account_id: &str,
        list_id: &str,
        item_id: &str,
        patch: &ItemPatch,
    ) -> Result<ApplyOutcome<ListItem>> {
        let _guard = self.enter(Call::UpdateItem).await?;
        let mut remote = self.remote.lock().unwrap();
        if patch.payload.is_some() && !remote.payload_updates {
            return Err(Error::rejected("item content cannot be changed"));
        }
        remote.next_id += 1;
        let modified = timestamp(remote.next_id);

        let item = remote
            .items
            .get_mut(&key(account_id, list_id))
            .and_then(|items| items.iter_mut().find(|item| item.id == item_id))
            .ok_or_else(|| Error::not_found(format!("item {}", item_id)))?;
        if let Some(comment) = &patch.comment {
            item.comment = comment.clone();
        }
        if let Some(payload) = &patch.payload {
            item.payload = payload.clone();
        }
        item.modified_on = Some(modified);
        let updated = item.clone();

        match Self::operation(&mut remote, OperationStatus::Completed) {
            Some(operation_id) => Ok(ApplyOutcome::Pending { operation_id }),
            None => Ok(ApplyOutcome::Applied(updated)),
        }
    }

    async fn delete_item(&self, account_id: &str, list_id: &str, item_id: &str) -> Result<ApplyOutcome<()>> {
        let _guard = self.enter(Call::DeleteItem).await?;
        let mut remote = self.remote.lock().unwrap();
        let items = remote.items.entry(key(account_id, list_id)).or_default();
        let before = items.len();
        items.retain(|item| item.id != item_id);
        if items.len() == before {
            return Err(Error::not_found(format!("item {}", item_id)));
        }

        match Self::operation(&mut remote, OperationStatus::Completed) {
            Some(operation_id) => Ok(ApplyOutcome::Pending { operation_id }),
            None => Ok(ApplyOutcome::Applied(())),
        }
    }

    async fn get_operation(&self, _account_id: &str, operation_id: &str) -> Result<OperationStatus> {
        let _guard = self.enter(Call::GetOperation).await?;
        let mut remote = self.remote.lock().unwrap();
        let (remaining, status) = remote
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| Error::not_found(format!("operation {}", operation_id)))?;
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(OperationStatus::Running);
        }
        Ok(status.clone())
    }

    fn supports_payload_update(&self) -> bool {
        self.remote.lock().unwrap().payload_updates
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Engine settings with short operation polling
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        call_timeout_secs: 5,
        operation_poll_interval_ms: 10,
        operation_max_polls: 20,
        max_concurrency: 4,
        event_channel_capacity: 1000,
    }
}

/// A reconciler talking to `api`
pub fn reconciler(api: &Arc<FakeListApi>) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
    reconciler_with(api, test_engine_config())
}

pub fn reconciler_with(
    api: &Arc<FakeListApi>,
    config: EngineConfig,
) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
    Reconciler::new(api.clone(), &config).expect("reconciler construction succeeds")
}

pub fn ip_item(name: &str, ip: &str) -> DesiredItem {
    DesiredItem::new(name, ACCOUNT, IP_LIST, ItemPayload::ip(ip).unwrap())
}

/// Drain every event emitted so far
pub fn drain(rx: &mut mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
