//! Contract Test: Failure Semantics
//!
//! This test verifies how the reconciler reacts when the remote service is
//! slow, unreachable, or reports records missing.
//!
//! Constraints verified:
//! - A call that exceeds its deadline is abandoned and never retried
//! - Cancellation aborts in-flight work promptly
//! - "Not found" drops tracking; transport failures are surfaced instead
//! - One failing item never blocks the others in a pass
//! - Concurrency in a pass stays within `max_concurrency`
//!
//! If this test fails, outages can hang passes or silently forget items.

mod common;

use common::*;
use listsync_core::traits::StateStore;
use listsync_core::{Applied, EngineConfig, ErrorKind, Existence, MemoryStateStore, ReconcileEvent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn timed_out_create_is_abandoned_without_retry() {
    let api = Arc::new(FakeListApi::new());
    api.inject(Call::CreateItem, Fault::Hang);
    let (reconciler, _events) = reconciler_with(
        &api,
        EngineConfig {
            call_timeout_secs: 2,
            ..test_engine_config()
        },
    );

    let err = reconciler
        .reconcile(&ip_item("office", "192.0.2.1"), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout, "{}", err);
    assert_eq!(api.calls(Call::CreateItem), 1, "Timed out calls must not be retried");
}

#[tokio::test(start_paused = true)]
async fn timed_out_pass_keeps_previous_state() {
    let api = Arc::new(FakeListApi::new());
    let store = Arc::new(MemoryStateStore::new());
    let (reconciler, _events) = reconciler(&api);

    let desired = ip_item("office", "192.0.2.1").with_comment("v1");
    reconciler
        .reconcile_all(vec![desired.clone()], store.clone(), false)
        .await
        .unwrap();
    let before = store.get("office").await.unwrap().unwrap();

    api.inject(Call::UpdateItem, Fault::Hang);
    let report = reconciler
        .reconcile_all(vec![desired.with_comment("v2")], store.clone(), false)
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::Timeout);
    assert_eq!(store.get("office").await.unwrap().unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_in_flight_pass() {
    let api = Arc::new(FakeListApi::new());
    api.inject(Call::CreateItem, Fault::Hang);
    let store = Arc::new(MemoryStateStore::new());
    let (reconciler, mut events) = reconciler_with(
        &api,
        EngineConfig {
            call_timeout_secs: 3600,
            ..test_engine_config()
        },
    );

    let items: Vec<_> = (1..=6)
        .map(|n| ip_item(&format!("host-{}", n), &format!("192.0.2.{}", n)))
        .collect();

    let cancel = reconciler.cancel_handle();
    let pass = tokio::spawn({
        let reconciler = reconciler.clone();
        let store = store.clone();
        async move { reconciler.reconcile_all(items, store, false).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(1), pass)
        .await
        .expect("pass stops promptly after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(report.failed.len(), 6);
    assert!(
        report
            .failed
            .iter()
            .all(|(_, e)| e.kind() == ErrorKind::Cancelled)
    );
    assert!(store.is_empty().await);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, ReconcileEvent::PassFinished { failed: 6, .. }))
    );
}

#[tokio::test]
async fn not_found_on_read_means_gone() {
    let api = Arc::new(FakeListApi::new());
    let (reconciler, _events) = reconciler(&api);

    let state = reconciler
        .reconcile(&ip_item("office", "192.0.2.1"), None)
        .await
        .unwrap()
        .state
        .unwrap();
    api.remove(ACCOUNT, IP_LIST, state.item_id.as_deref().unwrap());

    assert_eq!(reconciler.read(&state).await.unwrap(), Existence::Gone);
}

#[tokio::test]
async fn item_removed_out_of_band_is_recreated() {
    let api = Arc::new(FakeListApi::new());
    let (reconciler, mut events) = reconciler(&api);

    let desired = ip_item("office", "192.0.2.1");
    let state = reconciler.reconcile(&desired, None).await.unwrap().state.unwrap();
    let old_id = state.item_id.clone().unwrap();
    api.remove(ACCOUNT, IP_LIST, &old_id);
    drain(&mut events);

    let outcome = reconciler.reconcile(&desired, Some(state)).await.unwrap();

    let Applied::Created { item_id } = &outcome.applied else {
        panic!("expected a fresh create, got {:?}", outcome.applied);
    };
    assert_ne!(item_id, &old_id);
    assert!(drain(&mut events).contains(&ReconcileEvent::TrackingDropped {
        name: "office".to_string(),
        item_id: old_id,
    }));
}

#[tokio::test]
async fn transport_failure_is_not_treated_as_gone() {
    let api = Arc::new(FakeListApi::new());
    let store = Arc::new(MemoryStateStore::new());
    let (reconciler, _events) = reconciler(&api);

    let desired = ip_item("office", "192.0.2.1");
    reconciler
        .reconcile_all(vec![desired.clone()], store.clone(), false)
        .await
        .unwrap();
    let tracked = store.get("office").await.unwrap().unwrap();

    api.inject(Call::GetItem, Fault::Transport);

    let err = reconciler.read(&tracked).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains(tracked.item_id.as_deref().unwrap()));

    let report = reconciler
        .reconcile_all(vec![desired], store.clone(), false)
        .await
        .unwrap();
    assert_eq!(report.failed[0].1.kind(), ErrorKind::Transport);
    assert_eq!(store.get("office").await.unwrap(), Some(tracked));
    assert_eq!(api.calls(Call::CreateItem), 1, "Nothing may be recreated");
}

#[tokio::test]
async fn one_failure_does_not_block_other_items() {
    let api = Arc::new(FakeListApi::new());
    let store = Arc::new(MemoryStateStore::new());
    let (reconciler, _events) = reconciler(&api);

    let items = vec![
        ip_item("good-1", "192.0.2.1"),
        // Wrong list for an IP
        listsync_core::DesiredItem::new(
            "bad",
            ACCOUNT,
            ASN_LIST,
            listsync_core::ItemPayload::ip("192.0.2.2").unwrap(),
        ),
        ip_item("good-2", "192.0.2.3"),
    ];

    let report = reconciler
        .reconcile_all(items, store.clone(), false)
        .await
        .unwrap();

    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "bad");
    assert_eq!(report.failed[0].1.kind(), ErrorKind::KindMismatch);
    assert_eq!(store.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn pass_concurrency_is_bounded() {
    let api = Arc::new(FakeListApi::new());
    api.inject(Call::CreateItem, Fault::Delay(Duration::from_millis(50)));
    let store = Arc::new(MemoryStateStore::new());
    let (reconciler, _events) = reconciler_with(
        &api,
        EngineConfig {
            max_concurrency: 2,
            ..test_engine_config()
        },
    );

    let items: Vec<_> = (1..=8)
        .map(|n| ip_item(&format!("host-{}", n), &format!("192.0.2.{}", n)))
        .collect();
    let report = reconciler.reconcile_all(items, store, false).await.unwrap();

    assert!(report.is_success());
    assert_eq!(api.items(ACCOUNT, IP_LIST).len(), 8);
    assert!(api.max_in_flight() <= 2, "saw {} calls at once", api.max_in_flight());
    assert!(api.max_in_flight() >= 2, "items should run concurrently");
}
