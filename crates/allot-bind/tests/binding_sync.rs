//! End-to-end binding behaviour against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use allot_bind::{BindingRequest, Bound, CallbackResult, Envelope, SyncSession};
use allot_testkit::{init_test_tracing, settle, MemoryNetwork, MemoryStore, StoreOp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: i64,
}

type Log = Arc<Mutex<Vec<(&'static str, i64, i64)>>>;

fn session(store: &MemoryStore) -> SyncSession {
    SyncSession::new(Arc::new(store.clone())).unwrap()
}

fn counter(count: i64) -> Counter {
    Counter { count }
}

fn encoded(count: i64) -> String {
    serde_json::to_string(&counter(count)).unwrap()
}

fn record(
    log: &Log,
    label: &'static str,
) -> impl Fn(&Counter, &Counter) -> CallbackResult + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |old: &Counter, new: &Counter| {
        log.lock().push((label, old.count, new.count));
        Ok(())
    }
}

fn connect(session: &SyncSession, request: BindingRequest<Counter>) -> Bound<Counter> {
    session.connect(request).unwrap()
}

// ============================================================================
// Outbound scheduling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn throttle_sends_leading_and_latest_trailing_write() {
    init_test_tracing();
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = connect(&session, BindingRequest::new("counter", counter(0)));

    bound.update(|c| c.count = 1);
    bound.update(|c| c.count = 2);
    bound.update(|c| c.count = 3);
    settle().await;

    assert_eq!(store.puts("counter"), vec![encoded(1)]);

    tokio::time::sleep(Duration::from_millis(351)).await;
    settle().await;

    assert_eq!(store.puts("counter"), vec![encoded(1), encoded(3)]);
}

#[tokio::test(start_paused = true)]
async fn debounce_sends_only_after_quiet_period() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0)).debounce(Duration::from_millis(100)),
    );

    for n in 1..=3 {
        bound.update(|c| c.count = n);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    settle().await;
    assert!(store.puts("counter").is_empty());

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    assert_eq!(store.puts("counter"), vec![encoded(3)]);
}

#[tokio::test(start_paused = true)]
async fn unthrottled_binding_sends_every_write() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = connect(&session, BindingRequest::new("counter", counter(0)).unthrottled());

    bound.set(counter(1));
    bound.set(counter(2));
    settle().await;

    assert_eq!(store.puts("counter"), vec![encoded(1), encoded(2)]);
}

#[tokio::test(start_paused = true)]
async fn ephemeral_binding_shares_instead_of_putting() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = connect(
        &session,
        BindingRequest::new("cursor", counter(7)).persist(false),
    );
    bound.bootstrapped().await;

    bound.set(counter(8));
    settle().await;

    assert_eq!(store.shares("cursor"), vec![encoded(7), encoded(8)]);
    assert!(store.puts("cursor").is_empty());
    assert_eq!(store.count(StoreOp::Get), 0);
    assert_eq!(store.count(StoreOp::SyncWithPeers), 0);
}

// ============================================================================
// Local writes and callbacks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn local_write_runs_callbacks_in_order_with_snapshots() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0))
            .on_change(record(&log, "change"))
            .on_local_change(record(&log, "local"))
            .on_remote_change(record(&log, "remote"))
            .with_change_callback(record(&log, "list-1"))
            .with_change_callback(record(&log, "list-2")),
    );

    bound.update(|c| c.count += 1);

    assert_eq!(bound.get(), counter(1));
    assert_eq!(
        *log.lock(),
        vec![
            ("change", 0, 1),
            ("local", 0, 1),
            ("list-1", 0, 1),
            ("list-2", 0, 1)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_callbacks_do_not_block_later_callbacks_or_sync() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0))
            .on_change(|_: &Counter, _: &Counter| panic!("first callback blew up"))
            .on_local_change(|_: &Counter, _: &Counter| Err("second callback failed".into()))
            .with_change_callback(record(&log, "list")),
    );

    bound.set(counter(4));
    settle().await;

    assert_eq!(bound.get(), counter(4));
    assert_eq!(*log.lock(), vec![("list", 0, 4)]);
    assert_eq!(store.puts("counter"), vec![encoded(4)]);
}

#[tokio::test(start_paused = true)]
async fn callbacks_added_after_connect_are_used() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0)).on_change(record(&log, "original")),
    );

    bound.on_change(record(&log, "replacement"));
    bound.add_change_callback(record(&log, "appended"));
    bound.set(counter(2));

    assert_eq!(
        *log.lock(),
        vec![("replacement", 0, 2), ("appended", 0, 2)]
    );
}

#[tokio::test(start_paused = true)]
async fn patch_overwrites_fields_as_local_write() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0)).on_local_change(record(&log, "local")),
    );

    bound.patch(serde_json::json!({ "count": 12 })).unwrap();
    assert!(bound.patch(serde_json::json!({ "count": "twelve" })).is_err());
    assert!(bound.patch(serde_json::json!([1, 2])).is_err());

    assert_eq!(bound.get(), counter(12));
    assert_eq!(*log.lock(), vec![("local", 0, 12)]);
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test(start_paused = true)]
async fn bootstrap_merges_persisted_value_once() {
    let store = MemoryStore::new("a");
    store.set_persisted("counter", r#"{"clock":1,"data":"{\"count\":5}"}"#);
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0)).on_remote_change(record(&log, "remote")),
    );

    assert_eq!(bound.get(), counter(0));
    bound.bootstrapped().await;

    assert_eq!(bound.get(), counter(5));
    assert_eq!(bound.clock(), Some(1));
    assert_eq!(*log.lock(), vec![("remote", 0, 5)]);
    assert_eq!(store.count(StoreOp::Get), 1);
    assert_eq!(store.count(StoreOp::SyncWithPeers), 1);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_failures_are_swallowed() {
    let store = MemoryStore::new("a");
    store.fail(StoreOp::Get);
    store.fail(StoreOp::SyncWithPeers);
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(3)).on_change(record(&log, "change")),
    );

    bound.bootstrapped().await;

    assert_eq!(bound.get(), counter(3));
    assert!(log.lock().is_empty());
    assert!(bound.is_connected());
}

#[tokio::test(start_paused = true)]
async fn bootstrap_drops_malformed_and_empty_payloads() {
    let store = MemoryStore::new("a");
    store.set_persisted("counter", "definitely not json");
    store.set_peer_answer("counter", r#"{"clock":2,"data":"{}"}"#);
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(1)).on_change(record(&log, "change")),
    );

    bound.bootstrapped().await;

    assert_eq!(bound.get(), counter(1));
    assert_eq!(bound.clock(), None);
    assert!(log.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn newer_clock_wins_when_peer_answers_first() {
    let store = MemoryStore::new("a");
    store.set_persisted("counter", Envelope::versioned(1, encoded(5)).encode());
    store.set_peer_answer("counter", Envelope::versioned(3, encoded(7)).encode());
    store.set_latency(StoreOp::Get, Duration::from_millis(10));
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0)).on_remote_change(record(&log, "remote")),
    );

    bound.bootstrapped().await;

    assert_eq!(bound.get(), counter(7));
    assert_eq!(bound.clock(), Some(3));
    assert_eq!(*log.lock(), vec![("remote", 0, 7)]);
}

#[tokio::test(start_paused = true)]
async fn newer_clock_wins_when_store_answers_first() {
    let store = MemoryStore::new("a");
    store.set_persisted("counter", Envelope::versioned(1, encoded(5)).encode());
    store.set_peer_answer("counter", Envelope::versioned(3, encoded(7)).encode());
    store.set_latency(StoreOp::SyncWithPeers, Duration::from_millis(10));
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0)).on_remote_change(record(&log, "remote")),
    );

    bound.bootstrapped().await;

    assert_eq!(bound.get(), counter(7));
    assert_eq!(*log.lock(), vec![("remote", 0, 5), ("remote", 5, 7)]);
}

#[tokio::test(start_paused = true)]
async fn late_bootstrap_overwrites_early_local_write() {
    let store = MemoryStore::new("a");
    store.set_peer_answer("counter", Envelope::versioned(9, encoded(5)).encode());
    store.set_latency(StoreOp::SyncWithPeers, Duration::from_millis(50));
    let session = session(&store);
    let bound = connect(&session, BindingRequest::new("counter", counter(0)));

    bound.set(counter(1));
    assert_eq!(bound.get(), counter(1));
    bound.bootstrapped().await;

    assert_eq!(bound.get(), counter(5));
}

// ============================================================================
// Remote changes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn remote_events_merge_and_local_echoes_are_ignored() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let log = Log::default();
    let bound = connect(
        &session,
        BindingRequest::new("counter", counter(0))
            .on_local_change(record(&log, "local"))
            .on_remote_change(record(&log, "remote")),
    );
    bound.bootstrapped().await;

    bound.set(counter(1));
    settle().await;
    store.inject_remote("counter", Envelope::ephemeral(encoded(9)).encode());

    assert_eq!(bound.get(), counter(9));
    assert_eq!(*log.lock(), vec![("local", 0, 1), ("remote", 1, 9)]);
}

#[tokio::test(start_paused = true)]
async fn writes_reach_a_peer_session() {
    let network = MemoryNetwork::new();
    let store_a = network.join("a");
    let store_b = network.join("b");
    let session_a = session(&store_a);
    let session_b = session(&store_b);
    let log = Log::default();

    let a = connect(&session_a, BindingRequest::new("counter", counter(0)));
    let b = connect(
        &session_b,
        BindingRequest::new("counter", counter(0)).on_remote_change(record(&log, "remote")),
    );
    a.bootstrapped().await;
    b.bootstrapped().await;

    a.set(counter(4));
    settle().await;

    assert_eq!(b.get(), counter(4));
    assert_eq!(b.clock(), Some(1));
    assert_eq!(*log.lock(), vec![("remote", 0, 4)]);
}

#[tokio::test(start_paused = true)]
async fn late_joiner_bootstraps_from_peers() {
    let network = MemoryNetwork::new();
    let store_a = network.join("a");
    let session_a = session(&store_a);
    let a = connect(&session_a, BindingRequest::new("counter", counter(0)));
    a.set(counter(6));
    settle().await;

    let store_b = network.join("b");
    let session_b = session(&store_b);
    let b = connect(&session_b, BindingRequest::new("counter", counter(0)));
    b.bootstrapped().await;

    assert_eq!(b.get(), counter(6));
}

#[tokio::test(start_paused = true)]
async fn disconnected_binding_stops_syncing() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = connect(&session, BindingRequest::new("counter", counter(0)));
    assert_eq!(store.listener_count("counter"), 1);

    bound.disconnect();
    bound.set(counter(2));
    settle().await;
    store.inject_remote("counter", Envelope::ephemeral(encoded(9)).encode());

    assert!(!bound.is_connected());
    assert_eq!(bound.get(), counter(2));
    assert!(store.puts("counter").is_empty());
    assert_eq!(store.listener_count("counter"), 0);
    assert!(session.routes().is_empty());
}
