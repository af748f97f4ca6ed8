//! Session registry, raw subscriptions and store queries.

use std::sync::Arc;
use std::time::Duration;

use allot_bind::{
    BindConfig, BindError, BindingRequest, Envelope, StoreError, StoredEntry, SyncSession,
};
use allot_testkit::{settle, MemoryStore, StoreOp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Label {
    text: String,
}

fn session(store: &MemoryStore) -> SyncSession {
    SyncSession::new(Arc::new(store.clone())).unwrap()
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn connecting_a_bound_route_reuses_the_binding() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let first_calls = Arc::new(Mutex::new(0));
    let second_calls = Arc::new(Mutex::new(0));
    let list_calls = Arc::new(Mutex::new(0));

    let (f, l) = (Arc::clone(&first_calls), Arc::clone(&list_calls));
    let first = session
        .connect(
            BindingRequest::new("counter", Counter { count: 1 })
                .on_change(move |_: &Counter, _: &Counter| {
                    *f.lock() += 1;
                    Ok(())
                })
                .with_change_callback(move |_: &Counter, _: &Counter| {
                    *l.lock() += 1;
                    Ok(())
                }),
        )
        .unwrap();

    let (s, l) = (Arc::clone(&second_calls), Arc::clone(&list_calls));
    let second = session
        .connect(
            BindingRequest::new("counter", Counter { count: 99 })
                .on_change(move |_: &Counter, _: &Counter| {
                    *s.lock() += 1;
                    Ok(())
                })
                .with_change_callback(move |_: &Counter, _: &Counter| {
                    *l.lock() += 1;
                    Ok(())
                }),
        )
        .unwrap();

    assert_eq!(second.get(), Counter { count: 1 });
    first.set(Counter { count: 2 });

    assert_eq!(second.get(), Counter { count: 2 });
    assert_eq!(*first_calls.lock(), 0);
    assert_eq!(*second_calls.lock(), 1);
    assert_eq!(*list_calls.lock(), 2);
    assert_eq!(store.listener_count("counter"), 1);
}

#[tokio::test(start_paused = true)]
async fn route_bound_with_another_type_is_rejected() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    session
        .connect(BindingRequest::new("shared", Counter { count: 0 }))
        .unwrap();

    let err = session
        .connect(BindingRequest::new("shared", Label { text: "x".into() }))
        .unwrap_err();
    assert!(matches!(err, BindError::RouteTypeMismatch { .. }));

    let err = session.binding::<Label>("shared").unwrap_err();
    assert!(matches!(err, BindError::RouteTypeMismatch { .. }));
}

#[tokio::test(start_paused = true)]
async fn binding_lookup_and_routes() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    session
        .connect(BindingRequest::new("b", Counter { count: 2 }))
        .unwrap();
    session
        .connect(BindingRequest::new("a", Counter { count: 1 }))
        .unwrap();

    let found = session.binding::<Counter>("b").unwrap();
    assert_eq!(found.get(), Counter { count: 2 });
    assert!(matches!(
        session.binding::<Counter>("missing"),
        Err(BindError::NotBound { .. })
    ));

    let routes: Vec<String> = session.routes().into_iter().map(String::from).collect();
    assert_eq!(routes, vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_by_route() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = session
        .connect(BindingRequest::new("counter", Counter { count: 0 }))
        .unwrap();

    assert!(session.disconnect("counter"));
    assert!(!session.disconnect("counter"));
    assert!(!session.disconnect(""));
    assert!(!bound.is_connected());
    assert_eq!(store.listener_count("counter"), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_tears_everything_down() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let bound = session
        .connect(BindingRequest::new("counter", Counter { count: 0 }))
        .unwrap();
    session.subscribe("raw", |_: &Value| {}).unwrap();

    session.dispose();
    session.dispose();

    assert!(session.is_disposed());
    assert!(!bound.is_connected());
    assert_eq!(store.listener_count("counter"), 0);
    assert_eq!(store.listener_count("raw"), 0);
    assert!(matches!(
        session.connect(BindingRequest::new("counter", Counter { count: 0 })),
        Err(BindError::Disposed)
    ));
    assert!(matches!(
        session.subscribe("raw", |_: &Value| {}),
        Err(BindError::Disposed)
    ));

    bound.set(Counter { count: 5 });
    assert_eq!(bound.get(), Counter { count: 5 });
}

// ============================================================================
// Request validation and configuration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_rejected() {
    let store = MemoryStore::new("a");
    let session = session(&store);

    assert!(matches!(
        session.connect(BindingRequest::new("", Counter { count: 0 })),
        Err(BindError::InvalidRoute { .. })
    ));
    assert!(matches!(
        session.connect(BindingRequest::new(" padded", Counter { count: 0 })),
        Err(BindError::InvalidRoute { .. })
    ));
    assert!(matches!(
        session.connect(BindingRequest::new("number", 5u32)),
        Err(BindError::Serialization { .. })
    ));
    assert!(matches!(
        session.connect(
            BindingRequest::new("counter", Counter { count: 0 })
                .throttle_interval(Duration::ZERO)
        ),
        Err(BindError::InvalidInterval { .. })
    ));
    assert!(session.routes().is_empty());
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_config_sets_binding_defaults() {
    let store = MemoryStore::new("a");
    let config = BindConfig::from_toml_str(
        r#"
        throttle_interval_ms = 100
        persist = false
        "#,
    )
    .unwrap();
    let session = SyncSession::with_config(Arc::new(store.clone()), config).unwrap();
    let bound = session
        .connect(BindingRequest::new("counter", Counter { count: 0 }))
        .unwrap();
    bound.bootstrapped().await;

    bound.set(Counter { count: 1 });
    bound.set(Counter { count: 2 });
    tokio::time::sleep(Duration::from_millis(101)).await;
    settle().await;

    assert_eq!(
        store.shares("counter"),
        vec![
            r#"{"count":0}"#.to_string(),
            r#"{"count":1}"#.to_string(),
            r#"{"count":2}"#.to_string()
        ]
    );
    assert!(store.puts("counter").is_empty());
}

#[test]
fn session_needs_a_runtime() {
    let store = MemoryStore::new("a");
    let err = SyncSession::new(Arc::new(store)).unwrap_err();
    assert!(matches!(err, BindError::NoRuntime { .. }));
}

// ============================================================================
// Raw subscriptions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn raw_subscription_sees_local_and_remote_state() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handle = session
        .subscribe("counter", move |state: &Value| sink.lock().push(state.clone()))
        .unwrap();
    assert_eq!(handle.route().as_str(), "counter");

    let bound = session
        .connect(BindingRequest::new("counter", Counter { count: 0 }).unthrottled())
        .unwrap();
    bound.set(Counter { count: 1 });
    settle().await;
    store.inject_remote("counter", Envelope::ephemeral(r#"{"count":2}"#).encode());
    store.inject_remote("counter", "garbage");

    assert_eq!(*seen.lock(), vec![json!({ "count": 1 }), json!({ "count": 2 })]);

    session.unsubscribe(&handle);
    store.inject_remote("counter", Envelope::ephemeral(r#"{"count":3}"#).encode());
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_of_unknown_handle_is_a_no_op() {
    let store = MemoryStore::new("a");
    let session = session(&store);
    let other_store = MemoryStore::new("b");
    let other = SyncSession::new(Arc::new(other_store)).unwrap();

    let foreign = other.subscribe("counter", |_: &Value| {}).unwrap();
    session.unsubscribe(&foreign);

    let handle = session.subscribe("counter", |_: &Value| {}).unwrap();
    session.unsubscribe(&handle);
    session.unsubscribe(&handle);
    assert_eq!(store.listener_count("counter"), 0);
}

// ============================================================================
// Store queries
// ============================================================================

fn seeded() -> MemoryStore {
    let store = MemoryStore::new("a");
    store.set_persisted("todo/1", Envelope::versioned(2, r#"{"done":false}"#).encode());
    store.set_persisted("todo/2", Envelope::versioned(5, r#"{"done":true}"#).encode());
    store.set_persisted("user/ada", Envelope::ephemeral(r#"{"name":"Ada"}"#).encode());
    store.set_persisted("broken", "not an envelope");
    store
}

#[tokio::test]
async fn entries_are_decoded() {
    let store = seeded();
    let session = session(&store);

    let todos = session.entries_with_prefix("todo/").await.unwrap();
    assert_eq!(
        todos,
        vec![
            StoredEntry {
                key: "todo/1".into(),
                clock: Some(2),
                value: Some(json!({ "done": false })),
            },
            StoredEntry {
                key: "todo/2".into(),
                clock: Some(5),
                value: Some(json!({ "done": true })),
            },
        ]
    );

    let all = session.all_entries().await.unwrap();
    let keys: Vec<&str> = all.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["broken", "todo/1", "todo/2", "user/ada"]);
    assert_eq!(all[0].value, None);

    let ranged = session.entries_in_range("todo/2", None).await.unwrap();
    let keys: Vec<&str> = ranged.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["todo/2", "user/ada"]);

    let bounded = session.entries_in_range("a", Some("todo/2")).await.unwrap();
    let keys: Vec<&str> = bounded.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["broken", "todo/1"]);
}

#[tokio::test]
async fn remove_deletes_and_failures_surface() {
    let store = seeded();
    let session = session(&store);

    session.remove("todo/1").await.unwrap();
    assert_eq!(store.stored("todo/1"), None);
    assert!(matches!(
        session.remove("todo/1").await,
        Err(BindError::Store(StoreError::NotFound { .. }))
    ));

    store.fail(StoreOp::Scan);
    assert!(session.all_entries().await.is_err());
}
