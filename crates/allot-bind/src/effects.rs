//! Store collaborator interface.
//!
//! The replicated store (key-value persistence, CRDT merge, peer transport
//! and event delivery) lives outside this crate. Bindings only drive it
//! through [`StoreEffects`].
//!
//! # Payloads
//!
//! `put` and `share` take the JSON-encoded state; the store wraps it in an
//! [`Envelope`](crate::wire::Envelope). `get`, `sync_with_peers`, the scan
//! operations and every [`StoreEvent`] hand back encoded envelopes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::route::Route;

/// Where an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    /// Echo of a write made by this replica
    Local,
    /// Write received from a peer
    Remote,
}

/// Change notification delivered to subscribed handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Route the change applies to
    pub route: Route,
    /// Origin of the change
    pub origin: EventOrigin,
    /// Encoded envelope
    pub payload: String,
}

impl StoreEvent {
    /// Create a new event.
    pub fn new(route: Route, origin: EventOrigin, payload: impl Into<String>) -> Self {
        Self {
            route,
            origin,
            payload: payload.into(),
        }
    }
}

/// Handler invoked for every event on a subscribed route.
pub type EventHandler = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Identifier of a registered handler, unique per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw listener number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw listener number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Operations the binding layer needs from the replicated store.
#[async_trait]
pub trait StoreEffects: Send + Sync {
    /// Read the persisted envelope for `route`.
    async fn get(&self, route: &Route) -> Result<Option<String>, StoreError>;

    /// Durably write `data` (encoded state) under `route`, advancing its clock
    /// and notifying peers.
    async fn put(&self, route: &Route, data: String) -> Result<(), StoreError>;

    /// Broadcast `data` (encoded state) to connected peers without storing it.
    async fn share(&self, route: &Route, data: String) -> Result<(), StoreError>;

    /// Exchange the local version of `route` with peers and return the local
    /// envelope as it stands afterwards.
    async fn sync_with_peers(&self, route: &Route) -> Result<Option<String>, StoreError>;

    /// Raw `(key, envelope)` pairs whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Raw `(key, envelope)` pairs with `start <= key` and, when given,
    /// `key < end`.
    async fn scan_range(
        &self,
        start: &str,
        end: Option<&str>,
    ) -> Result<Vec<(String, String)>, StoreError>;

    /// Delete the value under `route`.
    async fn remove(&self, route: &Route) -> Result<(), StoreError>;

    /// Register `handler` for events on `route`.
    fn subscribe(&self, route: &Route, handler: EventHandler) -> ListenerId;

    /// Remove a handler. Returns `false` when nothing was registered under
    /// that id for the route.
    fn unsubscribe(&self, route: &Route, listener: ListenerId) -> bool;
}
