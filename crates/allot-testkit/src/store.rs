//! In-memory replica of the replicated store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use allot_bind::{
    Clock, Envelope, EventHandler, EventOrigin, ListenerId, Route, StoreEffects, StoreError,
    StoreEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::network::NetworkInner;

/// Store operation kinds, for fault and latency injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `get`
    Get,
    /// `put`
    Put,
    /// `share`
    Share,
    /// `sync_with_peers`
    SyncWithPeers,
    /// `scan_prefix` and `scan_range`
    Scan,
    /// `remove`
    Remove,
}

/// A recorded call into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `get(route)`
    Get(Route),
    /// `put(route, data)`
    Put {
        /// Target route
        route: Route,
        /// Encoded state
        data: String,
    },
    /// `share(route, data)`
    Share {
        /// Target route
        route: Route,
        /// Encoded state
        data: String,
    },
    /// `sync_with_peers(route)`
    SyncWithPeers(Route),
    /// `scan_prefix(prefix)`
    ScanPrefix(String),
    /// `scan_range(start, end)`
    ScanRange {
        /// Inclusive lower bound
        start: String,
        /// Exclusive upper bound
        end: Option<String>,
    },
    /// `remove(route)`
    Remove(Route),
}

impl StoreCall {
    /// Operation kind of this call.
    pub fn op(&self) -> StoreOp {
        match self {
            Self::Get(_) => StoreOp::Get,
            Self::Put { .. } => StoreOp::Put,
            Self::Share { .. } => StoreOp::Share,
            Self::SyncWithPeers(_) => StoreOp::SyncWithPeers,
            Self::ScanPrefix(_) | Self::ScanRange { .. } => StoreOp::Scan,
            Self::Remove(_) => StoreOp::Remove,
        }
    }
}

type Listeners = HashMap<Route, Vec<(ListenerId, EventHandler)>>;

pub(crate) struct StoreInner {
    name: String,
    entries: Mutex<BTreeMap<String, String>>,
    listeners: Mutex<Listeners>,
    next_listener: AtomicU64,
    calls: Mutex<Vec<StoreCall>>,
    failing: Mutex<HashSet<StoreOp>>,
    latency: Mutex<HashMap<StoreOp, Duration>>,
    peer_answers: Mutex<HashMap<Route, String>>,
    network: Mutex<Option<Weak<NetworkInner>>>,
}

/// One in-memory replica.
///
/// `put` bumps the entry clock, echoes a [`EventOrigin::Local`] event to this
/// replica's listeners and, when joined to a [`MemoryNetwork`], delivers a
/// [`EventOrigin::Remote`] event to every other replica. `share` does the
/// same without storing anything.
///
/// [`MemoryNetwork`]: crate::MemoryNetwork
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.inner.name)
            .field("entries", &self.inner.entries.lock().len())
            .field("calls", &self.inner.calls.lock().len())
            .finish()
    }
}

fn clock_of(raw: &str) -> Option<Clock> {
    Envelope::decode(raw).ok().and_then(|envelope| envelope.clock)
}

impl MemoryStore {
    /// Create a standalone replica.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                entries: Mutex::new(BTreeMap::new()),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                latency: Mutex::new(HashMap::new()),
                peer_answers: Mutex::new(HashMap::new()),
                network: Mutex::new(None),
            }),
        }
    }

    /// Replica name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether two handles refer to the same replica.
    pub fn same_replica(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach(&self, network: Weak<NetworkInner>) {
        *self.inner.network.lock() = Some(network);
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Store a raw envelope without emitting events.
    pub fn set_persisted(&self, route: &str, raw: impl Into<String>) {
        self.inner.entries.lock().insert(route.to_string(), raw.into());
    }

    /// Answer `sync_with_peers(route)` with `raw`.
    pub fn set_peer_answer(&self, route: &str, raw: impl Into<String>) {
        let route = Route::new(route).expect("valid route");
        self.inner.peer_answers.lock().insert(route, raw.into());
    }

    /// Make every call of `op` fail.
    pub fn fail(&self, op: StoreOp) {
        self.inner.failing.lock().insert(op);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: StoreOp) {
        self.inner.failing.lock().remove(&op);
    }

    /// Delay every call of `op` by `latency`.
    pub fn set_latency(&self, op: StoreOp, latency: Duration) {
        self.inner.latency.lock().insert(op, latency);
    }

    /// Deliver `raw` to this replica's listeners as a remote event.
    pub fn inject_remote(&self, route: &str, raw: impl Into<String>) {
        let route = Route::new(route).expect("valid route");
        self.emit(&route, EventOrigin::Remote, &raw.into());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.calls.lock().clone()
    }

    /// Number of calls of `op` received so far.
    pub fn count(&self, op: StoreOp) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Data passed to `put` for `route`, in order.
    pub fn puts(&self, route: &str) -> Vec<String> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::Put { route: r, data } if r.as_str() == route => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Data passed to `share` for `route`, in order.
    pub fn shares(&self, route: &str) -> Vec<String> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StoreCall::Share { route: r, data } if r.as_str() == route => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// Raw envelope stored for `route`.
    pub fn stored(&self, route: &str) -> Option<String> {
        self.inner.entries.lock().get(route).cloned()
    }

    /// Number of listeners on `route`.
    pub fn listener_count(&self, route: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(route)
            .map_or(0, |listeners| listeners.len())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn record(&self, call: StoreCall) {
        self.inner.calls.lock().push(call);
    }

    async fn enter(&self, call: StoreCall) -> Result<(), StoreError> {
        let op = call.op();
        self.record(call);
        let latency = self.inner.latency.lock().get(&op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.failing.lock().contains(&op) {
            let reason = format!("{} failed on {}", op_name(op), self.inner.name);
            return Err(match op {
                StoreOp::Share => StoreError::transport(reason),
                StoreOp::SyncWithPeers => StoreError::unavailable(reason),
                StoreOp::Get | StoreOp::Put | StoreOp::Scan | StoreOp::Remove => {
                    StoreError::storage(reason)
                }
            });
        }
        Ok(())
    }

    pub(crate) fn emit(&self, route: &Route, origin: EventOrigin, payload: &str) {
        let handlers: Vec<EventHandler> = self
            .inner
            .listeners
            .lock()
            .get(route)
            .map(|listeners| listeners.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        let event = StoreEvent::new(route.clone(), origin, payload);
        for handler in handlers {
            handler(&event);
        }
    }

    /// Apply a write delivered by a peer.
    pub(crate) fn receive(&self, route: &Route, payload: &str, durable: bool) {
        if durable {
            let mut entries = self.inner.entries.lock();
            let incoming = clock_of(payload);
            let current = entries.get(route.as_str()).and_then(|raw| clock_of(raw));
            if current.is_some() && incoming <= current {
                return;
            }
            entries.insert(route.to_string(), payload.to_string());
        }
        self.emit(route, EventOrigin::Remote, payload);
    }

    fn broadcast(&self, route: &Route, payload: &str, durable: bool) {
        let network = self.inner.network.lock().as_ref().and_then(Weak::upgrade);
        if let Some(network) = network {
            network.broadcast(self, route, payload, durable);
        }
    }

    fn peer_answer(&self, route: &Route) -> Option<String> {
        if let Some(answer) = self.inner.peer_answers.lock().get(route) {
            return Some(answer.clone());
        }
        let network = self.inner.network.lock().as_ref().and_then(Weak::upgrade)?;
        network.freshest(self, route)
    }
}

fn op_name(op: StoreOp) -> &'static str {
    match op {
        StoreOp::Get => "get",
        StoreOp::Put => "put",
        StoreOp::Share => "share",
        StoreOp::SyncWithPeers => "sync_with_peers",
        StoreOp::Scan => "scan",
        StoreOp::Remove => "remove",
    }
}

#[async_trait]
impl StoreEffects for MemoryStore {
    async fn get(&self, route: &Route) -> Result<Option<String>, StoreError> {
        self.enter(StoreCall::Get(route.clone())).await?;
        Ok(self.stored(route.as_str()))
    }

    async fn put(&self, route: &Route, data: String) -> Result<(), StoreError> {
        self.enter(StoreCall::Put {
            route: route.clone(),
            data: data.clone(),
        })
        .await?;
        let payload = {
            let mut entries = self.inner.entries.lock();
            let clock = entries
                .get(route.as_str())
                .and_then(|raw| clock_of(raw))
                .unwrap_or(0)
                + 1;
            let payload = Envelope::versioned(clock, data).encode();
            entries.insert(route.to_string(), payload.clone());
            payload
        };
        self.emit(route, EventOrigin::Local, &payload);
        self.broadcast(route, &payload, true);
        Ok(())
    }

    async fn share(&self, route: &Route, data: String) -> Result<(), StoreError> {
        self.enter(StoreCall::Share {
            route: route.clone(),
            data: data.clone(),
        })
        .await?;
        let payload = Envelope::ephemeral(data).encode();
        self.emit(route, EventOrigin::Local, &payload);
        self.broadcast(route, &payload, false);
        Ok(())
    }

    async fn sync_with_peers(&self, route: &Route) -> Result<Option<String>, StoreError> {
        self.enter(StoreCall::SyncWithPeers(route.clone())).await?;
        Ok(self.peer_answer(route))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.enter(StoreCall::ScanPrefix(prefix.to_string())).await?;
        Ok(self
            .inner
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, raw)| (key.clone(), raw.clone()))
            .collect())
    }

    async fn scan_range(
        &self,
        start: &str,
        end: Option<&str>,
    ) -> Result<Vec<(String, String)>, StoreError> {
        self.enter(StoreCall::ScanRange {
            start: start.to_string(),
            end: end.map(str::to_string),
        })
        .await?;
        Ok(self
            .inner
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| key.as_str() >= start && end.map_or(true, |end| key.as_str() < end))
            .map(|(key, raw)| (key.clone(), raw.clone()))
            .collect())
    }

    async fn remove(&self, route: &Route) -> Result<(), StoreError> {
        self.enter(StoreCall::Remove(route.clone())).await?;
        match self.inner.entries.lock().remove(route.as_str()) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(route.as_str())),
        }
    }

    fn subscribe(&self, route: &Route, handler: EventHandler) -> ListenerId {
        let listener = ListenerId::new(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .entry(route.clone())
            .or_default()
            .push((listener, handler));
        listener
    }

    fn unsubscribe(&self, route: &Route, listener: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(registered) = listeners.get_mut(route) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(id, _)| *id != listener);
        let removed = registered.len() != before;
        if registered.is_empty() {
            listeners.remove(route);
        }
        removed
    }
}
