//! In-memory links between replicas.

use std::sync::Arc;

use allot_bind::{Clock, Envelope, Route};
use parking_lot::Mutex;

use crate::store::MemoryStore;

pub(crate) struct NetworkInner {
    peers: Mutex<Vec<MemoryStore>>,
}

impl NetworkInner {
    /// Deliver a write from `from` to every other replica.
    pub(crate) fn broadcast(&self, from: &MemoryStore, route: &Route, payload: &str, durable: bool) {
        let peers: Vec<MemoryStore> = self
            .peers
            .lock()
            .iter()
            .filter(|peer| !peer.same_replica(from))
            .cloned()
            .collect();
        for peer in peers {
            peer.receive(route, payload, durable);
        }
    }

    /// Highest-clock entry for `route` held by any replica other than
    /// `asking`.
    pub(crate) fn freshest(&self, asking: &MemoryStore, route: &Route) -> Option<String> {
        let peers: Vec<MemoryStore> = self.peers.lock().clone();
        peers
            .iter()
            .filter(|peer| !peer.same_replica(asking))
            .filter_map(|peer| peer.stored(route.as_str()))
            .max_by_key(|raw| {
                Envelope::decode(raw)
                    .ok()
                    .and_then(|envelope| envelope.clock)
                    .unwrap_or(Clock::MIN)
            })
    }
}

/// Fully connected set of in-memory replicas.
///
/// Writes on one replica are delivered synchronously to every other as
/// remote events; `sync_with_peers` answers with the freshest copy held by
/// another replica.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("peers", &self.inner.peers.lock().len())
            .finish()
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                peers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a replica named `name` and connect it.
    pub fn join(&self, name: impl Into<String>) -> MemoryStore {
        let store = MemoryStore::new(name);
        self.connect(&store);
        store
    }

    /// Connect an existing replica.
    pub fn connect(&self, store: &MemoryStore) {
        store.attach(Arc::downgrade(&self.inner));
        self.inner.peers.lock().push(store.clone());
    }

    /// Number of connected replicas.
    pub fn len(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// Whether no replica is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allot_bind::{EventOrigin, StoreEffects, StoreEvent};

    #[tokio::test]
    async fn put_reaches_other_replicas_as_remote() {
        let network = MemoryNetwork::new();
        let a = network.join("a");
        let b = network.join("b");
        let route = Route::new("shared").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        b.subscribe(
            &route,
            Arc::new(move |event: &StoreEvent| sink.lock().push(event.origin)),
        );

        a.put(&route, "{\"v\":1}".into()).await.unwrap();

        assert_eq!(*seen.lock(), vec![EventOrigin::Remote]);
        assert_eq!(b.stored("shared"), a.stored("shared"));
        assert_eq!(
            b.sync_with_peers(&route).await.unwrap(),
            a.stored("shared")
        );
    }

    #[tokio::test]
    async fn share_is_not_stored() {
        let network = MemoryNetwork::new();
        let a = network.join("a");
        let b = network.join("b");

        a.share(&Route::new("chan").unwrap(), "{}".into()).await.unwrap();

        assert_eq!(b.stored("chan"), None);
        assert_eq!(a.stored("chan"), None);
    }
}
