//! Sync sessions: the entry point that owns a store and its bindings.
//!
//! A [`SyncSession`] binds data to routes ([`connect`](SyncSession::connect)),
//! keeps one binding per route, exposes raw route subscriptions and offers
//! read helpers over the store's key space.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::binding::{BindContext, Bound, BoundInner, BindingRequest, Detach};
use crate::config::BindConfig;
use crate::effects::{EventHandler, ListenerId, StoreEffects, StoreEvent};
use crate::errors::{BindError, StoreError};
use crate::reactive::BoundData;
use crate::route::Route;
use crate::wire::{Clock, Envelope};

struct RegistryEntry {
    binding: Arc<dyn Any + Send + Sync>,
    detach: Arc<dyn Detach>,
}

fn same_allocation(a: &Arc<dyn Any + Send + Sync>, b: &Arc<dyn Any + Send + Sync>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Live bindings of a session, one per route.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<Route, RegistryEntry>>,
}

impl Registry {
    pub(crate) fn remove_if_same(&self, route: &Route, binding: &Arc<dyn Any + Send + Sync>) {
        let mut entries = self.entries.lock();
        if entries
            .get(route)
            .is_some_and(|entry| same_allocation(&entry.binding, binding))
        {
            entries.remove(route);
        }
    }

    fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.entries.lock().keys().cloned().collect();
        routes.sort();
        routes
    }

    fn take(&self, route: &Route) -> Option<RegistryEntry> {
        self.entries.lock().remove(route)
    }

    fn drain(&self) -> Vec<RegistryEntry> {
        self.entries.lock().drain().map(|(_, entry)| entry).collect()
    }
}

/// Handle returned by [`SyncSession::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    route: Route,
    listener: ListenerId,
}

impl SubscriptionHandle {
    /// Subscribed route.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Store listener behind this handle.
    pub fn listener(&self) -> ListenerId {
        self.listener
    }
}

/// One decoded entry returned by the store query helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    /// Store key
    pub key: String,
    /// Store clock of the entry, when recorded
    pub clock: Option<Clock>,
    /// Decoded state; `None` when the entry holds no data or does not decode
    pub value: Option<Value>,
}

impl StoredEntry {
    fn decode(key: String, raw: &str) -> Self {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(%key, error = %err, "stored entry is not an envelope");
                return Self {
                    key,
                    clock: None,
                    value: None,
                };
            }
        };
        let value = envelope
            .data
            .as_deref()
            .and_then(|data| match serde_json::from_str::<Value>(data) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!(%key, error = %err, "stored entry data does not decode");
                    None
                }
            });
        Self {
            key,
            clock: envelope.clock,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reuse {
    Allow,
    Deny,
}

struct SessionInner {
    store: Arc<dyn StoreEffects>,
    config: BindConfig,
    runtime: Handle,
    registry: Arc<Registry>,
    subscriptions: Mutex<HashSet<SubscriptionHandle>>,
    disposed: AtomicBool,
}

/// Owner of a store connection and the bindings made through it.
///
/// Cheap to clone; clones share bindings and configuration.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("config", &self.inner.config)
            .field("routes", &self.inner.registry.routes())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncSession`].
#[derive(Default)]
pub struct SyncSessionBuilder {
    store: Option<Arc<dyn StoreEffects>>,
    config: BindConfig,
    runtime: Option<Handle>,
}

impl fmt::Debug for SyncSessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSessionBuilder")
            .field("store", &self.store.is_some())
            .field("config", &self.config)
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl SyncSessionBuilder {
    /// Store the session drives.
    pub fn store(mut self, store: Arc<dyn StoreEffects>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults for binding requests.
    pub fn config(mut self, config: BindConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime for background work. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<SyncSession, BindError> {
        let store = self
            .store
            .ok_or_else(|| BindError::config("a store is required"))?;
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|err| BindError::NoRuntime {
                reason: err.to_string(),
            })?,
        };
        Ok(SyncSession {
            inner: Arc::new(SessionInner {
                store,
                config: self.config,
                runtime,
                registry: Arc::new(Registry::default()),
                subscriptions: Mutex::new(HashSet::new()),
                disposed: AtomicBool::new(false),
            }),
        })
    }
}

impl SyncSession {
    /// Session over `store` with default configuration on the current
    /// runtime.
    pub fn new(store: Arc<dyn StoreEffects>) -> Result<Self, BindError> {
        Self::builder().store(store).build()
    }

    /// Session over `store` with `config` on the current runtime.
    pub fn with_config(store: Arc<dyn StoreEffects>, config: BindConfig) -> Result<Self, BindError> {
        Self::builder().store(store).config(config).build()
    }

    /// Start building a session.
    pub fn builder() -> SyncSessionBuilder {
        SyncSessionBuilder::default()
    }

    /// Session defaults.
    pub fn config(&self) -> &BindConfig {
        &self.inner.config
    }

    /// Store the session drives.
    pub fn store(&self) -> &Arc<dyn StoreEffects> {
        &self.inner.store
    }

    /// Runtime background work is spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), BindError> {
        if self.is_disposed() {
            Err(BindError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Bind data to a route and start syncing it.
    ///
    /// Returns as soon as the binding is usable; bootstrap from the store
    /// continues in the background. Connecting a route that is already bound
    /// in this session returns the existing binding: callback slots given in
    /// `request` replace the existing ones, list callbacks are appended, and
    /// the initial data and sync options of `request` are ignored.
    ///
    /// # Errors
    ///
    /// - [`BindError::InvalidRoute`] for an empty or padded route
    /// - [`BindError::Serialization`] when the data is not a JSON object
    /// - [`BindError::InvalidInterval`] for a zero throttle or debounce
    /// - [`BindError::RouteTypeMismatch`] when the route is bound with
    ///   another type
    /// - [`BindError::Disposed`] after [`dispose`](Self::dispose)
    pub fn connect<T: BoundData>(&self, request: BindingRequest<T>) -> Result<Bound<T>, BindError> {
        self.connect_with(request, Reuse::Allow)
    }

    /// Like [`connect`](Self::connect), but fails with
    /// [`BindError::RouteInUse`] instead of reusing a bound route.
    pub(crate) fn connect_exclusive<T: BoundData>(
        &self,
        request: BindingRequest<T>,
    ) -> Result<Bound<T>, BindError> {
        self.connect_with(request, Reuse::Deny)
    }

    fn connect_with<T: BoundData>(
        &self,
        request: BindingRequest<T>,
        reuse: Reuse,
    ) -> Result<Bound<T>, BindError> {
        self.ensure_live()?;
        let route = Route::new(request.route())?;

        let mut entries = self.inner.registry.entries.lock();
        if let Some(entry) = entries.get(&route) {
            if reuse == Reuse::Deny {
                return Err(BindError::RouteInUse {
                    route: route.to_string(),
                });
            }
            let inner = Arc::clone(&entry.binding)
                .downcast::<BoundInner<T>>()
                .map_err(|_| BindError::RouteTypeMismatch {
                    route: route.to_string(),
                })?;
            let (callbacks, remote_hooks) = request.into_parts();
            inner.observed().absorb_callbacks(callbacks);
            inner.observed().add_remote_hooks(remote_hooks);
            tracing::debug!(route = %route, "reusing existing binding");
            return Ok(Bound::from_inner(inner));
        }

        let ctx = BindContext {
            store: &self.inner.store,
            config: &self.inner.config,
            runtime: &self.inner.runtime,
            registry: Arc::downgrade(&self.inner.registry),
        };
        let bound = Bound::establish(ctx, route.clone(), request)?;
        let inner = Arc::clone(bound.inner());
        entries.insert(
            route,
            RegistryEntry {
                binding: inner.clone(),
                detach: inner,
            },
        );
        Ok(bound)
    }

    /// Existing binding for `route`.
    ///
    /// # Errors
    ///
    /// [`BindError::NotBound`] when nothing is bound there and
    /// [`BindError::RouteTypeMismatch`] when it is bound with another type.
    pub fn binding<T: BoundData>(&self, route: &str) -> Result<Bound<T>, BindError> {
        let entries = self.inner.registry.entries.lock();
        let entry = entries.get(route).ok_or_else(|| BindError::NotBound {
            route: route.to_string(),
        })?;
        Arc::clone(&entry.binding)
            .downcast::<BoundInner<T>>()
            .map(Bound::from_inner)
            .map_err(|_| BindError::RouteTypeMismatch {
                route: route.to_string(),
            })
    }

    /// Routes with a live binding, sorted.
    pub fn routes(&self) -> Vec<Route> {
        self.inner.registry.routes()
    }

    /// Disconnect the binding on `route`. Returns whether one existed.
    pub fn disconnect(&self, route: &str) -> bool {
        let Ok(route) = Route::new(route) else {
            return false;
        };
        match self.inner.registry.take(&route) {
            Some(entry) => {
                entry.detach.detach();
                true
            }
            None => false,
        }
    }

    /// Disconnect every binding and raw subscription.
    ///
    /// Existing [`Bound`] handles keep working as local values. Further
    /// [`connect`](Self::connect) and [`subscribe`](Self::subscribe) calls
    /// fail with [`BindError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.inner.registry.drain() {
            entry.detach.detach();
        }
        let subscriptions: Vec<_> = self.inner.subscriptions.lock().drain().collect();
        for handle in subscriptions {
            self.inner.store.unsubscribe(&handle.route, handle.listener);
        }
        tracing::debug!("sync session disposed");
    }

    /// Listen to every state change on `route`, local echoes included.
    ///
    /// `callback` receives the decoded state. Payloads without state or
    /// that fail to decode are skipped.
    pub fn subscribe<F>(&self, route: &str, callback: F) -> Result<SubscriptionHandle, BindError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let route = Route::new(route)?;
        let handler: EventHandler = Arc::new(move |event: &StoreEvent| {
            let state = Envelope::decode(&event.payload).and_then(|envelope| envelope.state());
            match state {
                Ok(Some(state)) => callback(&Value::Object(state)),
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(route = %event.route, error = %err, "skipping malformed event");
                }
            }
        });
        let listener = self.inner.store.subscribe(&route, handler);
        let handle = SubscriptionHandle { route, listener };
        self.inner.subscriptions.lock().insert(handle.clone());
        Ok(handle)
    }

    /// Remove a raw subscription. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.inner.subscriptions.lock().remove(handle);
        if !self.inner.store.unsubscribe(&handle.route, handle.listener) {
            tracing::trace!(route = %handle.route, listener = %handle.listener, "no such subscription");
        }
    }

    /// Every entry in the store.
    pub async fn all_entries(&self) -> Result<Vec<StoredEntry>, StoreError> {
        self.entries_with_prefix("").await
    }

    /// Entries whose key starts with `prefix`.
    pub async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let raw = self.inner.store.scan_prefix(prefix).await?;
        Ok(decode_entries(raw))
    }

    /// Entries with `start <= key`, and `key < end` when `end` is given.
    pub async fn entries_in_range(
        &self,
        start: &str,
        end: Option<&str>,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let raw = self.inner.store.scan_range(start, end).await?;
        Ok(decode_entries(raw))
    }

    /// Delete the stored entry for `route`.
    ///
    /// A live binding on the route keeps its local value.
    pub async fn remove(&self, route: &str) -> Result<(), BindError> {
        let route = Route::new(route)?;
        self.inner.store.remove(&route).await?;
        Ok(())
    }
}

fn decode_entries(raw: Vec<(String, String)>) -> Vec<StoredEntry> {
    raw.into_iter()
        .map(|(key, payload)| StoredEntry::decode(key, &payload))
        .collect()
}
