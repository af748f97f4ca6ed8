//! Binding sessions: one route, one observed value, one outbound scheduler.
//!
//! [`SyncSession::connect`](crate::SyncSession::connect) turns a
//! [`BindingRequest`] into a live [`Bound`] handle:
//!
//! 1. build the outbound sync function for the route and persistence mode,
//!    paced by the request's [`SyncStrategy`];
//! 2. wrap the initial data in an [`Observed`] whose write sink feeds that
//!    scheduler;
//! 3. subscribe a reconciler for the route;
//! 4. hand back the [`Bound`] handle, usable immediately with the initial
//!    data;
//! 5. in the background, bootstrap from the store (durable) or share the
//!    initial data with peers (ephemeral). See [`crate::bootstrap`].
//!
//! Steps 1-4 are synchronous. Nothing after step 4 can fail the caller.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::bootstrap;
use crate::config::BindConfig;
use crate::effects::{ListenerId, StoreEffects};
use crate::errors::{BindError, WireError};
use crate::reactive::{
    to_object, BoundData, CallbackResult, CallbackSet, ChangeFn, FailurePolicy, Observed,
    WriteSink,
};
use crate::reconcile::subscription_handler;
use crate::route::Route;
use crate::schedule::{Scheduler, SyncStrategy};
use crate::session::Registry;
use crate::wire::{json_kind, Clock};

/// How local writes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistMode {
    /// CRDT put; survives disconnection
    Durable,
    /// Broadcast to connected peers only
    Ephemeral,
}

impl PersistMode {
    /// Mode for a `persist` flag.
    pub fn from_persist(persist: bool) -> Self {
        if persist {
            Self::Durable
        } else {
            Self::Ephemeral
        }
    }
}

/// Everything needed to bind data to a route.
///
/// Options left unset fall back to the session's [`BindConfig`].
pub struct BindingRequest<T> {
    route: String,
    initial: T,
    callbacks: CallbackSet<T>,
    remote_hooks: Vec<ChangeFn<T>>,
    persist: Option<bool>,
    strategy: Option<SyncStrategy>,
}

impl<T> fmt::Debug for BindingRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRequest")
            .field("route", &self.route)
            .field("callbacks", &self.callbacks)
            .field("remote_hooks", &self.remote_hooks.len())
            .field("persist", &self.persist)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl<T: BoundData> BindingRequest<T> {
    /// Bind `initial` to `route`.
    pub fn new(route: impl Into<String>, initial: T) -> Self {
        Self {
            route: route.into(),
            initial,
            callbacks: CallbackSet::default(),
            remote_hooks: Vec::new(),
            persist: None,
            strategy: None,
        }
    }

    /// Callback for every change.
    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.callbacks.on_change = Some(Arc::new(f));
        self
    }

    /// Callback for local writes.
    pub fn on_local_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.callbacks.on_local_change = Some(Arc::new(f));
        self
    }

    /// Callback for remote and bootstrap merges.
    pub fn on_remote_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.callbacks.on_remote_change = Some(Arc::new(f));
        self
    }

    /// Append a callback for every change.
    pub fn with_change_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.callbacks.callbacks.push(Arc::new(f));
        self
    }

    /// Append an already boxed callback.
    pub fn with_change_fn(mut self, f: ChangeFn<T>) -> Self {
        self.callbacks.callbacks.push(f);
        self
    }

    /// Fold in a prepared [`CallbackSet`]: its slots replace the request's,
    /// its list is appended.
    pub fn with_callbacks(mut self, callbacks: CallbackSet<T>) -> Self {
        self.callbacks.absorb(callbacks);
        self
    }

    /// Durable (`true`) or ephemeral (`false`) writes.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Throttle outbound syncs to `interval`.
    pub fn throttle_interval(mut self, interval: Duration) -> Self {
        self.strategy = Some(SyncStrategy::Throttle(interval));
        self
    }

    /// Sync once writes have been quiet for `delay`.
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.strategy = Some(SyncStrategy::Debounce(delay));
        self
    }

    /// Sync on every write.
    pub fn unthrottled(mut self) -> Self {
        self.strategy = Some(SyncStrategy::Immediate);
        self
    }

    /// Pace outbound syncs with `strategy`.
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Requested route string.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Remote-only callback that runs before `on_remote_change` and is not
    /// replaced by later callback registration.
    pub(crate) fn with_remote_hook(mut self, hook: ChangeFn<T>) -> Self {
        self.remote_hooks.push(hook);
        self
    }

    pub(crate) fn into_parts(self) -> (CallbackSet<T>, Vec<ChangeFn<T>>) {
        (self.callbacks, self.remote_hooks)
    }
}

/// Outbound half of a binding: pushes encoded state to the store.
#[derive(Clone)]
struct Outbound {
    store: Arc<dyn StoreEffects>,
    route: Route,
    mode: PersistMode,
    runtime: Handle,
    detached: Arc<AtomicBool>,
}

impl Outbound {
    fn send(&self, data: String) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        let store = Arc::clone(&self.store);
        let route = self.route.clone();
        let mode = self.mode;
        self.runtime.spawn(async move {
            let result = match mode {
                PersistMode::Durable => store.put(&route, data).await,
                PersistMode::Ephemeral => store.share(&route, data).await,
            };
            if let Err(err) = result {
                match mode {
                    PersistMode::Durable => {
                        tracing::warn!(route = %route, error = %err, "durable put failed");
                    }
                    PersistMode::Ephemeral => {
                        tracing::debug!(route = %route, error = %err, "share failed");
                    }
                }
            }
        });
    }
}

pub(crate) struct BoundInner<T> {
    route: Route,
    mode: PersistMode,
    observed: Observed<T>,
    store: Arc<dyn StoreEffects>,
    listener: Mutex<Option<ListenerId>>,
    detached: Arc<AtomicBool>,
    bootstrapped: watch::Receiver<bool>,
    registry: Weak<Registry>,
}

/// Type-erased teardown used by the session registry.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self);
}

impl<T: Send + Sync + 'static> Detach for BoundInner<T> {
    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        if let Some(listener) = self.listener.lock().take() {
            self.store.unsubscribe(&self.route, listener);
            tracing::debug!(route = %self.route, %listener, "binding disconnected");
        }
    }
}

/// Live handle to data bound to a route.
///
/// Cloning yields another handle to the same binding. Reads see remote and
/// bootstrap merges as soon as they land; writes are applied locally,
/// notified, and synced in the background.
pub struct Bound<T> {
    inner: Arc<BoundInner<T>>,
}

impl<T> Clone for Bound<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Bound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("route", &self.inner.route)
            .field("mode", &self.inner.mode)
            .field("observed", &self.inner.observed)
            .finish()
    }
}

/// Shared pieces a binding is built from.
pub(crate) struct BindContext<'a> {
    pub store: &'a Arc<dyn StoreEffects>,
    pub config: &'a BindConfig,
    pub runtime: &'a Handle,
    pub registry: Weak<Registry>,
}

impl<T: BoundData> Bound<T> {
    pub(crate) fn establish(
        ctx: BindContext<'_>,
        route: Route,
        request: BindingRequest<T>,
    ) -> Result<Self, BindError> {
        to_object(&request.initial)?;

        let mode = PersistMode::from_persist(request.persist.unwrap_or(ctx.config.persist));
        let strategy = request
            .strategy
            .unwrap_or(SyncStrategy::Throttle(ctx.config.throttle_interval()));
        if let Some(interval) = strategy.interval().filter(|i| i.is_zero()) {
            return Err(BindError::InvalidInterval { interval });
        }

        let detached = Arc::new(AtomicBool::new(false));
        let outbound = Outbound {
            store: Arc::clone(ctx.store),
            route: route.clone(),
            mode,
            runtime: ctx.runtime.clone(),
            detached: Arc::clone(&detached),
        };
        let scheduler = Scheduler::new(ctx.runtime.clone(), strategy, move |data: String| {
            outbound.send(data);
        });
        let sink_route = route.clone();
        let sink: WriteSink<T> = Arc::new(move |new: &T| match serde_json::to_string(new) {
            Ok(data) => scheduler.call(data),
            Err(err) => {
                tracing::warn!(route = %sink_route, error = %err, "cannot encode bound data");
            }
        });

        let observed = Observed::new(
            route.as_str(),
            request.initial,
            request.callbacks,
            FailurePolicy::new(ctx.config.callback_failures),
            Some(sink),
        );
        observed.add_remote_hooks(request.remote_hooks);
        let listener = ctx
            .store
            .subscribe(&route, subscription_handler(observed.downgrade()));

        let (done_tx, done_rx) = watch::channel(false);
        bootstrap::spawn(
            ctx.runtime,
            Arc::clone(ctx.store),
            route.clone(),
            mode,
            observed.downgrade(),
            done_tx,
        );

        tracing::debug!(route = %route, ?mode, ?strategy, %listener, "binding established");

        Ok(Self {
            inner: Arc::new(BoundInner {
                route,
                mode,
                observed,
                store: Arc::clone(ctx.store),
                listener: Mutex::new(Some(listener)),
                detached,
                bootstrapped: done_rx,
                registry: ctx.registry,
            }),
        })
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.observed.get()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.observed.read(f)
    }

    /// Mutate the value as a local write.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.observed.update(f);
    }

    /// Replace the value as a local write.
    pub fn set(&self, value: T) {
        self.inner.observed.set(value);
    }

    /// Overwrite the fields named in a JSON object as a local write.
    pub fn patch(&self, patch: Value) -> Result<(), BindError> {
        match patch {
            Value::Object(fields) => self.inner.observed.patch(&fields),
            other => Err(WireError::NotAnObject {
                found: json_kind(&other),
            }
            .into()),
        }
    }

    /// Highest store clock merged so far.
    pub fn clock(&self) -> Option<Clock> {
        self.inner.observed.clock()
    }

    /// Replace the `on_change` callback.
    pub fn on_change<F>(&self, f: F)
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.observed.set_on_change(Arc::new(f));
    }

    /// Replace the `on_local_change` callback.
    pub fn on_local_change<F>(&self, f: F)
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.observed.set_on_local_change(Arc::new(f));
    }

    /// Replace the `on_remote_change` callback.
    pub fn on_remote_change<F>(&self, f: F)
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.observed.set_on_remote_change(Arc::new(f));
    }

    /// Append a callback for every change.
    pub fn add_change_callback<F>(&self, f: F)
    where
        F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.observed.add_change_callback(Arc::new(f));
    }

    /// The observed value behind this handle.
    pub fn observed(&self) -> &Observed<T> {
        &self.inner.observed
    }

    /// Wait until the background bootstrap (or initial share) has finished.
    ///
    /// Returns immediately if it already has. Bootstrap failures are not
    /// reported here; they were logged and swallowed.
    pub async fn bootstrapped(&self) {
        let mut done = self.inner.bootstrapped.clone();
        // An Err means the task ended without reporting; either way it is over.
        let _ = done.wait_for(|finished| *finished).await;
    }

    /// Stop listening for remote changes and stop syncing local writes.
    ///
    /// The handle keeps working as a local value afterwards.
    pub fn disconnect(&self) {
        self.inner.detach();
        if let Some(registry) = self.inner.registry.upgrade() {
            let erased: Arc<dyn Any + Send + Sync> = self.inner.clone();
            registry.remove_if_same(&self.inner.route, &erased);
        }
    }
}

impl<T> Bound<T> {
    /// Bound route.
    pub fn route(&self) -> &Route {
        &self.inner.route
    }

    /// Persistence mode.
    pub fn mode(&self) -> PersistMode {
        self.inner.mode
    }

    /// Whether the binding still listens and syncs.
    pub fn is_connected(&self) -> bool {
        !self.inner.detached.load(Ordering::Acquire)
    }

    pub(crate) fn from_inner(inner: Arc<BoundInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<BoundInner<T>> {
        &self.inner
    }
}

impl<T> BoundInner<T> {
    pub(crate) fn observed(&self) -> &Observed<T> {
        &self.observed
    }
}
