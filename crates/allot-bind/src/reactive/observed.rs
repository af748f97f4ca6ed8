//! Observed<T> - write-intercepting wrapper around bound data.
//!
//! Every write goes through [`Observed::update`], [`Observed::set`] or
//! [`Observed::patch`]. A write:
//!
//! 1. applies to the wrapped value under its lock,
//! 2. takes an `old` clone before and a `new` clone after,
//! 3. runs the callbacks for [`ChangeOrigin::Local`] in dispatch order, each
//!    isolated by the [`FailurePolicy`],
//! 4. hands `new` to the write sink (the binding's outbound scheduler).
//!
//! Remote merges enter through [`Observed::merge_remote`] and follow the same
//! steps with [`ChangeOrigin::Remote`] and no write sink. Crate-internal
//! remote hooks run ahead of the remote callbacks and cannot be replaced
//! through the public callback setters.
//!
//! The value never moves: handles stay valid across merges and every reader
//! sees merged state on its next read. No lock is held while callbacks or the
//! sink run, so callbacks may read or write the binding again.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::callbacks::{CallbackSet, ChangeFn, ChangeOrigin, FailurePolicy};
use super::merge::merge_fields;
use super::BoundData;
use crate::errors::BindError;
use crate::wire::Clock;

/// Receives the post-write snapshot of every local write.
pub type WriteSink<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObservedState<T> {
    data: T,
    clock: Option<Clock>,
}

struct ObservedInner<T> {
    route: String,
    state: Mutex<ObservedState<T>>,
    callbacks: RwLock<CallbackSet<T>>,
    remote_hooks: RwLock<Vec<ChangeFn<T>>>,
    policy: FailurePolicy,
    sink: Option<WriteSink<T>>,
}

/// Result of merging a remote payload.
#[derive(Debug)]
pub enum MergeOutcome {
    /// State changed and callbacks ran
    Applied,
    /// The payload carried no fields
    Empty,
    /// The payload clock does not advance the recorded clock
    Stale {
        /// Clock of the payload
        incoming: Clock,
        /// Highest clock already merged
        current: Clock,
    },
    /// The payload does not fit the bound type
    Rejected(BindError),
}

/// Write-intercepting wrapper around a value of type `T`.
pub struct Observed<T> {
    inner: Arc<ObservedInner<T>>,
}

/// Non-owning handle to an [`Observed`].
pub struct WeakObserved<T> {
    inner: Weak<ObservedInner<T>>,
}

impl<T> Clone for WeakObserved<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakObserved<T> {
    /// Recover the owning handle if the value is still alive.
    pub fn upgrade(&self) -> Option<Observed<T>> {
        self.inner.upgrade().map(|inner| Observed { inner })
    }
}

impl<T> Clone for Observed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Observed")
            .field("route", &self.inner.route)
            .field("data", &state.data)
            .field("clock", &state.clock)
            .finish()
    }
}

impl<T: BoundData> Observed<T> {
    /// Wrap `initial`. `route` labels log output.
    pub fn new(
        route: impl Into<String>,
        initial: T,
        callbacks: CallbackSet<T>,
        policy: FailurePolicy,
        sink: Option<WriteSink<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(ObservedInner {
                route: route.into(),
                state: Mutex::new(ObservedState {
                    data: initial,
                    clock: None,
                }),
                callbacks: RwLock::new(callbacks),
                remote_hooks: RwLock::new(Vec::new()),
                policy,
                sink,
            }),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.state.lock().data.clone()
    }

    /// Borrow the current value for the duration of `f`.
    ///
    /// `f` runs under the value lock and must not touch this binding.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.lock().data)
    }

    /// Highest store clock merged so far.
    pub fn clock(&self) -> Option<Clock> {
        self.inner.state.lock().clock
    }

    /// Mutate the value in place as a local write.
    ///
    /// `f` runs under the value lock and must not touch this binding.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let (old, new) = {
            let mut state = self.inner.state.lock();
            let old = state.data.clone();
            f(&mut state.data);
            (old, state.data.clone())
        };
        self.after_local_write(&old, &new);
    }

    /// Replace the value as a local write.
    pub fn set(&self, value: T) {
        self.update(|data| *data = value);
    }

    /// Overwrite the named fields as a local write.
    ///
    /// Nothing changes and no callback runs when the patched value does not
    /// deserialize as `T`.
    pub fn patch(&self, patch: &Map<String, Value>) -> Result<(), BindError> {
        let (old, new) = {
            let mut state = self.inner.state.lock();
            let merged = merge_fields(&state.data, patch)?;
            let old = std::mem::replace(&mut state.data, merged);
            (old, state.data.clone())
        };
        self.after_local_write(&old, &new);
        Ok(())
    }

    /// Merge a decoded remote payload field by field.
    ///
    /// A payload carrying a clock is merged only when the clock is greater
    /// than every clock merged before; payloads without a clock always merge.
    pub fn merge_remote(&self, patch: &Map<String, Value>, clock: Option<Clock>) -> MergeOutcome {
        let (old, new) = {
            let mut state = self.inner.state.lock();
            if let (Some(incoming), Some(current)) = (clock, state.clock) {
                if incoming <= current {
                    return MergeOutcome::Stale { incoming, current };
                }
            }
            if patch.is_empty() {
                return MergeOutcome::Empty;
            }
            let merged = match merge_fields(&state.data, patch) {
                Ok(merged) => merged,
                Err(err) => return MergeOutcome::Rejected(err),
            };
            if clock.is_some() {
                state.clock = clock;
            }
            let old = std::mem::replace(&mut state.data, merged);
            (old, state.data.clone())
        };
        let hooks = self.inner.remote_hooks.read().clone();
        for hook in &hooks {
            self.inner.policy.invoke(
                &self.inner.route,
                ChangeOrigin::Remote,
                "remote_hook",
                hook,
                &old,
                &new,
            );
        }
        self.notify(ChangeOrigin::Remote, &old, &new);
        MergeOutcome::Applied
    }

    fn after_local_write(&self, old: &T, new: &T) {
        self.notify(ChangeOrigin::Local, old, new);
        if let Some(sink) = &self.inner.sink {
            sink(new);
        }
    }

    fn notify(&self, origin: ChangeOrigin, old: &T, new: &T) {
        let callbacks = self.inner.callbacks.read().ordered(origin);
        self.inner
            .policy
            .dispatch(&self.inner.route, origin, &callbacks, old, new);
    }
}

impl<T> Observed<T> {
    /// Replace the `on_change` callback.
    pub fn set_on_change(&self, callback: ChangeFn<T>) {
        self.inner.callbacks.write().on_change = Some(callback);
    }

    /// Replace the `on_local_change` callback.
    pub fn set_on_local_change(&self, callback: ChangeFn<T>) {
        self.inner.callbacks.write().on_local_change = Some(callback);
    }

    /// Replace the `on_remote_change` callback.
    pub fn set_on_remote_change(&self, callback: ChangeFn<T>) {
        self.inner.callbacks.write().on_remote_change = Some(callback);
    }

    /// Append to the callback list.
    pub fn add_change_callback(&self, callback: ChangeFn<T>) {
        self.inner.callbacks.write().callbacks.push(callback);
    }

    /// Fold a set of callbacks in (see [`CallbackSet::absorb`]).
    pub fn absorb_callbacks(&self, callbacks: CallbackSet<T>) {
        self.inner.callbacks.write().absorb(callbacks);
    }

    pub(crate) fn add_remote_hooks(&self, hooks: Vec<ChangeFn<T>>) {
        self.inner.remote_hooks.write().extend(hooks);
    }

    /// Label used in log output.
    pub fn route(&self) -> &str {
        &self.inner.route
    }

    /// Non-owning handle, used by store listeners so that a dropped binding
    /// is not kept alive by its subscription.
    pub fn downgrade(&self) -> WeakObserved<T> {
        WeakObserved {
            inner: Arc::downgrade(&self.inner),
        }
    }
}
