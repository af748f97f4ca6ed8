//! Change callbacks and their failure containment.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::CallbackFailureLog;

/// Outcome of a change callback. An `Err` is logged and otherwise ignored.
pub type CallbackResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Callback receiving the `(old, new)` snapshot pair of a change.
pub type ChangeFn<T> = Arc<dyn Fn(&T, &T) -> CallbackResult + Send + Sync>;

/// Box a closure as a [`ChangeFn`].
pub fn change_fn<T, F>(f: F) -> ChangeFn<T>
where
    F: Fn(&T, &T) -> CallbackResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Write made through the local handle
    Local,
    /// Merge of a remote or bootstrap payload
    Remote,
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Callbacks registered on one binding.
///
/// Dispatch order is fixed: `on_change`, then `on_local_change` or
/// `on_remote_change` depending on origin, then `callbacks` in registration
/// order.
pub struct CallbackSet<T> {
    /// Fired for every change
    pub on_change: Option<ChangeFn<T>>,
    /// Fired for local writes only
    pub on_local_change: Option<ChangeFn<T>>,
    /// Fired for remote merges only
    pub on_remote_change: Option<ChangeFn<T>>,
    /// Fired for every change, after the single-slot callbacks
    pub callbacks: Vec<ChangeFn<T>>,
}

impl<T> Default for CallbackSet<T> {
    fn default() -> Self {
        Self {
            on_change: None,
            on_local_change: None,
            on_remote_change: None,
            callbacks: Vec::new(),
        }
    }
}

impl<T> Clone for CallbackSet<T> {
    fn clone(&self) -> Self {
        Self {
            on_change: self.on_change.clone(),
            on_local_change: self.on_local_change.clone(),
            on_remote_change: self.on_remote_change.clone(),
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<T> fmt::Debug for CallbackSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("on_change", &self.on_change.is_some())
            .field("on_local_change", &self.on_local_change.is_some())
            .field("on_remote_change", &self.on_remote_change.is_some())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl<T> CallbackSet<T> {
    /// Callbacks to run for a change of `origin`, in dispatch order.
    pub fn ordered(&self, origin: ChangeOrigin) -> Vec<(&'static str, ChangeFn<T>)> {
        let by_origin = match origin {
            ChangeOrigin::Local => self.on_local_change.as_ref().map(|cb| ("on_local_change", cb)),
            ChangeOrigin::Remote => self.on_remote_change.as_ref().map(|cb| ("on_remote_change", cb)),
        };
        self.on_change
            .as_ref()
            .map(|cb| ("on_change", cb))
            .into_iter()
            .chain(by_origin)
            .chain(self.callbacks.iter().map(|cb| ("change_callback", cb)))
            .map(|(label, cb)| (label, Arc::clone(cb)))
            .collect()
    }

    /// Fold `other` into this set: provided single-slot callbacks replace the
    /// current ones and the callback list is appended.
    pub fn absorb(&mut self, other: CallbackSet<T>) {
        if other.on_change.is_some() {
            self.on_change = other.on_change;
        }
        if other.on_local_change.is_some() {
            self.on_local_change = other.on_local_change;
        }
        if other.on_remote_change.is_some() {
            self.on_remote_change = other.on_remote_change;
        }
        self.callbacks.extend(other.callbacks);
    }
}

/// Isolation policy for change callbacks.
///
/// Each callback runs on its own: a returned error or a panic is caught,
/// reported according to the configured log level, and dispatch moves on to
/// the next callback. Failures never reach the writer and are never retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePolicy {
    log: CallbackFailureLog,
}

impl FailurePolicy {
    /// Policy reporting at `log`.
    pub const fn new(log: CallbackFailureLog) -> Self {
        Self { log }
    }

    /// Run every callback for one change. Returns how many failed.
    pub fn dispatch<T>(
        &self,
        route: &str,
        origin: ChangeOrigin,
        callbacks: &[(&'static str, ChangeFn<T>)],
        old: &T,
        new: &T,
    ) -> usize {
        callbacks
            .iter()
            .filter(|(label, cb)| !self.invoke(route, origin, label, cb, old, new))
            .count()
    }

    /// Run one callback in isolation. Returns whether it succeeded.
    pub fn invoke<T>(
        &self,
        route: &str,
        origin: ChangeOrigin,
        label: &str,
        callback: &ChangeFn<T>,
        old: &T,
        new: &T,
    ) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(old, new))) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                self.report(route, origin, label, &err.to_string());
                false
            }
            Err(payload) => {
                self.report(route, origin, label, &panic_message(payload.as_ref()));
                false
            }
        }
    }

    fn report(&self, route: &str, origin: ChangeOrigin, label: &str, reason: &str) {
        match self.log {
            CallbackFailureLog::Warn => tracing::warn!(
                route,
                %origin,
                callback = label,
                reason,
                "change callback failed"
            ),
            CallbackFailureLog::Debug => tracing::debug!(
                route,
                %origin,
                callback = label,
                reason,
                "change callback failed"
            ),
            CallbackFailureLog::Off => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> ChangeFn<u32> {
        let log = Arc::clone(log);
        change_fn(move |_, _| {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn dispatch_order_follows_origin() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = CallbackSet {
            on_change: Some(recorder(&log, "change")),
            on_local_change: Some(recorder(&log, "local")),
            on_remote_change: Some(recorder(&log, "remote")),
            callbacks: vec![recorder(&log, "a"), recorder(&log, "b")],
        };
        let policy = FailurePolicy::default();

        policy.dispatch("r", ChangeOrigin::Local, &set.ordered(ChangeOrigin::Local), &0, &1);
        assert_eq!(*log.lock(), vec!["change", "local", "a", "b"]);

        log.lock().clear();
        policy.dispatch("r", ChangeOrigin::Remote, &set.ordered(ChangeOrigin::Remote), &0, &1);
        assert_eq!(*log.lock(), vec!["change", "remote", "a", "b"]);
    }

    #[test]
    fn failures_do_not_stop_later_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: ChangeFn<u32> = change_fn(|_, _| Err("boom".into()));
        let panicking: ChangeFn<u32> = change_fn(|_, _| panic!("kaboom"));
        let set = CallbackSet {
            callbacks: vec![failing, panicking, recorder(&log, "after")],
            ..CallbackSet::default()
        };

        let failed = FailurePolicy::new(CallbackFailureLog::Off).dispatch(
            "r",
            ChangeOrigin::Local,
            &set.ordered(ChangeOrigin::Local),
            &0,
            &1,
        );

        assert_eq!(failed, 2);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn absorb_replaces_slots_and_appends_list() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut base = CallbackSet {
            on_change: Some(recorder(&log, "old")),
            on_remote_change: Some(recorder(&log, "remote")),
            callbacks: vec![recorder(&log, "a")],
            ..CallbackSet::default()
        };
        base.absorb(CallbackSet {
            on_change: Some(recorder(&log, "new")),
            callbacks: vec![recorder(&log, "b")],
            ..CallbackSet::default()
        });

        FailurePolicy::default().dispatch(
            "r",
            ChangeOrigin::Remote,
            &base.ordered(ChangeOrigin::Remote),
            &0,
            &1,
        );
        assert_eq!(*log.lock(), vec!["new", "remote", "a", "b"]);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "panic");
    }
}
