//! Trailing-edge debounce.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::errors::BindError;

struct DebounceInner<A> {
    func: Arc<dyn Fn(A) + Send + Sync>,
    delay: Duration,
    runtime: Handle,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Delays a function until `delay` has elapsed with no further calls.
///
/// Every call restarts the delay and replaces the arguments; only the last
/// call of a quiet period runs.
pub struct Debounce<A> {
    inner: Arc<DebounceInner<A>>,
}

impl<A> Clone for Debounce<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Debounce<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debounce")
            .field("delay", &self.inner.delay)
            .finish_non_exhaustive()
    }
}

impl<A: Send + 'static> Debounce<A> {
    /// Wrap `func`, running its timer on `runtime`.
    pub fn new<F>(runtime: Handle, delay: Duration, func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DebounceInner {
                func: Arc::new(func),
                delay,
                runtime,
                timer: Mutex::new(None),
            }),
        }
    }

    /// Schedule `func(args)` after the delay, cancelling any earlier call
    /// that has not fired yet.
    pub fn call(&self, args: A) {
        let func = Arc::clone(&self.inner.func);
        let delay = self.inner.delay;
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            func(args);
        });
        if let Some(previous) = self.inner.timer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Drop the scheduled call, if any.
    pub fn cancel(&self) {
        if let Some(task) = self.inner.timer.lock().take() {
            task.abort();
        }
    }

    /// Whether a call is scheduled and has not fired.
    pub fn is_pending(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

/// Debounce `func` by `delay` on the ambient tokio runtime.
pub fn debounce<A, F>(delay: Duration, func: F) -> Result<Debounce<A>, BindError>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    if delay.is_zero() {
        return Err(BindError::InvalidInterval { interval: delay });
    }
    let runtime = Handle::try_current().map_err(|e| BindError::NoRuntime {
        reason: e.to_string(),
    })?;
    Ok(Debounce::new(runtime, delay, func))
}
