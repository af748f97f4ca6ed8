//! Leading-edge throttle with a single trailing call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::errors::BindError;

struct ThrottleState<A> {
    cooling: bool,
    pending: Option<A>,
}

struct ThrottleInner<A> {
    func: Box<dyn Fn(A) + Send + Sync>,
    interval: Duration,
    runtime: Handle,
    state: Mutex<ThrottleState<A>>,
}

/// Rate-limited wrapper around a function.
///
/// The first call outside a cooldown window runs immediately and opens a
/// window of `interval`. Calls made while the window is open overwrite a
/// single pending argument slot. When the window closes, the pending call
/// (if any) runs and a new window opens; otherwise the throttle goes idle.
///
/// Each window therefore produces at most one leading and one trailing call,
/// and the trailing call always carries the most recent arguments.
pub struct Throttle<A> {
    inner: Arc<ThrottleInner<A>>,
}

impl<A> Clone for Throttle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Throttle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Throttle")
            .field("interval", &self.inner.interval)
            .field("cooling", &state.cooling)
            .field("pending", &state.pending.is_some())
            .finish()
    }
}

impl<A: Send + 'static> Throttle<A> {
    /// Wrap `func`, running cooldown timers on `runtime`.
    pub fn new<F>(runtime: Handle, interval: Duration, func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ThrottleInner {
                func: Box::new(func),
                interval,
                runtime,
                state: Mutex::new(ThrottleState {
                    cooling: false,
                    pending: None,
                }),
            }),
        }
    }

    /// Invoke the throttled function.
    pub fn call(&self, args: A) {
        {
            let mut state = self.inner.state.lock();
            if state.cooling {
                state.pending = Some(args);
                return;
            }
            state.cooling = true;
        }

        // The window must close even if `func` unwinds.
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move { inner.cooldown().await });

        (self.inner.func)(args);
    }

    /// Whether a cooldown window is currently open.
    pub fn is_cooling(&self) -> bool {
        self.inner.state.lock().cooling
    }

    /// Whether a suppressed call is waiting for the window to close.
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// Length of a cooldown window.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

impl<A> ThrottleInner<A> {
    async fn cooldown(&self) {
        loop {
            tokio::time::sleep(self.interval).await;
            let next = {
                let mut state = self.state.lock();
                match state.pending.take() {
                    Some(args) => args,
                    None => {
                        state.cooling = false;
                        return;
                    }
                }
            };
            (self.func)(next);
        }
    }
}

/// Throttle `func` to at most one leading and one trailing call per
/// `interval`, using the ambient tokio runtime.
pub fn throttle<A, F>(interval: Duration, func: F) -> Result<Throttle<A>, BindError>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    if interval.is_zero() {
        return Err(BindError::InvalidInterval { interval });
    }
    let runtime = Handle::try_current().map_err(|e| BindError::NoRuntime {
        reason: e.to_string(),
    })?;
    Ok(Throttle::new(runtime, interval, func))
}
