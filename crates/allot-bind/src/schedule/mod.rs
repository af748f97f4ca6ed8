//! Outbound call scheduling.
//!
//! - [`Throttle`]: at most one leading and one trailing call per window.
//! - [`Debounce`]: one call after a quiet period.
//!
//! Bindings pick one through [`SyncStrategy`]; [`Scheduler`] is the
//! resulting callable.

mod debounce;
mod throttle;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

pub use debounce::{debounce, Debounce};
pub use throttle::{throttle, Throttle};

/// How a binding paces its outbound sync calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Throttle to one leading and one trailing call per interval
    Throttle(Duration),
    /// Send once writes have been quiet for the interval
    Debounce(Duration),
    /// Send on every write
    Immediate,
}

impl SyncStrategy {
    pub(crate) fn interval(self) -> Option<Duration> {
        match self {
            Self::Throttle(interval) | Self::Debounce(interval) => Some(interval),
            Self::Immediate => None,
        }
    }
}

/// A function paced according to a [`SyncStrategy`].
pub enum Scheduler<A> {
    /// Throttled calls
    Throttle(Throttle<A>),
    /// Debounced calls
    Debounce(Debounce<A>),
    /// Direct calls
    Immediate(Arc<dyn Fn(A) + Send + Sync>),
}

impl<A> fmt::Debug for Scheduler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Throttle(t) => t.fmt(f),
            Self::Debounce(d) => d.fmt(f),
            Self::Immediate(_) => f.write_str("Immediate"),
        }
    }
}

impl<A: Send + 'static> Scheduler<A> {
    /// Pace `func` according to `strategy`.
    pub fn new<F>(runtime: Handle, strategy: SyncStrategy, func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        match strategy {
            SyncStrategy::Throttle(interval) => Self::Throttle(Throttle::new(runtime, interval, func)),
            SyncStrategy::Debounce(delay) => Self::Debounce(Debounce::new(runtime, delay, func)),
            SyncStrategy::Immediate => Self::Immediate(Arc::new(func)),
        }
    }

    /// Submit a call.
    pub fn call(&self, args: A) {
        match self {
            Self::Throttle(t) => t.call(args),
            Self::Debounce(d) => d.call(args),
            Self::Immediate(f) => f(args),
        }
    }
}
