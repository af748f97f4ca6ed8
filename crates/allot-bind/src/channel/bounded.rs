use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{slot_callback, ChannelBuilder, Message, Slot};
use crate::binding::Bound;
use crate::errors::BindError;
use crate::reactive::{change_fn, CallbackResult, ChangeFn};
use crate::route::Route;
use crate::schedule::SyncStrategy;
use crate::session::SyncSession;

/// Fixed-capacity FIFO of received messages.
#[derive(Debug)]
struct History<M> {
    bound: usize,
    items: VecDeque<M>,
}

impl<M: Clone> History<M> {
    fn new(bound: usize) -> Self {
        Self {
            bound,
            items: VecDeque::with_capacity(bound),
        }
    }

    fn push(&mut self, msg: M) {
        if self.items.len() == self.bound {
            self.items.pop_front();
        }
        self.items.push_back(msg);
    }

    fn to_vec(&self) -> Vec<M> {
        self.items.iter().cloned().collect()
    }
}

/// Remote hook recording every received message into `history`.
fn recorder<M: Message>(history: Arc<Mutex<History<M>>>) -> ChangeFn<Slot<M>> {
    change_fn(move |_old: &Slot<M>, new: &Slot<M>| {
        if let Some(msg) = &new.msg {
            history.lock().push(msg.clone());
        }
        Ok(())
    })
}

/// Latest-value channel that also keeps the last `bound` messages received
/// from peers.
///
/// Sends are not throttled; each one is broadcast immediately. Only remote
/// messages enter the history, oldest evicted first. Recording happens
/// before any message callback runs and is not affected by replacing
/// callbacks, including through [`binding`](Self::binding).
pub struct BoundedChannel<M> {
    bound: Bound<Slot<M>>,
    history: Arc<Mutex<History<M>>>,
}

impl<M> Clone for BoundedChannel<M> {
    fn clone(&self) -> Self {
        Self {
            bound: self.bound.clone(),
            history: Arc::clone(&self.history),
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for BoundedChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("bound", &self.bound)
            .field("history", &*self.history.lock())
            .finish()
    }
}

impl<M: Message> BoundedChannel<M> {
    /// Start configuring a channel on `route`.
    pub fn builder(route: impl Into<String>) -> ChannelBuilder<M> {
        ChannelBuilder::new(route)
    }

    /// Connect a channel on `route` keeping `bound` received messages.
    ///
    /// # Errors
    ///
    /// [`BindError::InvalidBound`] when `bound` is zero, plus the errors of
    /// [`SyncSession::connect`].
    pub fn connect(
        session: &SyncSession,
        route: impl Into<String>,
        bound: usize,
    ) -> Result<Self, BindError> {
        Self::builder(route).connect_bounded(session, bound)
    }

    /// Publish `msg`.
    pub fn send(&self, msg: M) {
        self.bound.update(|slot| slot.msg = Some(msg));
    }

    /// Latest message, local or remote.
    pub fn read(&self) -> Option<M> {
        self.bound.read(|slot| slot.msg.clone())
    }

    /// Retained remote messages, oldest first.
    pub fn read_all(&self) -> Vec<M> {
        self.history.lock().to_vec()
    }

    /// History capacity.
    pub fn capacity(&self) -> usize {
        self.history.lock().bound
    }

    /// Replace the `on_msg` callback.
    pub fn on_msg<F>(&self, f: F)
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.bound.observed().set_on_change(slot_callback(Arc::new(f)));
    }

    /// Replace the `on_local_msg` callback.
    pub fn on_local_msg<F>(&self, f: F)
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.bound
            .observed()
            .set_on_local_change(slot_callback(Arc::new(f)));
    }

    /// Replace the `on_remote_msg` callback. History recording is kept.
    pub fn on_remote_msg<F>(&self, f: F)
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.bound
            .observed()
            .set_on_remote_change(slot_callback(Arc::new(f)));
    }

    /// Append a callback for every message.
    pub fn add_msg_callback<F>(&self, f: F)
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.bound
            .observed()
            .add_change_callback(slot_callback(Arc::new(f)));
    }

    /// Channel route.
    pub fn route(&self) -> &Route {
        self.bound.route()
    }

    /// Underlying binding.
    pub fn binding(&self) -> &Bound<Slot<M>> {
        &self.bound
    }

    /// Stop sending and receiving. The history is kept.
    pub fn disconnect(&self) {
        self.bound.disconnect();
    }
}

impl<M: Message> ChannelBuilder<M> {
    /// Connect as a [`BoundedChannel`] keeping `bound` received messages.
    ///
    /// # Errors
    ///
    /// [`BindError::InvalidBound`] when `bound` is zero,
    /// [`BindError::RouteInUse`] when the session already binds the route,
    /// plus the errors of [`SyncSession::connect`].
    pub fn connect_bounded(
        self,
        session: &SyncSession,
        bound: usize,
    ) -> Result<BoundedChannel<M>, BindError> {
        if bound == 0 {
            return Err(BindError::InvalidBound { bound });
        }
        let history = Arc::new(Mutex::new(History::new(bound)));
        let request = self
            .into_request(Some(SyncStrategy::Immediate))
            .with_remote_hook(recorder(Arc::clone(&history)));
        Ok(BoundedChannel {
            bound: session.connect_exclusive(request)?,
            history,
        })
    }
}
