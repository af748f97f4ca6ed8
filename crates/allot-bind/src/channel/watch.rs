use std::fmt;
use std::sync::Arc;

use super::{slot_callback, ChannelBuilder, Message, Slot};
use crate::binding::Bound;
use crate::errors::BindError;
use crate::reactive::CallbackResult;
use crate::route::Route;
use crate::session::SyncSession;

/// Single-slot, latest-value channel.
///
/// [`send`](Self::send) overwrites the slot and broadcasts it, throttled to
/// the configured interval. [`read`](Self::read) returns whichever message
/// was applied last, local or remote. Nothing older is kept.
pub struct WatchChannel<M> {
    bound: Bound<Slot<M>>,
}

impl<M> Clone for WatchChannel<M> {
    fn clone(&self) -> Self {
        Self {
            bound: self.bound.clone(),
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for WatchChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchChannel")
            .field("bound", &self.bound)
            .finish()
    }
}

impl<M: Message> WatchChannel<M> {
    /// Start configuring a channel on `route`.
    pub fn builder(route: impl Into<String>) -> ChannelBuilder<M> {
        ChannelBuilder::new(route)
    }

    /// Connect a channel on `route` with session defaults.
    pub fn connect(session: &SyncSession, route: impl Into<String>) -> Result<Self, BindError> {
        Self::builder(route).connect_watch(session)
    }

    /// Publish `msg`.
    pub fn send(&self, msg: M) {
        self.bound.update(|slot| slot.msg = Some(msg));
    }

    /// Latest message, if any.
    pub fn read(&self) -> Option<M> {
        self.bound.read(|slot| slot.msg.clone())
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

    /// Replace the `on_remote_msg` callback.
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

    /// Stop sending and receiving.
    pub fn disconnect(&self) {
        self.bound.disconnect();
    }
}

impl<M: Message> ChannelBuilder<M> {
    /// Connect as a [`WatchChannel`].
    ///
    /// # Errors
    ///
    /// [`BindError::RouteInUse`] when the session already binds the route,
    /// plus the errors of [`SyncSession::connect`].
    pub fn connect_watch(self, session: &SyncSession) -> Result<WatchChannel<M>, BindError> {
        Ok(WatchChannel {
            bound: session.connect_exclusive(self.into_request(None))?,
        })
    }
}
