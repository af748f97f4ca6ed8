//! Message channels over ephemeral bindings.
//!
//! A channel binds a one-field [`Slot`] to its route with ephemeral writes:
//! sending a message is a local write of the slot, broadcast to connected
//! peers and never stored.
//!
//! - [`WatchChannel`]: latest value only, throttled sends.
//! - [`BoundedChannel`]: also keeps the last `bound` received messages,
//!   every send goes out immediately.
//!
//! Channel callbacks receive the message itself rather than a snapshot
//! pair, and follow the same dispatch order and failure containment as
//! binding callbacks.

mod bounded;
mod watch;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::binding::BindingRequest;
use crate::reactive::{change_fn, CallbackResult, CallbackSet, ChangeFn};
use crate::schedule::SyncStrategy;

pub use bounded::BoundedChannel;
pub use watch::WatchChannel;

/// Payload type a channel can carry.
pub trait Message: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<M> Message for M where M: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Callback receiving a channel message.
pub type MsgFn<M> = Arc<dyn Fn(&M) -> CallbackResult + Send + Sync>;

/// State bound to a channel route.
///
/// An empty slot serializes to `{}`, which peers drop as carrying nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot<M> {
    /// Most recent message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<M>,
}

impl<M> Default for Slot<M> {
    fn default() -> Self {
        Self { msg: None }
    }
}

/// Wrap a message callback as a slot change callback. Empty slots are
/// skipped.
pub(crate) fn slot_callback<M: Message>(f: MsgFn<M>) -> ChangeFn<Slot<M>> {
    change_fn(move |_old: &Slot<M>, new: &Slot<M>| match &new.msg {
        Some(msg) => f(msg),
        None => Ok(()),
    })
}

/// Callbacks and pacing for a channel about to connect.
pub struct ChannelBuilder<M> {
    route: String,
    on_msg: Option<MsgFn<M>>,
    on_local_msg: Option<MsgFn<M>>,
    on_remote_msg: Option<MsgFn<M>>,
    msg_callbacks: Vec<MsgFn<M>>,
    throttle_interval: Option<Duration>,
}

impl<M> fmt::Debug for ChannelBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("route", &self.route)
            .field("on_msg", &self.on_msg.is_some())
            .field("on_local_msg", &self.on_local_msg.is_some())
            .field("on_remote_msg", &self.on_remote_msg.is_some())
            .field("msg_callbacks", &self.msg_callbacks.len())
            .field("throttle_interval", &self.throttle_interval)
            .finish()
    }
}

impl<M: Message> ChannelBuilder<M> {
    pub(crate) fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            on_msg: None,
            on_local_msg: None,
            on_remote_msg: None,
            msg_callbacks: Vec::new(),
            throttle_interval: None,
        }
    }

    /// Callback for every message.
    pub fn on_msg<F>(mut self, f: F) -> Self
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_msg = Some(Arc::new(f));
        self
    }

    /// Callback for messages sent from here.
    pub fn on_local_msg<F>(mut self, f: F) -> Self
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_local_msg = Some(Arc::new(f));
        self
    }

    /// Callback for messages from peers.
    pub fn on_remote_msg<F>(mut self, f: F) -> Self
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_remote_msg = Some(Arc::new(f));
        self
    }

    /// Append a callback for every message.
    pub fn with_msg_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&M) -> CallbackResult + Send + Sync + 'static,
    {
        self.msg_callbacks.push(Arc::new(f));
        self
    }

    /// Send throttle for [`WatchChannel`]. Ignored by [`BoundedChannel`].
    pub fn throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = Some(interval);
        self
    }

    /// Ephemeral binding request carrying the message callbacks.
    pub(crate) fn into_request(self, strategy: Option<SyncStrategy>) -> BindingRequest<Slot<M>> {
        let strategy = strategy.or(self.throttle_interval.map(SyncStrategy::Throttle));
        let callbacks = CallbackSet {
            on_change: self.on_msg.map(slot_callback),
            on_local_change: self.on_local_msg.map(slot_callback),
            on_remote_change: self.on_remote_msg.map(slot_callback),
            callbacks: self.msg_callbacks.into_iter().map(slot_callback).collect(),
        };
        let mut request = BindingRequest::new(self.route, Slot::default())
            .persist(false)
            .with_callbacks(callbacks);
        if let Some(strategy) = strategy {
            request = request.sync_strategy(strategy);
        }
        request
    }
}
