//! Allot-Bind: Reactive State Bindings over a Replicated Store
//!
//! This crate binds a piece of local state to a shared, replicated key (a
//! *route*). Local writes are applied at once, notified to callbacks and
//! pushed to peers in the background; writes arriving from peers are merged
//! back field by field. Callers never write networking code.
//!
//! # Architecture Overview
//!
//! - [`reactive`]: the change-observing wrapper. Every write yields an
//!   `(old, new)` snapshot pair and runs the registered callbacks.
//! - [`schedule`]: throttle and debounce utilities pacing outbound syncs.
//! - [`reconcile`]: decodes remote and bootstrap payloads and merges them.
//! - [`SyncSession`]: connects [`BindingRequest`]s to [`Bound`] handles and
//!   keeps one binding per route.
//! - [`channel`]: latest-value and bounded-history message channels.
//!
//! The replicated store is an external collaborator reached only through
//! [`StoreEffects`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use allot_bind::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! async fn run(store: Arc<dyn StoreEffects>) -> Result<(), BindError> {
//!     let session = SyncSession::new(store)?;
//!     let counter = session.connect(
//!         BindingRequest::new("counter", Counter { count: 0 })
//!             .on_remote_change(|old: &Counter, new: &Counter| {
//!                 println!("peer moved {} -> {}", old.count, new.count);
//!                 Ok(())
//!             }),
//!     )?;
//!
//!     counter.update(|c| c.count += 1);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

// =============================================================================
// Foundation
// =============================================================================

/// Error types for bindings, the store and the wire codec
pub mod errors;

/// Validated route keys
pub mod route;

/// Store envelope codec
pub mod wire;

/// Store collaborator interface
pub mod effects;

/// Session-wide binding defaults
pub mod config;

// =============================================================================
// Core
// =============================================================================

pub mod reactive;

pub mod schedule;

pub mod reconcile;

mod bootstrap;

/// Binding requests and live binding handles
pub mod binding;

/// Sync sessions and store queries
pub mod session;

pub mod channel;

/// Convenience re-exports
pub mod prelude;

pub use binding::{Bound, BindingRequest, PersistMode};
pub use channel::{BoundedChannel, ChannelBuilder, Message, Slot, WatchChannel};
pub use config::{BindConfig, CallbackFailureLog, DEFAULT_THROTTLE_INTERVAL_MS};
pub use effects::{EventHandler, EventOrigin, ListenerId, StoreEffects, StoreEvent};
pub use errors::{BindError, BindResult, StoreError, WireError};
pub use reactive::{
    change_fn, BoundData, CallbackResult, CallbackSet, ChangeFn, ChangeOrigin, FailurePolicy,
    Observed,
};
pub use route::Route;
pub use schedule::{debounce, throttle, Debounce, Scheduler, SyncStrategy, Throttle};
pub use session::{StoredEntry, SubscriptionHandle, SyncSession, SyncSessionBuilder};
pub use wire::{Clock, Envelope};
