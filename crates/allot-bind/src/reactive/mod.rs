//! # Reactive Layer
//!
//! Change interception and notification for bound data.
//!
//! ## Core Types
//!
//! - [`Observed<T>`]: wraps a value so that every write produces an
//!   `(old, new)` snapshot pair, runs the registered callbacks and feeds the
//!   outbound write sink.
//! - [`CallbackSet<T>`]: the `on_change` / `on_local_change` /
//!   `on_remote_change` slots plus an ordered callback list.
//! - [`FailurePolicy`]: runs each callback in isolation so an error or panic
//!   in one never reaches the writer or the callbacks after it.
//!
//! ## Invariants
//!
//! 1. `old` and `new` are independent clones; neither aliases the live value.
//! 2. Callbacks run in the order `on_change`, origin-specific slot, list.
//! 3. `on_local_change` and `on_remote_change` never fire for the same change.
//! 4. Remote merges overwrite fields in place; the value is never swapped
//!    for a new binding.

mod callbacks;
mod merge;
mod observed;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use callbacks::{change_fn, CallbackResult, CallbackSet, ChangeFn, ChangeOrigin, FailurePolicy};
pub use merge::{merge_fields, to_object};
pub use observed::{MergeOutcome, Observed, WeakObserved, WriteSink};

/// Data that can be bound to a route.
///
/// Bound values must serialize to a JSON object so that remote payloads can
/// be merged field by field.
pub trait BoundData: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> BoundData for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}
