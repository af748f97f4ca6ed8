//! Common imports for binding code.
//!
//! ```rust
//! use allot_bind::prelude::*;
//! ```

pub use crate::binding::{Bound, BindingRequest, PersistMode};
pub use crate::channel::{BoundedChannel, Message, WatchChannel};
pub use crate::config::BindConfig;
pub use crate::effects::StoreEffects;
pub use crate::errors::{BindError, StoreError};
pub use crate::reactive::{BoundData, CallbackResult};
pub use crate::schedule::SyncStrategy;
pub use crate::session::{SubscriptionHandle, SyncSession};
