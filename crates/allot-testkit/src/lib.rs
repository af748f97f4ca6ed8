//! Allot Testing Infrastructure
//!
//! In-memory stand-ins for the replicated store so binding behaviour can be
//! tested without a real transport.
//!
//! - [`MemoryStore`]: a single replica implementing
//!   [`StoreEffects`](allot_bind::StoreEffects), with call recording,
//!   scripted bootstrap answers, fault and latency injection.
//! - [`MemoryNetwork`]: links several [`MemoryStore`]s so that writes on one
//!   reach the others as remote events.
//! - [`init_test_tracing`]: log output for tests, filtered by `RUST_LOG`.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! allot-testkit = { path = "../allot-testkit" }
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use allot_bind::SyncSession;
//! use allot_testkit::MemoryStore;
//!
//! async fn binds() {
//!     let store = MemoryStore::new("a");
//!     let session = SyncSession::new(Arc::new(store.clone())).unwrap();
//!     // ... test logic
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod logging;
pub mod network;
pub mod store;

pub use logging::init_test_tracing;
pub use network::MemoryNetwork;
pub use store::{MemoryStore, StoreCall, StoreOp};

/// Let spawned background tasks run to completion.
///
/// Yields to the scheduler a fixed number of times; enough for the task
/// chains a binding spawns (bootstrap, sync) on a current-thread runtime.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
