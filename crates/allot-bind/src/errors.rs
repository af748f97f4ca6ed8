//! Error types for bindings, the store collaborator and the wire codec.
//!
//! Three failure classes exist and each is handled at a different boundary:
//!
//! - **Callback failures** never become errors. They are contained by
//!   [`FailurePolicy`](crate::reactive::FailurePolicy) and logged.
//! - **Store failures** ([`StoreError`]) are returned by the store
//!   collaborator. Background operations swallow them after logging; the
//!   query helpers on [`SyncSession`](crate::SyncSession) surface them.
//! - **Wire failures** ([`WireError`]) fail closed: the payload is dropped and
//!   local state is left untouched.

use std::time::Duration;

/// Errors surfaced to callers constructing or querying bindings.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// The route string is unusable as a store key
    #[error("Invalid route {route:?}: {reason}")]
    InvalidRoute {
        /// The rejected route
        route: String,
        /// Why it was rejected
        reason: String,
    },

    /// A bounded channel was asked to retain nothing
    #[error("Invalid channel bound {bound}: bound must be at least 1")]
    InvalidBound {
        /// The rejected bound
        bound: usize,
    },

    /// A scheduler interval of zero was requested
    #[error("Invalid scheduler interval {interval:?}")]
    InvalidInterval {
        /// The rejected interval
        interval: Duration,
    },

    /// No tokio runtime was available to drive timers and background work
    #[error("No async runtime available: {reason}")]
    NoRuntime {
        /// Runtime lookup failure
        reason: String,
    },

    /// The route is already bound to data of a different type
    #[error("Route {route} is already bound to a different data type")]
    RouteTypeMismatch {
        /// The contested route
        route: String,
    },

    /// A channel needs the route to itself but it is already bound
    #[error("Route {route} is already bound in this session")]
    RouteInUse {
        /// The contested route
        route: String,
    },

    /// The route has no live binding in this session
    #[error("Route {route} is not bound")]
    NotBound {
        /// The unknown route
        route: String,
    },

    /// The session has been disposed
    #[error("Session disposed")]
    Disposed,

    /// Bound data could not be converted to or from JSON
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the failure
        message: String,
    },

    /// Configuration could not be parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the failure
        message: String,
    },

    /// The store collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A payload failed to decode
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl BindError {
    /// Create an invalid route error
    pub fn invalid_route(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRoute {
            route: route.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for BindError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Failures reported by the replicated store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No peer or backend is reachable
    #[error("Store unavailable: {reason}")]
    Unavailable {
        /// Reason the store could not be reached
        reason: String,
    },

    /// The key does not exist
    #[error("Not found: {key}")]
    NotFound {
        /// Missing key
        key: String,
    },

    /// Sending to or receiving from peers failed
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for the failure
        reason: String,
    },

    /// The local persistence layer failed
    #[error("Storage error: {reason}")]
    Storage {
        /// Reason for the failure
        reason: String,
    },
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}

/// Failures decoding a stored or broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The outer `{ clock, data }` envelope is not valid JSON
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Parser message
        reason: String,
    },

    /// The inner `data` string is not valid JSON
    #[error("Malformed state: {reason}")]
    MalformedState {
        /// Parser message
        reason: String,
    },

    /// The decoded state is valid JSON but not an object
    #[error("State is not a JSON object (found {found})")]
    NotAnObject {
        /// JSON kind that was found instead
        found: &'static str,
    },
}

/// Result alias for binding operations
pub type BindResult<T> = std::result::Result<T, BindError>;
