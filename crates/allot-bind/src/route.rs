//! Route keys.
//!
//! A route names one shared state slot or message channel in the store. The
//! store owns the namespace; this crate only requires a route to be a
//! non-empty string without surrounding whitespace, used verbatim for
//! subscribe, unsubscribe and publish calls.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::BindError;

/// Opaque, validated store key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route(String);

impl Route {
    /// Validate and wrap a route string.
    pub fn new(route: impl Into<String>) -> Result<Self, BindError> {
        let route = route.into();
        if route.is_empty() {
            return Err(BindError::invalid_route(route, "route must not be empty"));
        }
        if route.trim() != route {
            return Err(BindError::invalid_route(
                route,
                "route must not have leading or trailing whitespace",
            ));
        }
        Ok(Self(route))
    }

    /// Borrow the route string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Route {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Route {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Route {
    type Error = BindError;

    fn try_from(route: String) -> Result<Self, Self::Error> {
        Self::new(route)
    }
}

impl TryFrom<&str> for Route {
    type Error = BindError;

    fn try_from(route: &str) -> Result<Self, Self::Error> {
        Self::new(route)
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_routes() {
        let route = Route::new("counter").unwrap();
        assert_eq!(route.as_str(), "counter");
        assert_eq!(route.to_string(), "counter");
    }

    #[test]
    fn rejects_empty_route() {
        assert!(matches!(
            Route::new(""),
            Err(BindError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn rejects_padded_route() {
        assert!(Route::new(" counter").is_err());
        assert!(Route::new("counter\n").is_err());
    }

    #[test]
    fn deserialization_validates() {
        assert!(serde_json::from_str::<Route>("\"\"").is_err());
        let route: Route = serde_json::from_str("\"todos/1\"").unwrap();
        assert_eq!(route.as_str(), "todos/1");
    }
}
