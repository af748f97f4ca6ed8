//! Session-wide defaults for bindings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::BindError;

/// Default outbound throttle interval in milliseconds.
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 350;

/// How contained callback failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackFailureLog {
    /// Log at `warn`
    #[default]
    Warn,
    /// Log at `debug`
    Debug,
    /// Do not log
    Off,
}

/// Defaults applied to every binding request that leaves an option unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Outbound throttle interval for bindings without an explicit strategy
    pub throttle_interval_ms: u64,
    /// Whether bindings write through the durable store by default
    pub persist: bool,
    /// Reporting level for callback failures
    pub callback_failures: CallbackFailureLog,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: DEFAULT_THROTTLE_INTERVAL_MS,
            persist: true,
            callback_failures: CallbackFailureLog::Warn,
        }
    }
}

impl BindConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```toml
    /// throttle_interval_ms = 200
    /// persist = false
    /// callback_failures = "debug"
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, BindError> {
        let config: Self = toml::from_str(source).map_err(|e| BindError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the scheduler depends on.
    pub fn validate(&self) -> Result<(), BindError> {
        if self.throttle_interval_ms == 0 {
            return Err(BindError::InvalidInterval {
                interval: Duration::ZERO,
            });
        }
        Ok(())
    }

    /// Default throttle interval as a duration.
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    /// Override the throttle interval.
    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the default persistence mode.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Override callback failure reporting.
    pub fn with_callback_failures(mut self, log: CallbackFailureLog) -> Self {
        self.callback_failures = log;
        self
    }
}
