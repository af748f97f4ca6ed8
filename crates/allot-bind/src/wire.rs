//! Store payload wire format.
//!
//! Every value the store hands back, and every event it delivers, is a JSON
//! envelope `{ "clock": <n>, "data": "<json>" }` where `data` is itself a
//! JSON-encoded string of the bound state. The double encoding is kept for
//! compatibility with stores that already hold values in this shape.
//!
//! Decoding is strict: anything that is not an envelope wrapping a JSON
//! object is reported as a [`WireError`] so callers can drop it instead of
//! merging garbage into local state.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::WireError;

/// Logical clock carried by durable envelopes.
pub type Clock = u64;

/// Outer payload envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical clock of the stored value. Absent for ephemeral shares, and
    /// treated as absent when it is not a non-negative integer.
    #[serde(
        default,
        deserialize_with = "lenient_clock",
        skip_serializing_if = "Option::is_none"
    )]
    pub clock: Option<Clock>,
    /// JSON-encoded state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

fn lenient_clock<'de, D>(deserializer: D) -> Result<Option<Clock>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_u64()))
}

impl Envelope {
    /// Envelope for an ephemeral share (no clock).
    pub fn ephemeral(data: impl Into<String>) -> Self {
        Self {
            clock: None,
            data: Some(data.into()),
        }
    }

    /// Envelope for a durable value at `clock`.
    pub fn versioned(clock: Clock, data: impl Into<String>) -> Self {
        Self {
            clock: Some(clock),
            data: Some(data.into()),
        }
    }

    /// Parse a raw envelope string.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        serde_json::from_str(raw).map_err(|e| WireError::MalformedEnvelope {
            reason: e.to_string(),
        })
    }

    /// Render the envelope as a JSON string.
    pub fn encode(&self) -> String {
        // A struct of an integer and a string always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode the inner state.
    ///
    /// Returns `Ok(None)` when the envelope carries no data.
    pub fn state(&self) -> Result<Option<Map<String, Value>>, WireError> {
        let Some(data) = self.data.as_deref() else {
            return Ok(None);
        };
        decode_state(data).map(Some)
    }
}

/// Decode a JSON string that must hold an object.
pub fn decode_state(data: &str) -> Result<Map<String, Value>, WireError> {
    let value: Value = serde_json::from_str(data).map_err(|e| WireError::MalformedState {
        reason: e.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(WireError::NotAnObject {
            found: json_kind(&other),
        }),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
