//! Field-wise merge of JSON patches into typed state.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::BindError;
use crate::wire::json_kind;

/// Serialize `value` and require a JSON object.
pub fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, BindError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(BindError::serialization(format!(
            "bound data must serialize to a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

/// Overwrite the fields of `current` named in `patch` and rebuild the typed
/// value. Fields absent from `patch` keep their current values.
///
/// Fails without side effects when the result does not deserialize as `T`.
pub fn merge_fields<T>(current: &T, patch: &Map<String, Value>) -> Result<T, BindError>
where
    T: Serialize + DeserializeOwned,
{
    let mut fields = to_object(current)?;
    for (key, value) in patch {
        fields.insert(key.clone(), value.clone());
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}
