//! Shape helpers shared by the typed response structs.
//!
//! Servers answering with `formatversion=2` send booleans and page arrays;
//! older ones ignore the parameter and send `""` flags and page maps keyed by
//! page id. Both shapes decode to the same structs.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, WikiError};

pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|error| WikiError::protocol(format!("failed to decode {what} response: {error}")))
}

/// A flag that counts as set whenever the key is present, unless it is `false`.
pub(crate) fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(!matches!(value, Value::Bool(false) | Value::Null))
}

/// A list that may arrive as an array or as an object keyed by id.
pub(crate) fn array_or_map<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, item)| item).collect(),
        Value::Null => Vec::new(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected array or object, found {other}"
            )));
        }
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(serde::de::Error::custom))
        .collect()
}

/// Render a scalar continuation or parameter value the way the API expects it back.
pub(crate) fn scalar_to_param(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        _ => None,
    }
}
