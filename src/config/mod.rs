//! Configuration model: dynamic argument maps plus the typed sections
//! that populate them.

pub mod sections;
pub mod simple;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use toml::Value;

/// Mapping from option name to typed value. An absent key means the
/// option is unset.
pub type ArgMap = toml::map::Map<String, Value>;

/// One section's worth of raw state inside a saved configuration
/// document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<ArgMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_args: Option<ArgMap>,
}

/// The full persisted configuration shape: one block per section name.
pub type SavedConfig = BTreeMap<String, SectionBlock>;

/// Insert a value under `key`, converting from any native type.
pub fn set(args: &mut ArgMap, key: &str, value: impl Into<Value>) {
    args.insert(key.to_string(), value.into());
}

/// Whether an optional value is set to something worth emitting: a
/// non-empty string, a non-zero number, `true`, or a non-empty array.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::String(text) => !text.is_empty(),
        Value::Integer(number) => *number > 0,
        Value::Float(number) => *number > 0.0,
        Value::Boolean(flag) => *flag,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(number) => Some(*number as f64),
        Value::Float(number) => Some(*number),
        _ => None,
    }
}

/// Parse a string-typed numeric field in place. Unparsable text resolves
/// to 0.0 so a partially filled form never aborts validation.
pub fn coerce_to_number(args: &mut ArgMap, key: &str) {
    let coerced = match args.get(key) {
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Integer(number)) => *number as f64,
        _ => return,
    };
    args.insert(key.to_string(), Value::Float(coerced));
}

pub(crate) fn get_str(map: &ArgMap, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn get_bool(map: &ArgMap, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}

pub(crate) fn get_u32(map: &ArgMap, key: &str) -> Option<u32> {
    map.get(key)
        .and_then(Value::as_integer)
        .and_then(|number| u32::try_from(number).ok())
}

pub(crate) fn get_f64(map: &ArgMap, key: &str) -> Option<f64> {
    map.get(key).and_then(as_f64)
}
