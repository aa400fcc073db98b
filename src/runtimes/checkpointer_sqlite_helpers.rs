//! Small serde <-> `CheckpointerError` adapters shared by `checkpointer_sqlite`'s
//! save/load paths, built on the generic context-aware helpers in
//! `utils::json_ext`.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::runtimes::checkpointer::{CheckpointerError, Result};
use crate::utils::json_ext::{deserialize_with_context, serialize_with_context};

fn map_error(e: serde_json::Error, field: &str) -> CheckpointerError {
    CheckpointerError::Other {
        message: format!("{field}: {e}"),
    }
}

/// Serialize `value` to a JSON string for storage in a TEXT column.
pub fn serialize_json<T: Serialize>(value: &T, field: &str) -> Result<String> {
    serialize_with_context(value, field, map_error)
}

/// Parse a JSON column's raw text into a `serde_json::Value`.
pub fn deserialize_json(json: &str, field: &str) -> Result<Value> {
    deserialize_with_context(json, field, map_error)
}

/// Convert an already-parsed `serde_json::Value` into `T`.
pub fn deserialize_json_value<T: DeserializeOwned>(value: Value, field: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| map_error(e, field))
}

/// Unwrap a nullable TEXT column, erroring with `field`'s name if it was NULL.
pub fn require_json_field(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| CheckpointerError::Other {
        message: format!("{field} is missing"),
    })
}
