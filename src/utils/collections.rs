//! Helpers for working with the `extra` channel's key/value map.

use rustc_hash::FxHashMap;
use serde_json::{Number, Value};

/// The concrete map type backing [`crate::channels::ExtrasChannel`].
pub type ExtraMap = FxHashMap<String, Value>;

/// Construct an empty, properly-typed extra map.
#[must_use]
pub fn new_extra_map() -> ExtraMap {
    ExtraMap::default()
}

/// Build an extra map from an iterator of key/value pairs.
pub fn extra_map_from_pairs<'a, I>(pairs: I) -> ExtraMap
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Merge any number of extra maps left-to-right; later maps win on key conflicts.
pub fn merge_extra_maps<'a, I>(maps: I) -> ExtraMap
where
    I: IntoIterator<Item = &'a ExtraMap>,
{
    let mut result = ExtraMap::default();
    for map in maps {
        for (k, v) in map {
            result.insert(k.clone(), v.clone());
        }
    }
    result
}

/// Typed convenience accessors layered on top of the plain `FxHashMap` API,
/// so callers don't have to reach for `serde_json::json!` for simple scalars.
pub trait ExtraMapExt {
    fn insert_string(&mut self, key: &str, value: impl Into<String>);
    fn insert_number(&mut self, key: &str, value: impl Into<Number>);
    fn insert_bool(&mut self, key: &str, value: bool);
    fn get_string(&self, key: &str) -> Option<&str>;
    fn get_number(&self, key: &str) -> Option<Number>;
    fn get_bool(&self, key: &str) -> Option<bool>;
}

impl ExtraMapExt for ExtraMap {
    fn insert_string(&mut self, key: &str, value: impl Into<String>) {
        self.insert(key.to_string(), Value::String(value.into()));
    }

    fn insert_number(&mut self, key: &str, value: impl Into<Number>) {
        self.insert(key.to_string(), Value::Number(value.into()));
    }

    fn insert_bool(&mut self, key: &str, value: bool) {
        self.insert(key.to_string(), Value::Bool(value));
    }

    fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_number(&self, key: &str) -> Option<Number> {
        self.get(key).and_then(Value::as_number).cloned()
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}
