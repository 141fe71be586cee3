//! Diagnostic trace mapping.
//!
//! Records what each configuration call did so an internal error can be
//! logged together with the whole chain that produced the failing statement.
//! The mapping is write-only from the caller's point of view; it is only ever
//! rendered into a log record.

use crate::trail::Trail;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Key/value diagnostic record accumulated along a configuration chain
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: Trail<(String, JsonValue)>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new trace with `key` set to `value`; a later entry for the same key wins
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            entries: self.entries.push((key.into(), value.into())),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter_rev().any(|(k, _)| k == key)
    }

    /// Latest value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries
            .iter_rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// First integer `i` for which `{prefix}{i}` is not yet a key
    pub fn next_index(&self, prefix: &str) -> usize {
        let mut i = 0;
        while self.contains_key(&format!("{prefix}{i}")) {
            i += 1;
        }
        i
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.to_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for (key, value) in self.entries.to_vec() {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    /// JSON object for the log record
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.to_map())
    }
}

/// Pretty-printed `Debug` form of `value`, as stored in traces and log arguments
pub fn pretty<T: fmt::Debug + ?Sized>(value: &T) -> JsonValue {
    JsonValue::String(format!("{value:#?}"))
}
