//! The locally reconstructed copy of the controller's object model.

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Key holding the controller's overall state.
pub const STATE_KEY: &str = "state";

/// Key holding the per-key change counters.
pub const SEQS_KEY: &str = "seqs";

/// A tree of object model sections, keyed by top level key (`state`,
/// `heat`, `job`, ...).
///
/// `state` is always present; before the first successful fetch it is
/// `{"status": "unknown"}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Model(Map<String, Value>);

impl Default for Model {
    fn default() -> Self {
        let mut root = Map::new();
        root.insert(STATE_KEY.to_owned(), json!({ "status": "unknown" }));
        root.insert(SEQS_KEY.to_owned(), Value::Null);
        Self(root)
    }
}

impl Model {
    /// Look up a top level section.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `state` section.
    pub fn state(&self) -> &Value {
        self.0.get(STATE_KEY).unwrap_or(&Value::Null)
    }

    /// Controller status, e.g. `idle`, `processing` or `unknown`.
    pub fn status(&self) -> Option<&str> {
        self.state().get("status").and_then(Value::as_str)
    }

    /// Machine mode as reported in `state`.
    pub fn machine_mode(&self) -> Option<&str> {
        self.state().get("machineMode").and_then(Value::as_str)
    }

    /// Seconds since the controller booted, as reported in `state`.
    pub fn up_time(&self) -> Option<u64> {
        self.state().get("upTime").and_then(Value::as_u64)
    }

    /// The last sequence counter reported for `key` in `seqs`.
    pub fn sequence(&self, key: &str) -> Option<i64> {
        self.0.get(SEQS_KEY)?.get(key)?.as_i64()
    }

    /// Iterate over every top level section.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Replace a section wholesale.
    pub fn replace(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_owned(), value);
    }

    /// Deep-merge a partial update into a section.
    pub fn merge(&mut self, key: &str, update: Value) {
        let slot = self.0.entry(key.to_owned()).or_insert(Value::Null);
        *slot = merge(slot.take(), update);
    }

    /// Remove and return a section.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// The whole tree as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Recursively merge `new` into `old`.
///
/// * Objects: the union of both key sets, recursing where both have a key.
/// * Arrays: merged element-wise; the shorter array is padded with `null`,
///   so trailing elements of the longer array survive.
/// * Anything else: `new` wins, unless it is `null`, which RepRapFirmware
///   uses in frequent updates to mean "unchanged".
pub fn merge(old: Value, new: Value) -> Value {
    match (old, new) {
        (Value::Object(mut old), Value::Object(new)) => {
            for (key, value) in new {
                let slot = old.entry(key).or_insert(Value::Null);
                *slot = merge(slot.take(), value);
            }
            Value::Object(old)
        }
        (Value::Array(old), Value::Array(new)) => {
            let len = old.len().max(new.len());
            let mut old = old.into_iter();
            let mut new = new.into_iter();
            Value::Array(
                (0..len)
                    .map(|_| merge(old.next().unwrap_or(Value::Null), new.next().unwrap_or(Value::Null)))
                    .collect(),
            )
        }
        (old, Value::Null) => old,
        (_, new) => new,
    }
}
