//! Per-key change counters, used to choose between cheap and full fetches.

use std::collections::BTreeMap;

use serde::Serialize;

/// Cached value meaning "never fetched"; firmware counters are never
/// negative, so this always forces a verbose request.
pub const NEVER_FETCHED: i64 = -1;

/// Last sequence number observed for each tracked key after a successful
/// verbose fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SequenceCache(BTreeMap<String, i64>);

impl SequenceCache {
    /// Create a cache tracking `keys`, all marked as never fetched.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(|key| (key.into(), NEVER_FETCHED)).collect())
    }

    /// Cached sequence number for `key`.
    pub fn get(&self, key: &str) -> i64 {
        self.0.get(key).copied().unwrap_or(NEVER_FETCHED)
    }

    /// Whether `key` needs a verbose fetch, given the counter the
    /// controller just reported. A key the controller has no counter for
    /// is always stale.
    pub fn is_stale(&self, key: &str, current: Option<i64>) -> bool {
        current != Some(self.get(key))
    }

    /// Remember the counter a verbose fetch of `key` was made against.
    pub fn record(&mut self, key: &str, sequence: i64) {
        self.0.insert(key.to_owned(), sequence);
    }

    /// Forget everything; every key goes back to [NEVER_FETCHED].
    pub fn reset(&mut self) {
        self.0.values_mut().for_each(|sequence| *sequence = NEVER_FETCHED);
    }

    /// Iterate over `(key, sequence)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(key, sequence)| (key.as_str(), *sequence))
    }
}
