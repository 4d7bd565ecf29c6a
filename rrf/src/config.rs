//! Tunables and the per-mode key table.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::model::STATE_KEY;

/// Protocol timing and retry settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// How long to wait for a reply after sending a request, in
    /// milliseconds.
    pub request_timeout_ms: u64,

    /// Maximum `M409` nesting depth to request.
    pub max_depth: u32,

    /// How many times to try the `M115` handshake before giving up.
    pub handshake_retries: u32,

    /// Demote progress messages from `info` to `debug`.
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 250,
            max_depth: 99,
            handshake_retries: 10,
            quiet: false,
        }
    }
}

impl Config {
    /// The per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Object model keys to keep in sync for each machine mode.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ModeKeys(BTreeMap<String, Vec<String>>);

impl Default for ModeKeys {
    fn default() -> Self {
        [
            ("FFF", &["heat", "tools", "job", "boards", "network"][..]),
            ("CNC", &["spindles", "tools", "move", "job", "boards", "network"][..]),
            ("Laser", &["move", "job", "boards", "network"][..]),
        ]
        .into_iter()
        .map(|(mode, keys)| (mode.to_owned(), keys.iter().map(|key| key.to_string()).collect()))
        .collect()
    }
}

impl FromIterator<(String, Vec<String>)> for ModeKeys {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl ModeKeys {
    /// Keys to fetch while the machine is in `mode`, or `None` if the mode
    /// is not configured.
    pub fn keys_for(&self, mode: &str) -> Option<&[String]> {
        self.0.get(mode).map(Vec::as_slice)
    }

    /// Every configured mode name.
    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every key whose sequence number we track: `state` plus the keys of
    /// all modes.
    pub fn tracked_keys(&self) -> BTreeSet<String> {
        std::iter::once(STATE_KEY.to_owned())
            .chain(self.0.values().flatten().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_modes() {
        let modes = ModeKeys::default();
        assert_eq!(modes.modes().collect::<Vec<_>>(), vec!["CNC", "FFF", "Laser"]);
        assert_eq!(
            modes.keys_for("FFF").unwrap(),
            &["heat", "tools", "job", "boards", "network"]
        );
        assert_eq!(modes.keys_for("fff"), None);
        assert_eq!(modes.keys_for(""), None);
    }

    #[test]
    fn test_tracked_keys() {
        let tracked = ModeKeys::default().tracked_keys();
        assert_eq!(
            tracked.into_iter().collect::<Vec<_>>(),
            vec!["boards", "heat", "job", "move", "network", "spindles", "state", "tools"]
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_depth, 99);
        assert_eq!(config.handshake_retries, 10);
        assert!(!config.quiet);
    }
}
