//! `M409` requests and the JSON replies they produce.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// How much of a key to ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    /// The full value of the key; replaces the local copy.
    Verbose,

    /// Only frequently changing values; merged into the local copy.
    Frequent,
}

impl Verbosity {
    /// `M409` flags for this verbosity, omitting nulls, to `depth` levels.
    pub fn flags(self, depth: u32) -> String {
        match self {
            Verbosity::Verbose => format!("vnd{}", depth),
            Verbosity::Frequent => format!("fnd{}", depth),
        }
    }
}

/// Build the `M409` command querying `key`.
pub fn query_command(key: &str, verbosity: Verbosity, depth: u32) -> String {
    format!("M409 F\"{}\" K\"{}\"", verbosity.flags(depth), key)
}

/// One decoded reply to an `M409` query.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ResponseFrame {
    /// The key this reply is for.
    pub key: String,

    /// Flags the firmware applied; `f` marks a frequent reply.
    #[serde(default)]
    pub flags: String,

    /// `None` when the reply carried no `result` at all; `Some(Null)` when
    /// the firmware had nothing to report for the key.
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ResponseFrame {
    /// Whether this is a frequent (partial) reply.
    pub fn is_frequent(&self) -> bool {
        self.flags.contains('f')
    }
}
