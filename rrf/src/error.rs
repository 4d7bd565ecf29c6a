//! Errors which make the connection to the controller unusable.
//!
//! Soft failures (a timed-out request, a malformed JSON line, a reply for
//! the wrong key) are never represented here; they are reported through
//! the `bool` returned by [crate::Client::update].

use std::time::Duration;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal errors raised by the object model client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading from, writing to, or querying the transport failed.
    #[error("{context}: {source}")]
    Transport {
        /// What we were doing when the transport failed.
        context: &'static str,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The controller kept sending data well past the request deadline.
    #[error("controller is sending continuously; gave up after {waited:?}")]
    Runaway {
        /// How long we waited before giving up.
        waited: Duration,
    },

    /// No RepRapFirmware controller answered the firmware query.
    #[error("failed to get a sensible M115 response from controller after {attempts} attempts")]
    Handshake {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The client hit a fatal error earlier and has to be reconnected.
    #[error("connection to controller has failed; reconnect required")]
    Disconnected,

    /// Raw log sink could not be set up.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn transport(context: &'static str, source: std::io::Error) -> Self {
        Self::Transport { context, source }
    }
}
