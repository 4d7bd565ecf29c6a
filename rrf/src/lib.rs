#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! This crate keeps a local copy of a RepRapFirmware controller's object
//! model up to date over a serial line, using `M409` queries.
//!
//! Start with [Client]: hand it something implementing [Transport] (any
//! `serialport` port works with the `serial` feature), call
//! [Client::connect], then call [Client::update] on a timer.

/// Log at `info`, or at `debug` when `$quiet` is set.
macro_rules! notice {
    ($quiet:expr, $($arg:tt)+) => {
        if $quiet {
            tracing::debug!($($arg)+)
        } else {
            tracing::info!($($arg)+)
        }
    };
}

mod client;
mod config;
mod connection;
mod error;
mod frame;
mod handshake;
mod model;
mod reader;
mod sequence;
mod transport;


pub use client::{Client, SyncState};
pub use config::{Config, ModeKeys};
pub use connection::{open_raw_log, Connection, RawLog, RUNAWAY_FACTOR};
pub use error::{Error, Result};
pub use frame::{query_command, ResponseFrame, Verbosity};
pub use handshake::{probe_firmware, wait_for_firmware, FIRMWARE_IDENTIFIER, FIRMWARE_QUERY};
pub use model::{merge, Model, SEQS_KEY, STATE_KEY};
pub use reader::{has_frame, is_acknowledgement, json_frames, LineReader};
pub use sequence::{SequenceCache, NEVER_FETCHED};
pub use transport::Transport;
