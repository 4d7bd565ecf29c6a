#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! This crate watches a RepRapFirmware controller over a serial line,
//! keeps a live copy of its object model with [rrf::Client], and serves
//! that copy over HTTP.

pub mod config;
pub mod monitor;
pub mod port;
pub mod server;


pub use config::Config;
pub use monitor::{Monitor, Snapshot, SyncStatus};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

/// Set `stop` when SIGINT or SIGTERM arrives.
pub fn stop_on_signal(stop: Arc<AtomicBool>) -> Result<()> {
    // Registering SIGKILL here will panic at runtime, so let's avoid that.
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!(signal = sig, "received signal; stopping");
            stop.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}
