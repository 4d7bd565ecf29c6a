//! Code for the configuration of the application.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use rrf::ModeKeys;
use serde::{Deserialize, Serialize};

/// Config file read when none is named on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "rrf-monitor.toml";

/// The configuration of the application.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Which serial devices to try, and how.
    pub serial: SerialConfig,

    /// How to talk to the controller once connected.
    pub poll: PollConfig,

    /// Object model keys to keep in sync for each machine mode.
    pub modes: ModeKeys,

    /// The read-only HTTP view.
    pub server: ServerConfig,
}

impl Config {
    /// Load the configuration.
    ///
    /// A file named explicitly must exist. Otherwise [DEFAULT_CONFIG_FILE]
    /// is read if present, and built-in defaults are used if not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    /// Parse a configuration from a toml file.
    pub fn from_file(file: &Path) -> Result<Self> {
        let config = std::fs::read_to_string(file)
            .with_context(|| format!("config file not found at {}", file.display()))?;
        Self::from_str(&config).with_context(|| format!("invalid config file {}", file.display()))
    }

    /// Parse a configuration from a toml string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device paths, tried in order. The controller can come back on a
    /// different node after it reboots, so list every candidate.
    pub devices: Vec<String>,

    /// Line speed.
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            devices: vec!["/dev/ttyACM0".to_owned(), "/dev/ttyACM1".to_owned()],
            baud: 57600,
        }
    }
}

/// Polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time from the start of one poll cycle to the start of the next.
    pub update_time_ms: u64,

    /// How long to wait for each reply.
    pub request_timeout_ms: u64,

    /// Maximum object model depth to request.
    pub max_depth: u32,

    /// How many `M115` probes to make before giving up on a device.
    pub handshake_retries: u32,

    /// Pause before reconnecting after the connection fails.
    pub reconnect_delay_secs: u64,

    /// Log progress messages at `debug` rather than `info`.
    pub quiet: bool,

    /// Append a verbatim copy of all serial traffic to this file.
    pub raw_log: Option<PathBuf>,
}

impl Default for PollConfig {
    fn default() -> Self {
        let client = rrf::Config::default();
        Self {
            update_time_ms: 1000,
            request_timeout_ms: client.request_timeout_ms,
            max_depth: client.max_depth,
            handshake_retries: client.handshake_retries,
            reconnect_delay_secs: 3,
            quiet: client.quiet,
            raw_log: None,
        }
    }
}

impl PollConfig {
    /// Settings for the object model client.
    pub fn client_config(&self) -> rrf::Config {
        rrf::Config {
            request_timeout_ms: self.request_timeout_ms,
            max_depth: self.max_depth,
            handshake_retries: self.handshake_retries,
            quiet: self.quiet,
        }
    }

    /// Poll cycle period.
    pub fn update_time(&self) -> Duration {
        Duration::from_millis(self.update_time_ms)
    }

    /// Pause before reconnecting.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
        }
    }
}
