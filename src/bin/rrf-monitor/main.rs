//! Watch a RepRapFirmware controller over serial, and serve its object
//! model over HTTP.

#![deny(missing_docs)]

mod cmd_ports;
mod cmd_probe;
mod cmd_query;
mod cmd_serve;
mod cmd_watch;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use rrf_monitor::Config;
use slog::Drain;
use tracing_subscriber::prelude::*;

/// This doc string acts as a help message when the user runs '--help'
/// as do all doc strings on fields.
#[derive(Parser, Debug, Clone)]
#[clap(version = clap::crate_version!(), author = clap::crate_authors!("\n"))]
pub struct Opts {
    /// Print debug info
    #[clap(short, long)]
    pub debug: bool,

    /// Print logs as json
    #[clap(short, long)]
    pub json: bool,

    /// Path to config file. `rrf-monitor.toml` is used if present.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Serial device to use instead of the configured ones; may be repeated.
    #[clap(long = "device", global = true)]
    pub devices: Vec<String>,

    /// Serial line speed.
    #[clap(long, global = true)]
    pub baud: Option<u32>,

    /// Poll cycle period, in milliseconds.
    #[clap(long, global = true)]
    pub update_time: Option<u64>,

    /// The subcommand to run.
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

impl Opts {
    /// Setup our logger.
    pub fn create_logger(&self, app: &str) -> slog::Logger {
        if self.json {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            self.async_root_logger(drain, app)
        } else {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            self.async_root_logger(drain, app)
        }
    }

    fn async_root_logger<T>(&self, drain: T, app: &str) -> slog::Logger
    where
        T: slog::Drain + Send + 'static,
        <T as slog::Drain>::Err: std::fmt::Debug,
    {
        let level = if self.debug {
            slog::Level::Debug
        } else {
            slog::Level::Info
        };

        let level_drain = slog::LevelFilter(drain, level).fuse();
        let async_drain = slog_async::Async::new(level_drain).build().fuse();
        slog::Logger::root(async_drain, slog::slog_o!("app" => app.to_owned()))
    }

    /// Apply command line overrides on top of the config file.
    pub fn apply_overrides(&self, config: &mut Config) {
        if !self.devices.is_empty() {
            config.serial.devices = self.devices.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(update_time) = self.update_time {
            config.poll.update_time_ms = update_time;
        }
    }
}

/// A subcommand for our cli.
#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// List serial ports on this host.
    Ports,

    /// Check that a RepRapFirmware controller answers on the serial line.
    Probe,

    /// Connect, send one G-code command and print the reply.
    Query {
        /// The command to send, e.g. `M122`.
        command: String,
    },

    /// Poll the controller, logging a summary line after each cycle.
    Watch,

    /// Poll the controller and serve the object model over HTTP.
    Serve {
        /// IP address and port that the server should listen on.
        #[clap(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts: Opts = Opts::parse();

    let (json, plain) = if opts.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().compact()))
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if opts.debug { "debug" } else { "info" })
    });

    // Initialize tracing.
    tracing_subscriber::registry().with(filter).with(json).with(plain).init();

    let mut config = Config::load(opts.config.as_deref())?;
    opts.apply_overrides(&mut config);

    if let Err(err) = run_cmd(&opts, config).await {
        bail!("running cmd `{:?}` failed: {:?}", &opts.subcmd, err);
    }

    Ok(())
}

async fn run_cmd(opts: &Opts, config: Config) -> Result<()> {
    match &opts.subcmd {
        SubCommand::Ports => cmd_ports::run(opts.json),
        SubCommand::Probe => tokio::task::spawn_blocking(move || cmd_probe::run(&config)).await?,
        SubCommand::Query { command } => {
            let command = command.clone();
            tokio::task::spawn_blocking(move || cmd_query::run(&config, &command)).await?
        }
        SubCommand::Watch => cmd_watch::run(config).await,
        SubCommand::Serve { bind } => cmd_serve::run(opts, config, bind.as_deref()).await,
    }
}
