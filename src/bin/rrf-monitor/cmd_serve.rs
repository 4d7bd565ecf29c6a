use anyhow::{anyhow, Context, Result};
use rrf_monitor::{server, Config, Monitor};

use super::Opts;

/// Poll the controller and serve snapshots until interrupted.
pub async fn run(opts: &Opts, config: Config, bind: Option<&str>) -> Result<()> {
    let bind = bind.unwrap_or(&config.server.bind).to_owned();
    let (monitor, snapshots) = Monitor::new(config);
    rrf_monitor::stop_on_signal(monitor.stop_flag())?;

    let (server, _context) = server::create_server(&bind, opts.create_logger("server"), snapshots)?;
    tracing::info!(bind = bind.as_str(), "serving object model");

    let result = tokio::task::spawn_blocking(move || monitor.run())
        .await
        .context("monitor task failed")?;

    server
        .close()
        .await
        .map_err(|error| anyhow!("server failed: {}", error))?;
    result
}
