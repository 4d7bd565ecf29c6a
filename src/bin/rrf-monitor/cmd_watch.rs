use anyhow::Result;
use rrf_monitor::{Config, Monitor};

/// Poll until interrupted, logging one line per successful cycle.
pub async fn run(config: Config) -> Result<()> {
    let (monitor, mut snapshots) = Monitor::new(config);
    rrf_monitor::stop_on_signal(monitor.stop_flag())?;
    let handle = tokio::task::spawn_blocking(move || monitor.run());

    let mut last_cycle = 0;
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.cycles == last_cycle {
            continue;
        }
        last_cycle = snapshot.cycles;
        if snapshot.last_cycle_ok {
            tracing::info!(
                status = snapshot.status().unwrap_or("unknown"),
                mode = snapshot.machine_mode.as_str(),
                up_time = ?snapshot.up_time(),
                cycles = snapshot.cycles,
                failures = snapshot.failures,
                "controller"
            );
        }
    }

    handle.await?
}
