use anyhow::{Context, Result};
use rrf::Connection;
use rrf_monitor::{port, Config};

/// Open the configured port and run only the `M115` handshake.
pub fn run(config: &Config) -> Result<()> {
    let client = config.poll.client_config();
    let (device, transport) = port::open_first(&config.serial.devices, config.serial.baud, client.request_timeout())?;

    let mut connection = Connection::new(transport, client.request_timeout(), None);
    connection.configure()?;
    rrf::wait_for_firmware(&mut connection, client.handshake_retries, client.quiet)
        .with_context(|| format!("probing {}", device))?;

    println!("RepRapFirmware controller found on {}", device);
    Ok(())
}
