use anyhow::{bail, Context, Result};
use rrf::Client;
use rrf_monitor::{port, Config};

/// Connect, send `command`, and print every line of the reply.
pub fn run(config: &Config, command: &str) -> Result<()> {
    let client_config = config.poll.client_config();
    let (device, transport) = port::open_first(
        &config.serial.devices,
        config.serial.baud,
        client_config.request_timeout(),
    )?;

    let mut client = Client::open(transport, config.modes.clone(), client_config, None)
        .with_context(|| format!("connecting to controller on {}", device))?;
    let lines = client.get_response(command, false)?;
    if lines.is_empty() {
        bail!("no reply to {} from {}", command, device);
    }

    for line in lines {
        println!("{}", line);
    }
    Ok(())
}
