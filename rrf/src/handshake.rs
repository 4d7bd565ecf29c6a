//! Making sure there is a RepRapFirmware controller on the other end.

use crate::{
    connection::Connection,
    error::{Error, Result},
    transport::Transport,
};

/// Command asking the controller to identify its firmware.
pub const FIRMWARE_QUERY: &str = "M115";

/// Text that only a RepRapFirmware `M115` reply contains.
pub const FIRMWARE_IDENTIFIER: &str = "RepRapFirmware";

/// Send `M115` once and report whether the reply names RepRapFirmware.
pub fn probe_firmware<T>(connection: &mut Connection<T>, quiet: bool) -> Result<bool>
where
    T: Transport,
{
    notice!(quiet, "> {}", FIRMWARE_QUERY);
    let response = connection.get_response(FIRMWARE_QUERY, false)?;

    let mut found = false;
    for line in &response {
        notice!(quiet, ">> {}", line);
        if line.contains(FIRMWARE_IDENTIFIER) {
            found = true;
        }
    }
    Ok(found)
}

/// Probe up to `attempts` times, pausing one request timeout between
/// tries. Transport failures are raised straight away.
pub fn wait_for_firmware<T>(connection: &mut Connection<T>, attempts: u32, quiet: bool) -> Result<()>
where
    T: Transport,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if probe_firmware(connection, quiet)? {
            return Ok(());
        }
        if attempt < attempts {
            notice!(quiet, attempt, "no RepRapFirmware reply, retrying");
            std::thread::sleep(connection.request_timeout());
        }
    }
    tracing::error!(attempts, "failed to get a sensible M115 response from controller");
    Err(Error::Handshake { attempts })
}
