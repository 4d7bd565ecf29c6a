//! Finding and opening the controller's serial port.

use std::time::Duration;

use anyhow::{bail, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};

/// Details for a serial port on this host.
#[derive(Clone, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyACM0`.
    pub port: String,

    /// How the port is attached (`usb`, `pci`, `bluetooth` or `unknown`).
    pub kind: String,

    /// USB manufacturer string, if known.
    pub manufacturer: Option<String>,

    /// USB product string, if known.
    pub product: Option<String>,

    /// USB serial number, if known.
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (kind, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb) => ("usb", usb.manufacturer, usb.product, usb.serial_number),
            SerialPortType::PciPort => ("pci", None, None, None),
            SerialPortType::BluetoothPort => ("bluetooth", None, None, None),
            SerialPortType::Unknown => ("unknown", None, None, None),
        };
        Self {
            port: info.port_name,
            kind: kind.to_owned(),
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// List all serial ports on this host.
pub fn list_all() -> Result<Vec<PortInfo>> {
    Ok(serialport::available_ports()?.into_iter().map(PortInfo::from).collect())
}

/// Open the first of `devices` that can be opened, returning its path
/// along with the port.
pub fn open_first(devices: &[String], baud: u32, timeout: Duration) -> Result<(String, Box<dyn SerialPort>)> {
    for device in devices {
        match serialport::new(device, baud).timeout(timeout).open() {
            Ok(port) => {
                tracing::info!(device = device.as_str(), baud, "opened serial port");
                return Ok((device.clone(), port));
            }
            Err(e) => {
                tracing::debug!(device = device.as_str(), error = format!("{:?}", e), "cannot open serial port");
            }
        }
    }
    bail!("no serial device could be opened (tried {})", devices.join(", "))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_port_info_from_unknown_port() {
        let info = PortInfo::from(SerialPortInfo {
            port_name: "/dev/ttyS0".to_owned(),
            port_type: SerialPortType::Unknown,
        });
        assert_eq!(
            info,
            PortInfo {
                port: "/dev/ttyS0".to_owned(),
                kind: "unknown".to_owned(),
                manufacturer: None,
                product: None,
                serial_number: None,
            }
        );
    }

    #[test]
    fn test_open_first_reports_every_device() {
        let devices = vec!["/nonexistent/ttyACM0".to_owned(), "/nonexistent/ttyACM1".to_owned()];
        let err = open_first(&devices, 57600, Duration::from_millis(100)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no serial device could be opened (tried /nonexistent/ttyACM0, /nonexistent/ttyACM1)"
        );
    }

    #[test]
    fn test_open_first_with_no_devices() {
        assert!(open_first(&[], 57600, Duration::from_millis(100)).is_err());
    }
}
