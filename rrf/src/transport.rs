//! The byte stream we talk to the controller over.

use std::{
    io::{self, Read, Write},
    time::Duration,
};

/// A bidirectional byte stream to a RepRapFirmware controller, such as a
/// USB serial port or a hardware UART.
///
/// Reads are expected to block for at most the configured timeout. A read
/// that returns `Ok(0)`, or fails with [io::ErrorKind::TimedOut],
/// [io::ErrorKind::WouldBlock] or [io::ErrorKind::Interrupted], means "no
/// data yet" and is not treated as a failure.
pub trait Transport: Read + Write {
    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Set the maximum time a single read (or write) may block for.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

#[cfg(feature = "serial")]
impl Transport for Box<dyn serialport::SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout)?;
        Ok(())
    }
}

/// Returns true if the read error just means nothing arrived in time.
pub(crate) fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
