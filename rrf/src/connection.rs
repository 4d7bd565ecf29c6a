//! Sending commands and collecting the replies, within a deadline.

use std::{
    fs::OpenOptions,
    io::Write,
    path::Path,
    time::{Duration, Instant},
};

use crate::{
    error::{Error, Result},
    reader::{has_frame, is_acknowledgement, LineReader},
    transport::{is_idle, Transport},
};

/// Sink for a verbatim copy of everything sent and received.
pub type RawLog = Box<dyn Write + Send>;

/// Open `path` for appending as a [RawLog], starting with a `header` line.
pub fn open_raw_log(path: &Path, header: &str) -> Result<RawLog> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", header)?;
    Ok(Box::new(file))
}

/// If a controller is still talking this many request timeouts after we
/// asked it something, it is wedged.
pub const RUNAWAY_FACTOR: u32 = 5;

const READ_CHUNK: usize = 256;

/// A request/response channel to the controller.
pub struct Connection<T> {
    transport: T,
    reader: LineReader,
    raw_log: Option<RawLog>,
    request_timeout: Duration,
}

impl<T> Connection<T>
where
    T: Transport,
{
    /// Wrap a transport. Nothing is sent until the first command.
    pub fn new(transport: T, request_timeout: Duration, raw_log: Option<RawLog>) -> Self {
        Self {
            transport,
            reader: LineReader::new(),
            raw_log,
            request_timeout,
        }
    }

    /// Configure the transport so a single read can never block for a
    /// large part of the request deadline.
    pub fn configure(&mut self) -> Result<()> {
        let read_timeout = (self.request_timeout.saturating_mul(2) / 5).max(Duration::from_millis(1));
        self.transport
            .set_timeout(read_timeout)
            .map_err(|e| Error::transport("failed to set transport timeout", e))
    }

    /// The per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Give back the underlying transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a single command line.
    ///
    /// Anything already waiting in the receive buffer is left over from an
    /// earlier exchange, and is discarded (after being copied to the raw
    /// log) before the command goes out.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        self.discard_stale()?;

        self.transport
            .write_all(format!("{}\r\n", command).as_bytes())
            .map_err(|e| Error::transport("gcode serial write failed", e))?;
        self.transport
            .flush()
            .map_err(|e| Error::transport("gcode serial write buffer flush failed", e))?;

        tracing::trace!(command, "sent command");
        self.log_raw(&format!("\n> {}\n", command));
        Ok(())
    }

    /// Send a command and collect the lines sent back.
    ///
    /// When `expect_json` is set, collection stops at the first line
    /// holding a complete JSON object, and an `ok` line does not end it.
    /// Otherwise it stops at the first line ending in `ok`. Failing that,
    /// it stops when the request timeout expires, which may leave the
    /// result empty; that is a soft failure for the caller to interpret.
    /// A controller that is still streaming a line when [RUNAWAY_FACTOR]
    /// timeouts have passed is a hard error.
    pub fn get_response(&mut self, command: &str, expect_json: bool) -> Result<Vec<String>> {
        self.send_command(command)?;

        let started = Instant::now();
        let guard = self.request_timeout.saturating_mul(RUNAWAY_FACTOR);
        let mut lines = vec![];
        let mut receiving = false;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.request_timeout && !(receiving && self.reader.has_partial()) {
                break;
            }
            if elapsed >= guard {
                self.reader.clear();
                return Err(Error::Runaway { waited: elapsed });
            }

            let n = match self.transport.read(&mut buf) {
                Ok(n) => n,
                Err(e) if is_idle(&e) => 0,
                Err(e) => return Err(Error::transport("serial/UART failed: cannot read from controller", e)),
            };
            receiving = n > 0;
            if n == 0 {
                continue;
            }

            self.log_raw(&String::from_utf8_lossy(&buf[..n]));
            let seen = lines.len();
            self.reader.push(&buf[..n], &mut lines);
            let done = if expect_json {
                lines[seen..].iter().any(|line| has_frame(line))
            } else {
                lines[seen..].iter().any(|line| is_acknowledgement(line))
            };
            if done {
                break;
            }
        }

        if lines.is_empty() {
            tracing::debug!(command, timeout = ?self.request_timeout, "no response before deadline");
        }
        self.reader.clear();
        Ok(lines)
    }

    fn discard_stale(&mut self) -> Result<()> {
        self.reader.clear();

        let started = Instant::now();
        let guard = self.request_timeout.saturating_mul(RUNAWAY_FACTOR);
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let waiting = self
                .transport
                .bytes_available()
                .map_err(|e| Error::transport("failed to query length of input buffer", e))?;
            if waiting == 0 {
                return Ok(());
            }
            if started.elapsed() >= guard {
                return Err(Error::Runaway {
                    waited: started.elapsed(),
                });
            }

            let want = waiting.min(buf.len());
            match self.transport.read(&mut buf[..want]) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    let junk = String::from_utf8_lossy(&buf[..n]).to_string();
                    tracing::trace!(junk = %junk, "discarding stale input");
                    self.log_raw(&junk);
                }
                Err(e) if is_idle(&e) => return Ok(()),
                Err(e) => return Err(Error::transport("failed to flush input buffer", e)),
            }
        }
    }

    fn log_raw(&mut self, text: &str) {
        let Some(log) = self.raw_log.as_mut() else {
            return;
        };
        if let Err(e) = log.write_all(text.as_bytes()).and_then(|_| log.flush()) {
            tracing::warn!(error = format!("{:?}", e), "raw log write failed; raw logging disabled");
            self.raw_log = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    use serde_json::json;

    use super::*;
    use crate::{
        reader::json_frames,
        transport::mock::{om_reply, Reply, ScriptedTransport},
    };

    const TIMEOUT: Duration = Duration::from_millis(40);

    /// A [Write] we can inspect after handing a boxed copy to the
    /// connection.
    #[derive(Clone, Default)]
    struct SharedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedLog {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_plain_response_stops_at_ok() -> TestResult {
        let transport = ScriptedTransport::new(|_| {
            Reply::Lines(vec![
                "FIRMWARE_NAME: RepRapFirmware for Duet 3 MB6HC FIRMWARE_VERSION: 3.5.0".to_owned(),
                "ok".to_owned(),
                "this arrives after ok".to_owned(),
            ])
        });
        let sent = transport.sent();
        let mut connection = Connection::new(transport, TIMEOUT, None);

        let started = Instant::now();
        let lines = connection.get_response("M115", false)?;
        assert!(started.elapsed() < TIMEOUT);
        assert_eq!(lines[0], "FIRMWARE_NAME: RepRapFirmware for Duet 3 MB6HC FIRMWARE_VERSION: 3.5.0");
        assert_eq!(lines[1], "ok");
        assert_eq!(*sent.lock().unwrap(), vec!["M115"]);
        Ok(())
    }

    #[test]
    fn test_json_response_stops_at_first_frame() -> TestResult {
        let transport = ScriptedTransport::new(|_| {
            Reply::Lines(vec![
                "M409 F\"vnd99\" K\"seqs\"".to_owned(),
                r#"{"key":"seqs","flags":"vnd99","result":{"state":3}}"#.to_owned(),
            ])
        });
        let mut connection = Connection::new(transport, TIMEOUT, None);

        let started = Instant::now();
        let lines = connection.get_response(r#"M409 F"vnd99" K"seqs""#, true)?;
        assert!(started.elapsed() < TIMEOUT);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], r#"{"key":"seqs","flags":"vnd99","result":{"state":3}}"#);
        Ok(())
    }

    #[test]
    fn test_json_request_reads_past_ok() -> TestResult {
        // A late `ok` from the previous exchange, then a frame that needs
        // several reads to arrive.
        let frame = om_reply("network", "vnd99", json!({ "name": "x".repeat(400) }));
        assert!(frame.len() > READ_CHUNK);
        let expected = frame.clone();
        let transport = ScriptedTransport::new(move |_| Reply::Lines(vec!["ok".to_owned(), frame.clone()]));
        let mut connection = Connection::new(transport, TIMEOUT, None);

        let lines = connection.get_response(r#"M409 F"vnd99" K"network""#, true)?;
        assert_eq!(lines, vec!["ok".to_owned(), expected]);
        assert_eq!(json_frames(&lines).len(), 1);
        Ok(())
    }

    #[test]
    fn test_timeout_is_an_empty_response() -> TestResult {
        let mut connection = Connection::new(ScriptedTransport::new(|_| Reply::Silence), TIMEOUT, None);

        let started = Instant::now();
        let lines = connection.get_response("M409 K\"heat\"", true)?;
        assert!(lines.is_empty());
        assert!(started.elapsed() >= TIMEOUT);
        Ok(())
    }

    #[test]
    fn test_unterminated_line_is_dropped_on_timeout() -> TestResult {
        let transport = ScriptedTransport::new(|_| Reply::Raw(b"partial {\"key\":".to_vec()));
        let mut connection = Connection::new(transport, TIMEOUT, None);

        assert!(connection.get_response("M409 K\"heat\"", true)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_stale_input_is_discarded_before_sending() -> TestResult {
        let mut transport = ScriptedTransport::new(|_| Reply::Lines(vec!["ok".to_owned()]));
        transport.push_unsolicited(b"{\"key\":\"heat\",\"flags\":\"vnd99\",\"result\":null}\nok\n");
        let log = SharedLog::default();
        let mut connection = Connection::new(transport, TIMEOUT, Some(Box::new(log.clone())));

        let lines = connection.get_response("M122", false)?;
        assert_eq!(lines, vec!["ok"]);

        let raw = log.contents();
        assert!(raw.starts_with("{\"key\":\"heat\""));
        assert!(raw.contains("\n> M122\n"));
        assert!(raw.ends_with("ok\n"));
        Ok(())
    }

    #[test]
    fn test_runaway_controller_is_fatal() {
        let mut connection = Connection::new(ScriptedTransport::new(|_| Reply::Endless), TIMEOUT, None);

        let started = Instant::now();
        let err = connection.get_response("M122", false).unwrap_err();
        assert!(matches!(err, Error::Runaway { .. }), "unexpected error: {:?}", err);
        assert!(started.elapsed() >= TIMEOUT * RUNAWAY_FACTOR);

        // The stream never drains, so the next send gives up too.
        let err = connection.send_command("M115").unwrap_err();
        assert!(matches!(err, Error::Runaway { .. }), "unexpected error: {:?}", err);
    }

    #[test]
    fn test_raw_log_file_appends() -> TestResult {
        let path = std::env::temp_dir().join(format!("rrf-raw-log-{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);

        for header in ["=== Starting: one", "=== Starting: two"] {
            let log = open_raw_log(&path, header)?;
            let transport = ScriptedTransport::new(|_| Reply::Lines(vec!["ok".to_owned()]));
            let mut connection = Connection::new(transport, TIMEOUT, Some(log));
            connection.get_response("M115", false)?;
        }

        let contents = std::fs::read_to_string(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(contents, "=== Starting: one\n\n> M115\nok\n=== Starting: two\n\n> M115\nok\n");
        Ok(())
    }

    #[test]
    fn test_missing_raw_log_directory_is_an_error() {
        let path = std::env::temp_dir().join("rrf-no-such-dir").join("raw.txt");
        assert!(matches!(open_raw_log(&path, "header"), Err(Error::Io(_))));
    }

    #[test]
    fn test_configure_sets_short_read_timeout() -> TestResult {
        let mut connection = Connection::new(
            ScriptedTransport::new(|_| Reply::Silence),
            Duration::from_millis(250),
            None,
        );
        connection.configure()?;
        assert_eq!(connection.into_inner().timeout, Some(Duration::from_millis(100)));
        Ok(())
    }

    #[test]
    fn test_huge_request_timeout_does_not_overflow() -> TestResult {
        let transport = ScriptedTransport::new(|_| Reply::Lines(vec!["ok".to_owned()]));
        let mut connection = Connection::new(transport, Duration::from_secs(u64::MAX), None);
        connection.configure()?;

        assert_eq!(connection.get_response("M115", false)?, vec!["ok"]);
        assert_eq!(connection.into_inner().timeout, Some(Duration::MAX / 5));
        Ok(())
    }
}
