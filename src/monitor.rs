//! The polling loop: connect, keep the model in sync, reconnect when the
//! controller goes away, and publish what we know after every cycle.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use rrf::{Client, RawLog, SyncState, Transport};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{config::Config, port};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Connection state as published to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No controller has been opened yet.
    #[default]
    Uninitialized,

    /// Handshaking with the controller.
    Connecting,

    /// Polling normally.
    Synced,

    /// Rebuilding the model after a restart or mode change.
    Resyncing,

    /// The connection failed; a reconnect is pending.
    Failed,
}

impl From<SyncState> for SyncStatus {
    fn from(state: SyncState) -> Self {
        match state {
            SyncState::Uninitialized => SyncStatus::Uninitialized,
            SyncState::Connecting => SyncStatus::Connecting,
            SyncState::Synced => SyncStatus::Synced,
            SyncState::Resyncing => SyncStatus::Resyncing,
            SyncState::Failed => SyncStatus::Failed,
        }
    }
}

/// Everything we know about the controller after the latest poll cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    /// The object model tree.
    pub model: serde_json::Value,

    /// Machine mode, or `""` if not known yet.
    pub machine_mode: String,

    /// Connection state.
    pub sync_state: SyncStatus,

    /// Serial device in use.
    pub device: Option<String>,

    /// Whether the latest cycle updated every key.
    pub last_cycle_ok: bool,

    /// Poll cycles run since startup.
    pub cycles: u64,

    /// Poll cycles which did not update every key.
    pub failures: u64,

    /// When this snapshot was taken.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            model: rrf::Model::default().to_value(),
            machine_mode: String::new(),
            sync_state: SyncStatus::default(),
            device: None,
            last_cycle_ok: false,
            cycles: 0,
            failures: 0,
            updated_at: None,
        }
    }
}

impl Snapshot {
    /// Controller status from `state.status`.
    pub fn status(&self) -> Option<&str> {
        self.model.get(rrf::STATE_KEY)?.get("status")?.as_str()
    }

    /// Controller uptime in seconds from `state.upTime`.
    pub fn up_time(&self) -> Option<u64> {
        self.model.get(rrf::STATE_KEY)?.get("upTime")?.as_u64()
    }
}

/// Polls a controller until told to stop.
pub struct Monitor {
    config: Config,
    stop: Arc<AtomicBool>,
    snapshots: watch::Sender<Snapshot>,
}

impl Monitor {
    /// Create a monitor, and a receiver for the snapshots it publishes.
    pub fn new(config: Config) -> (Self, watch::Receiver<Snapshot>) {
        let (snapshots, receiver) = watch::channel(Snapshot::default());
        let monitor = Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            snapshots,
        };
        (monitor, receiver)
    }

    /// Setting this flag ends [Monitor::run] between poll cycles.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Another receiver for published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Poll the first configured serial device that opens, until stopped.
    /// Blocks the calling thread.
    pub fn run(self) -> Result<()> {
        let serial = self.config.serial.clone();
        let timeout = self.config.poll.client_config().request_timeout();
        self.run_with(|| port::open_first(&serial.devices, serial.baud, timeout))
    }

    /// Like [Monitor::run], getting transports from `open`.
    pub fn run_with<T, F>(self, mut open: F) -> Result<()>
    where
        T: Transport,
        F: FnMut() -> Result<(String, T)>,
    {
        while !self.stopped() {
            if let Err(e) = self.session(&mut open) {
                tracing::warn!(
                    error = format!("{:#}", e),
                    delay = ?self.config.poll.reconnect_delay(),
                    "lost controller; reconnecting"
                );
                self.snapshots.send_modify(|snapshot| {
                    snapshot.sync_state = SyncStatus::Failed;
                    snapshot.last_cycle_ok = false;
                    snapshot.updated_at = Some(Utc::now());
                });
                self.pause(self.config.poll.reconnect_delay());
            }
        }
        tracing::info!("monitor stopped");
        Ok(())
    }

    /// Connect and poll until stopped (`Ok`) or the connection fails.
    fn session<T, F>(&self, open: &mut F) -> Result<()>
    where
        T: Transport,
        F: FnMut() -> Result<(String, T)>,
    {
        let (device, transport) = open()?;
        self.snapshots.send_modify(|snapshot| {
            snapshot.device = Some(device.clone());
            snapshot.sync_state = SyncStatus::Connecting;
        });

        let mut client = Client::open(
            transport,
            self.config.modes.clone(),
            self.config.poll.client_config(),
            self.open_raw_log(),
        )
        .with_context(|| format!("connecting to controller on {}", device))?;
        self.publish(&client, None);

        let update_time = self.config.poll.update_time();
        while !self.stopped() {
            let started = Instant::now();
            match client.update() {
                Ok(success) => self.publish(&client, Some(success)),
                Err(e) => {
                    self.publish(&client, Some(false));
                    return Err(e).context("polling controller");
                }
            }
            self.pause(update_time.saturating_sub(started.elapsed()));
        }
        Ok(())
    }

    fn publish<T>(&self, client: &Client<T>, cycle: Option<bool>)
    where
        T: Transport,
    {
        self.snapshots.send_modify(|snapshot| {
            snapshot.model = client.model().to_value();
            snapshot.machine_mode = client.machine_mode().to_owned();
            snapshot.sync_state = client.state().into();
            if let Some(success) = cycle {
                snapshot.cycles += 1;
                snapshot.last_cycle_ok = success;
                if !success {
                    snapshot.failures += 1;
                }
            }
            snapshot.updated_at = Some(Utc::now());
        });
    }

    fn open_raw_log(&self) -> Option<RawLog> {
        let path = self.config.poll.raw_log.as_ref()?;
        let header = format!("=== Starting: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        match rrf::open_raw_log(path, &header) {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open raw log; continuing without it");
                None
            }
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if stopped.
    fn pause(&self, duration: Duration) {
        // No deadline means the pause only ends when stopped.
        let deadline = Instant::now().checked_add(duration);
        while !self.stopped() {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => STOP_POLL_INTERVAL,
            };
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::Mutex,
    };

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use testresult::TestResult;

    use super::*;

    /// Answers `M115` and `M409` like an idle FFF machine.
    #[derive(Default)]
    struct FakeController {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        up_time: u64,
    }

    impl FakeController {
        fn reply(&mut self, command: &str) -> String {
            if command == "M115" {
                return "FIRMWARE_NAME: RepRapFirmware for Duet 3 Mini 5+\nok\n".to_owned();
            }
            let key = command.split("K\"").nth(1).and_then(|rest| rest.split('"').next());
            let flags = command.split("F\"").nth(1).and_then(|rest| rest.split('"').next());
            let (Some(key), Some(flags)) = (key, flags) else {
                return "ok\n".to_owned();
            };
            let result = match key {
                "seqs" => json!({ "state": 1, "heat": 1, "tools": 1, "job": 1, "boards": 1, "network": 1 }),
                "state" => {
                    self.up_time += 1;
                    json!({ "status": "idle", "machineMode": "FFF", "upTime": self.up_time })
                }
                _ if flags.starts_with('v') => json!({ "name": key }),
                _ => serde_json::Value::Null,
            };
            format!("{}\n", json!({ "key": key, "flags": flags, "result": result }))
        }
    }

    impl Read for FakeController {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                std::thread::sleep(Duration::from_millis(1));
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for FakeController {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            while let Some(pos) = self.outbound.windows(2).position(|w| w == b"\r\n") {
                let command: Vec<u8> = self.outbound.drain(..pos + 2).collect();
                let reply = self.reply(&String::from_utf8_lossy(&command[..pos]));
                self.inbound.extend(reply.as_bytes());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for FakeController {
        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(self.inbound.len())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.poll.update_time_ms = 10;
        config.poll.request_timeout_ms = 20;
        config.poll.reconnect_delay_secs = 0;
        config.poll.quiet = true;
        config
    }

    fn wait_for<F>(receiver: &watch::Receiver<Snapshot>, done: F) -> Snapshot
    where
        F: Fn(&Snapshot) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = receiver.borrow().clone();
            if done(&snapshot) || Instant::now() > deadline {
                return snapshot;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_snapshot_default() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.status(), Some("unknown"));
        assert_eq!(snapshot.up_time(), None);
        assert_eq!(snapshot.sync_state, SyncStatus::Uninitialized);
    }

    #[test]
    fn test_monitor_publishes_cycles() -> TestResult {
        let (monitor, receiver) = Monitor::new(config());
        let stop = monitor.stop_flag();
        let handle = std::thread::spawn(move || {
            monitor.run_with(|| Ok(("/dev/fake".to_owned(), FakeController::default())))
        });

        let snapshot = wait_for(&receiver, |snapshot| snapshot.cycles >= 3);
        stop.store(true, Ordering::SeqCst);
        handle.join().expect("monitor thread panicked")?;

        assert!(snapshot.cycles >= 3);
        assert_eq!(snapshot.failures, 0);
        assert!(snapshot.last_cycle_ok);
        assert_eq!(snapshot.sync_state, SyncStatus::Synced);
        assert_eq!(snapshot.machine_mode, "FFF");
        assert_eq!(snapshot.device.as_deref(), Some("/dev/fake"));
        assert_eq!(snapshot.status(), Some("idle"));
        assert!(snapshot.up_time().is_some());
        assert_eq!(snapshot.model.get("heat"), Some(&json!({ "name": "heat" })));
        assert!(snapshot.updated_at.is_some());
        Ok(())
    }

    #[test]
    fn test_monitor_retries_open() -> TestResult {
        let (monitor, receiver) = Monitor::new(config());
        let stop = monitor.stop_flag();
        let attempts = Arc::new(Mutex::new(0));
        let counter = attempts.clone();
        let handle = std::thread::spawn(move || {
            monitor.run_with(move || {
                let mut attempts = counter.lock().unwrap();
                *attempts += 1;
                if *attempts < 3 {
                    anyhow::bail!("device busy");
                }
                Ok(("/dev/fake".to_owned(), FakeController::default()))
            })
        });

        let snapshot = wait_for(&receiver, |snapshot| snapshot.cycles >= 1);
        stop.store(true, Ordering::SeqCst);
        handle.join().expect("monitor thread panicked")?;

        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(snapshot.sync_state, SyncStatus::Synced);
        Ok(())
    }

    #[test]
    fn test_stopped_monitor_does_not_open() -> TestResult {
        let (monitor, _receiver) = Monitor::new(config());
        monitor.stop_flag().store(true, Ordering::SeqCst);
        monitor.run_with(|| -> Result<(String, FakeController)> { panic!("should not open") })?;
        Ok(())
    }

    #[test]
    fn test_endless_pause_ends_when_stopped() {
        let (monitor, _receiver) = Monitor::new(config());
        let stop = monitor.stop_flag();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stop.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        monitor.pause(Duration::MAX);
        assert!(started.elapsed() >= Duration::from_millis(20));
        stopper.join().unwrap();

        // Already stopped: returns at once.
        monitor.pause(Duration::MAX);
    }
}
