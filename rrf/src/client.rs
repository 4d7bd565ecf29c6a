//! Keeping a local copy of the object model in sync with the controller.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    config::{Config, ModeKeys},
    connection::{Connection, RawLog},
    error::{Error, Result},
    frame::{query_command, ResponseFrame, Verbosity},
    handshake,
    model::{Model, SEQS_KEY, STATE_KEY},
    reader::json_frames,
    sequence::SequenceCache,
    transport::Transport,
};

/// Where the client is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Constructed; nothing has been sent yet.
    Uninitialized,

    /// Running the firmware handshake.
    Connecting,

    /// Normal operation.
    Synced,

    /// A restart or mode change was seen and the local model was cleared.
    /// Stays here until a cycle has refetched every key.
    Resyncing,

    /// A fatal transport error occurred; the client must be rebuilt.
    Failed,
}

/// An object model client for a RepRapFirmware controller.
///
/// We make two kinds of request for each key: verbose requests returning
/// the whole key, and frequent requests returning only the values that
/// change often. Verbose requests are expensive for the controller, so
/// they are only made when the key's counter in `seqs` moves.
pub struct Client<T> {
    connection: Connection<T>,
    modes: ModeKeys,
    config: Config,
    model: Model,
    sequences: SequenceCache,
    machine_mode: String,
    up_time: Option<u64>,
    state: SyncState,
    configured: bool,
}

impl<T> Client<T>
where
    T: Transport,
{
    /// Create a client taking ownership of `transport`. Call
    /// [Client::connect] before polling; without it the transport read
    /// timeout is still set on the first request, but the firmware is never
    /// checked.
    pub fn new(transport: T, modes: ModeKeys, config: Config, raw_log: Option<RawLog>) -> Self {
        let sequences = SequenceCache::new(modes.tracked_keys());
        Self {
            connection: Connection::new(transport, config.request_timeout(), raw_log),
            modes,
            config,
            model: Model::default(),
            sequences,
            machine_mode: String::new(),
            up_time: None,
            state: SyncState::Uninitialized,
            configured: false,
        }
    }

    /// Create a client and [connect](Client::connect) it.
    pub fn open(transport: T, modes: ModeKeys, config: Config, raw_log: Option<RawLog>) -> Result<Self> {
        let mut client = Self::new(transport, modes, config, raw_log);
        client.connect()?;
        Ok(client)
    }

    /// Check we are talking to RepRapFirmware, then fill the local model.
    ///
    /// A failed handshake is fatal. A failed initial update is not; the
    /// next [Client::update] will try again.
    pub fn connect(&mut self) -> Result<()> {
        let quiet = self.config.quiet;
        notice!(quiet, "object model client is starting");
        self.state = SyncState::Connecting;

        self.configured = false;
        self.ensure_configured()?;

        notice!(quiet, "checking for connected RRF controller");
        if let Err(err) = handshake::wait_for_firmware(&mut self.connection, self.config.handshake_retries, quiet) {
            return Err(self.fail(err));
        }
        notice!(quiet, "controller is connected");
        std::thread::sleep(self.config.request_timeout());
        self.state = SyncState::Synced;

        notice!(quiet, "making initial data set request");
        if self.update()? {
            notice!(quiet, machine_mode = self.machine_mode.as_str(), "connected to object model");
        }
        if self.machine_mode.is_empty() {
            tracing::warn!("failed to obtain initial machine state");
        }
        Ok(())
    }

    /// Send a command to the controller without waiting for a reply.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        self.ensure_usable()?;
        self.ensure_configured()?;
        self.connection.send_command(command).map_err(|err| self.fail(err))
    }

    /// Send a command and return the lines sent back.
    pub fn get_response(&mut self, command: &str, expect_json: bool) -> Result<Vec<String>> {
        self.ensure_usable()?;
        self.ensure_configured()?;
        self.connection
            .get_response(command, expect_json)
            .map_err(|err| self.fail(err))
    }

    /// Run one poll cycle.
    ///
    /// Returns `Ok(false)` when anything in the cycle did not update; the
    /// local model keeps whatever it had and the next cycle tries again.
    /// Errors mean the connection is unusable.
    pub fn update(&mut self) -> Result<bool> {
        self.ensure_usable()?;
        self.ensure_configured()?;
        self.sync_cycle().map_err(|err| self.fail(err))
    }

    /// The local copy of the object model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The machine mode last reported by the controller, or `""` if none
    /// has been seen yet.
    pub fn machine_mode(&self) -> &str {
        &self.machine_mode
    }

    /// Controller uptime as of the last state fetch.
    pub fn up_time(&self) -> Option<u64> {
        self.up_time
    }

    /// Lifecycle state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Cached sequence numbers.
    pub fn sequence_cache(&self) -> &SequenceCache {
        &self.sequences
    }

    /// The per-mode key table this client was built with.
    pub fn modes(&self) -> &ModeKeys {
        &self.modes
    }

    /// Tear down the client, giving back the transport.
    pub fn into_transport(self) -> T {
        self.connection.into_inner()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == SyncState::Failed {
            return Err(Error::Disconnected);
        }
        Ok(())
    }

    fn ensure_configured(&mut self) -> Result<()> {
        if self.configured {
            return Ok(());
        }
        if let Err(err) = self.connection.configure() {
            return Err(self.fail(err));
        }
        self.configured = true;
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        tracing::error!(error = %err, "object model connection failed");
        self.state = SyncState::Failed;
        err
    }

    fn sync_cycle(&mut self) -> Result<bool> {
        let Some(seqs) = self.fetch_sequences()? else {
            notice!(self.config.quiet, "sequence key request failed");
            return Ok(false);
        };

        if !self.fetch_state(&seqs)? {
            notice!(self.config.quiet, "\"state\" key request failed");
            return Ok(false);
        }

        let Some(keys) = self.modes.keys_for(&self.machine_mode).map(<[String]>::to_vec) else {
            tracing::warn!(machine_mode = self.machine_mode.as_str(), "machine mode is not configured");
            return Ok(false);
        };

        let mut success = true;
        for key in keys {
            if !self.fetch_key(&key, &seqs)? {
                tracing::debug!(key = key.as_str(), "key request failed");
                success = false;
            }
        }
        if success && self.state == SyncState::Resyncing {
            notice!(self.config.quiet, "local model rebuilt");
            self.state = SyncState::Synced;
        }
        Ok(success)
    }

    /// Fetch `seqs` and return the counters it holds.
    fn fetch_sequences(&mut self) -> Result<Option<BTreeMap<String, i64>>> {
        if !self.request(SEQS_KEY, Verbosity::Verbose)? {
            return Ok(None);
        }
        let Some(Value::Object(seqs)) = self.model.get(SEQS_KEY) else {
            tracing::warn!("seqs result is not an object");
            return Ok(None);
        };
        Ok(Some(
            seqs.iter()
                .filter_map(|(key, sequence)| Some((key.clone(), sequence.as_i64()?)))
                .collect(),
        ))
    }

    /// Fetch `state`, starting over if the controller restarted or changed
    /// mode since the last cycle.
    fn fetch_state(&mut self, seqs: &BTreeMap<String, i64>) -> Result<bool> {
        let current = seqs.get(STATE_KEY).copied();
        let verbosity = self.verbosity_for(STATE_KEY, current);
        if !self.request(STATE_KEY, verbosity)? {
            return Ok(false);
        }

        let (Some(mode), Some(up_time)) = (self.model.machine_mode().map(str::to_owned), self.model.up_time()) else {
            tracing::warn!("state is missing machineMode or upTime");
            return Ok(false);
        };

        let restarted = self.up_time.is_some_and(|previous| up_time < previous);
        let mode_changed = !self.machine_mode.is_empty() && self.machine_mode != mode;
        if restarted {
            notice!(self.config.quiet, previous = ?self.up_time, up_time, "controller restarted; rebuilding local model");
            self.clean_start();
        } else if mode_changed {
            notice!(
                self.config.quiet,
                from = self.machine_mode.as_str(),
                to = mode.as_str(),
                "machine mode changed; rebuilding local model"
            );
            self.clean_start();
        }

        if let (Verbosity::Verbose, Some(sequence)) = (verbosity, current) {
            self.sequences.record(STATE_KEY, sequence);
        }
        self.up_time = Some(up_time);
        self.machine_mode = mode;
        Ok(true)
    }

    fn fetch_key(&mut self, key: &str, seqs: &BTreeMap<String, i64>) -> Result<bool> {
        let current = seqs.get(key).copied();
        let verbosity = self.verbosity_for(key, current);
        let updated = self.request(key, verbosity)?;
        if let (true, Verbosity::Verbose, Some(sequence)) = (updated, verbosity, current) {
            self.sequences.record(key, sequence);
        }
        Ok(updated)
    }

    fn verbosity_for(&self, key: &str, current: Option<i64>) -> Verbosity {
        if self.sequences.is_stale(key, current) {
            Verbosity::Verbose
        } else {
            Verbosity::Frequent
        }
    }

    /// Clear the local model and sequence cache, keeping only the state we
    /// just fetched.
    fn clean_start(&mut self) {
        let state = self.model.take(STATE_KEY);
        self.model = Model::default();
        if let Some(state) = state {
            self.model.replace(STATE_KEY, state);
        }
        self.sequences.reset();
        self.state = SyncState::Resyncing;
    }

    /// Make one `M409` request and apply the reply to the local model.
    fn request(&mut self, key: &str, verbosity: Verbosity) -> Result<bool> {
        let command = query_command(key, verbosity, self.config.max_depth);
        let response = self.connection.get_response(&command, true)?;
        let frames = json_frames(&response);
        if frames.is_empty() {
            tracing::debug!(key, ?verbosity, "no object model reply");
            return Ok(false);
        }
        Ok(self.apply_frames(key, &frames))
    }

    fn apply_frames(&mut self, key: &str, frames: &[String]) -> bool {
        let mut success = false;
        for candidate in frames {
            let value: Value = match serde_json::from_str(candidate) {
                Ok(value) => value,
                Err(e) => {
                    notice!(self.config.quiet, error = %e, candidate = candidate.as_str(), "invalid JSON");
                    continue;
                }
            };
            let frame: ResponseFrame = match serde_json::from_value(value) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "not an object model reply");
                    continue;
                }
            };
            if frame.key != key {
                tracing::debug!(expected = key, got = frame.key.as_str(), "discarding reply for another key");
                continue;
            }
            let frequent = frame.is_frequent();
            let Some(result) = frame.result else {
                continue;
            };

            if frequent {
                // A frequent request may legitimately have nothing new to say.
                if !result.is_null() {
                    self.model.merge(key, result);
                }
                success = true;
            } else if !result.is_null() {
                self.model.replace(key, result);
                success = true;
            } else {
                tracing::debug!(key, "verbose reply has no result; keeping stale value");
            }
        }
        success
    }
}
