//! Per-server state shared by request handlers.

use tokio::sync::watch;

use crate::monitor::Snapshot;

/**
 * Application-specific context (state shared by handler functions)
 */
pub struct Context {
    /// The OpenAPI schema served at `/`.
    pub schema: serde_json::Value,

    /// Logger for request handling.
    pub logger: slog::Logger,

    /// Latest snapshot published by the monitor.
    pub snapshots: watch::Receiver<Snapshot>,
}

impl Context {
    /**
     * Return a new Context.
     */
    pub fn new(schema: serde_json::Value, logger: slog::Logger, snapshots: watch::Receiver<Snapshot>) -> Context {
        Context {
            schema,
            logger,
            snapshots,
        }
    }

    /// A copy of the latest snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }
}
