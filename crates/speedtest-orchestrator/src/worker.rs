//! The seam between the orchestrator and a measurement worker.
//!
//! A worker is a black box that accepts [`WorkerCommand`]s and emits raw
//! status strings on an outbox channel, at whatever rate it likes. The
//! orchestrator never inspects a worker beyond this contract.

use std::sync::Arc;

use tokio::sync::mpsc;

use speedtest_common::protocol::WorkerCommand;

/// Capacity of the channel carrying worker messages to the orchestrator.
pub const OUTBOX_CAPACITY: usize = 128;

/// Where a worker delivers its status messages.
pub type Outbox = mpsc::Sender<String>;

/// A live measurement worker.
pub trait Worker: Send + Sync {
    /// Fire-and-forget; commands posted after [`Worker::terminate`] are dropped.
    fn post(&self, command: WorkerCommand);

    /// Stop the worker. Must not block and must be safe to call repeatedly.
    /// No status is delivered once this returns, but the underlying shutdown
    /// may complete later; commands posted just before (such as `abort`)
    /// reach the worker on a best-effort basis.
    fn terminate(&self);
}

/// Constructs a fresh worker for each test run.
pub trait WorkerFactory: Send + Sync {
    fn spawn(&self, outbox: Outbox) -> anyhow::Result<Arc<dyn Worker>>;
}
