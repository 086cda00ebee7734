//! Speedtest run orchestration.
//!
//! Drives one measurement worker at a time through a test run:
//! - **Orchestrator** — start/abort lifecycle, 10 Hz status polling, teardown
//! - **Fold** — merges partial worker status into a [`TestRun`]
//! - **History** — bounded, deduplicated sample log for live charts
//! - **Workers** — the [`Worker`] seam plus simulated and child-process workers

pub mod history;
pub mod orchestrator;
pub mod process;
pub mod run;
pub mod sim;
pub mod worker;

pub use history::{History, Sample};
pub use orchestrator::{Orchestrator, OrchestratorConfig, DEFAULT_POLL_INTERVAL};
pub use process::ProcessWorkerFactory;
pub use run::{merge, FoldOutcome, Measurement, PartialTestRun, TestRun};
pub use sim::{SimProfile, SimulatedWorkerFactory};
pub use worker::{Outbox, Worker, WorkerFactory};
