//! Test orchestrator — owns the lifecycle of one test run at a time.
//!
//! `start()` spawns a worker, posts `start <config>` and then requests a
//! status message every poll interval. Each message the worker sends back
//! is folded into the published [`TestRun`]. Polling stops once a folded
//! message reports a terminal phase.
//!
//! Every run has a gate. Status requests and folds happen only while
//! holding the gate open; `abort()`, a restart and `Drop` close it before
//! returning, so nothing is posted or folded for a run once it is torn
//! down, even if the driver task has not observed its cancellation yet.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use speedtest_common::ids;
use speedtest_common::protocol::{SessionConfig, WorkerCommand};

use crate::history::History;
use crate::run::{FoldOutcome, TestRun};
use crate::worker::{Worker, WorkerFactory, OUTBOX_CAPACITY};

/// Status request cadence (10 Hz).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub history_cap: usize,
    /// Forwarded verbatim with the `start` command.
    pub session: SessionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            history_cap: History::DEFAULT_CAP,
            session: SessionConfig::default(),
        }
    }
}

pub struct Orchestrator {
    factory: Arc<dyn WorkerFactory>,
    config: OrchestratorConfig,
    result: Arc<watch::Sender<TestRun>>,
    active: Option<ActiveRun>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn WorkerFactory>, config: OrchestratorConfig) -> Self {
        let (result, _) = watch::channel(TestRun::idle(config.history_cap));
        Self {
            factory,
            config,
            result: Arc::new(result),
            active: None,
        }
    }

    /// Start a new run, tearing down any run that is still live.
    ///
    /// Must be called from within a tokio runtime. Returns the run ID.
    pub fn start(&mut self) -> anyhow::Result<String> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow::anyhow!("test runs need a tokio runtime"))?;

        if let Some(previous) = self.active.take() {
            tracing::info!(run_id = %previous.id, "replacing live test run");
            previous.stop(false);
        }

        let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);
        let worker = match self.factory.spawn(outbox) {
            Ok(worker) => worker,
            Err(e) => {
                self.result
                    .send_replace(TestRun::idle(self.config.history_cap));
                return Err(e.context("failed to spawn measurement worker"));
            }
        };

        let run_id = ids::run_id();
        self.result
            .send_replace(TestRun::starting(self.config.history_cap));
        worker.post(WorkerCommand::Start(self.config.session.clone()));

        let gate = Arc::new(Gate::new());
        let driver = Driver {
            gate: gate.clone(),
            worker: worker.clone(),
            inbox,
            result: self.result.clone(),
            poll_interval: self.config.poll_interval,
        };
        let span = tracing::info_span!("test_run", run_id = %run_id);
        let driver = runtime.spawn(driver.run().instrument(span));

        tracing::info!(
            run_id = %run_id,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "test run started"
        );

        self.active = Some(ActiveRun {
            id: run_id.clone(),
            gate,
            worker,
            driver,
        });
        Ok(run_id)
    }

    /// Abort the live run, if any, and return the display to idle.
    /// Safe to call at any time, any number of times.
    pub fn abort(&mut self) {
        if let Some(run) = self.active.take() {
            tracing::info!(run_id = %run.id, "aborting test run");
            run.stop(true);
        }
        self.result
            .send_replace(TestRun::idle(self.config.history_cap));
    }

    /// Receive every published change to the run.
    pub fn subscribe(&self) -> watch::Receiver<TestRun> {
        self.result.subscribe()
    }

    pub fn snapshot(&self) -> TestRun {
        self.result.borrow().clone()
    }

    /// A run is live and has not reached a terminal phase.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| !run.driver.is_finished())
            && self.result.borrow().phase.is_running()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.active.as_ref().map(|run| run.id.as_str())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(run) = self.active.take() {
            tracing::debug!(run_id = %run.id, "orchestrator dropped, stopping run");
            run.stop(false);
        }
    }
}

// ── Run plumbing ────────────────────────────────────────────────────

/// Open while a run may post status requests and fold messages.
struct Gate {
    open: Mutex<bool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handles owned exclusively by the orchestrator for the live run.
struct ActiveRun {
    id: String,
    gate: Arc<Gate>,
    worker: Arc<dyn Worker>,
    driver: JoinHandle<()>,
}

impl ActiveRun {
    fn stop(self, send_abort: bool) {
        *self.gate.lock() = false;
        if send_abort {
            self.worker.post(WorkerCommand::Abort);
        }
        self.worker.terminate();
        self.driver.abort();
    }
}

/// Background task of one run: the poll ticker plus the message fold.
struct Driver {
    gate: Arc<Gate>,
    worker: Arc<dyn Worker>,
    inbox: mpsc::Receiver<String>,
    result: Arc<watch::Sender<TestRun>>,
    poll_interval: Duration,
}

impl Driver {
    async fn run(mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polling = true;

        loop {
            tokio::select! {
                _ = ticker.tick(), if polling => {
                    if !self.request_status() {
                        break;
                    }
                }
                msg = self.inbox.recv() => {
                    let Some(raw) = msg else {
                        if polling {
                            tracing::warn!("worker went away before the run finished");
                        }
                        break;
                    };
                    let Some(outcome) = self.fold(&raw) else {
                        break;
                    };
                    if let FoldOutcome::Merged { phase, .. } = outcome {
                        if polling && phase.is_terminal() {
                            polling = false;
                            tracing::info!(%phase, "test run ended, polling stopped");
                        }
                    }
                }
            }
        }

        tracing::debug!("run driver exiting");
    }

    /// Returns `false` once the gate is closed.
    fn request_status(&self) -> bool {
        let open = self.gate.lock();
        if !*open {
            return false;
        }
        self.worker.post(WorkerCommand::Status);
        true
    }

    /// Returns `None` once the gate is closed.
    fn fold(&self, raw: &str) -> Option<FoldOutcome> {
        let open = self.gate.lock();
        if !*open {
            return None;
        }
        let mut outcome = FoldOutcome::Ignored;
        self.result.send_if_modified(|run| {
            outcome = run.fold_raw(raw);
            outcome.is_merged()
        });
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use speedtest_common::models::TestPhase;

    use crate::worker::Outbox;

    /// Records every command each spawned worker receives.
    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<(usize, WorkerCommand)>>,
        terminated: Mutex<Vec<usize>>,
        outboxes: Mutex<Vec<Outbox>>,
    }

    impl Recorder {
        fn status_count(&self, worker: usize) -> usize {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|(w, c)| *w == worker && *c == WorkerCommand::Status)
                .count()
        }

        fn commands_of(&self, worker: usize) -> Vec<WorkerCommand> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|(w, _)| *w == worker)
                .map(|(_, c)| c.clone())
                .collect()
        }

        fn is_terminated(&self, worker: usize) -> bool {
            self.terminated.lock().unwrap().contains(&worker)
        }

        async fn emit(&self, worker: usize, raw: &str) {
            let tx = self.outboxes.lock().unwrap()[worker].clone();
            let _ = tx.send(raw.to_string()).await;
            settle().await;
        }
    }

    struct RecordingWorker {
        index: usize,
        recorder: Arc<Recorder>,
    }

    impl Worker for RecordingWorker {
        fn post(&self, command: WorkerCommand) {
            self.recorder
                .commands
                .lock()
                .unwrap()
                .push((self.index, command));
        }

        fn terminate(&self) {
            self.recorder.terminated.lock().unwrap().push(self.index);
        }
    }

    struct RecordingFactory {
        recorder: Arc<Recorder>,
    }

    impl WorkerFactory for RecordingFactory {
        fn spawn(&self, outbox: Outbox) -> anyhow::Result<Arc<dyn Worker>> {
            let mut outboxes = self.recorder.outboxes.lock().unwrap();
            let index = outboxes.len();
            outboxes.push(outbox);
            Ok(Arc::new(RecordingWorker {
                index,
                recorder: self.recorder.clone(),
            }))
        }
    }

    struct FailingFactory;

    impl WorkerFactory for FailingFactory {
        fn spawn(&self, _outbox: Outbox) -> anyhow::Result<Arc<dyn Worker>> {
            anyhow::bail!("no worker binary")
        }
    }

    fn orchestrator() -> (Orchestrator, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let factory = Arc::new(RecordingFactory {
            recorder: recorder.clone(),
        });
        (
            Orchestrator::new(factory, OrchestratorConfig::default()),
            recorder,
        )
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_sends_config_then_polls_at_10hz() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        assert_eq!(
            rec.commands_of(0).first(),
            Some(&WorkerCommand::Start(SessionConfig::default()))
        );

        advance(1050).await;
        assert_eq!(rec.status_count(0), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn start_shows_in_progress_immediately() {
        let (mut orch, _rec) = orchestrator();
        assert_eq!(orch.snapshot().phase, TestPhase::Idle);
        orch.start().unwrap();
        assert_eq!(orch.snapshot().phase, TestPhase::Starting);
        assert!(orch.is_active());
        assert!(orch.run_id().unwrap().starts_with("run_"));
    }

    #[tokio::test(start_paused = true)]
    async fn download_status_is_published() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();

        rec.emit(0, r#"{"testState":1,"dlStatus":"50.00","dlProgress":0.5}"#)
            .await;

        let run = orch.snapshot();
        assert_eq!(run.phase, TestPhase::Download);
        assert_eq!(run.download.value, "50.00");
        assert_eq!(run.download.percent(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_status_adds_one_history_entry() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();

        rec.emit(0, r#"{"testState":1,"dlStatus":"10.00"}"#).await;
        rec.emit(0, r#"{"testState":1,"dlStatus":"10.00"}"#).await;

        assert_eq!(orch.snapshot().history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_phase_stops_polling() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        advance(250).await;
        let before = rec.status_count(0);
        assert_eq!(before, 2);

        rec.emit(0, r#"{"testState":4}"#).await;
        advance(1000).await;
        assert_eq!(rec.status_count(0), before);
        assert!(!orch.is_active());

        // Late messages are still folded.
        rec.emit(0, r#"{"testState":4,"testId":"77"}"#).await;
        assert_eq!(orch.snapshot().test_id.as_deref(), Some("77"));
        assert_eq!(orch.snapshot().phase, TestPhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_polling_and_returns_to_idle() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        rec.emit(0, r#"{"testState":1,"dlStatus":"31.00"}"#).await;
        advance(300).await;

        orch.abort();
        assert_eq!(orch.snapshot().phase, TestPhase::Idle);
        assert!(rec.is_terminated(0));
        assert_eq!(rec.commands_of(0).last(), Some(&WorkerCommand::Abort));
        assert!(!orch.is_active());

        let polled = rec.status_count(0);
        advance(1000).await;
        assert_eq!(rec.status_count(0), polled);

        rec.emit(0, r#"{"testState":3,"ulStatus":"9.00"}"#).await;
        assert_eq!(orch.snapshot().phase, TestPhase::Idle);
        assert_eq!(orch.snapshot().upload.value, "0.00");
    }

    #[tokio::test(start_paused = true)]
    async fn abort_without_run_is_harmless() {
        let (mut orch, rec) = orchestrator();
        orch.abort();
        orch.abort();
        assert_eq!(orch.snapshot().phase, TestPhase::Idle);
        assert!(rec.commands.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_tears_down_previous_run() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        rec.emit(0, r#"{"testState":1,"dlStatus":"12.00"}"#).await;
        advance(350).await;

        orch.start().unwrap();
        assert!(rec.is_terminated(0));
        assert_eq!(orch.snapshot().phase, TestPhase::Starting);
        assert!(orch.snapshot().history.is_empty());
        assert_eq!(orch.snapshot().download.value, "0.00");

        let old = rec.status_count(0);
        advance(1050).await;
        assert_eq!(rec.status_count(0), old);
        assert_eq!(rec.status_count(1), 10);

        // The old worker can no longer touch the display.
        rec.emit(0, r#"{"testState":3,"ulStatus":"99.00"}"#).await;
        assert_eq!(orch.snapshot().upload.value, "0.00");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_changes_nothing() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        rec.emit(0, r#"{"testState":2,"pingStatus":"18"}"#).await;

        let mut rx = orch.subscribe();
        let before = rx.borrow_and_update().clone();

        rec.emit(0, "<html>502 Bad Gateway</html>").await;
        rec.emit(0, r#"{"testState":2,"pingStatus":"#).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(orch.snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_terminates_worker_and_polling() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        advance(200).await;
        drop(orch);

        assert!(rec.is_terminated(0));
        let polled = rec.status_count(0);
        advance(1000).await;
        assert_eq!(rec.status_count(0), polled);
        assert_ne!(rec.commands_of(0).last(), Some(&WorkerCommand::Abort));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_outbox_ends_run() {
        let (mut orch, rec) = orchestrator();
        orch.start().unwrap();
        rec.outboxes.lock().unwrap().clear();
        settle().await;

        assert!(!orch.is_active());
        let polled = rec.status_count(0);
        advance(500).await;
        assert_eq!(rec.status_count(0), polled);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_leaves_idle() {
        let mut orch = Orchestrator::new(Arc::new(FailingFactory), OrchestratorConfig::default());
        let err = orch.start().unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
        assert_eq!(orch.snapshot().phase, TestPhase::Idle);
        assert!(orch.run_id().is_none());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (mut orch, rec) = orchestrator();
        assert!(orch.start().is_err());
        assert!(rec.commands.lock().unwrap().is_empty());
    }
}
