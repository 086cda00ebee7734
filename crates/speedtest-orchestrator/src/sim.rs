//! Simulated measurement worker.
//!
//! Walks Starting → Download → Ping → Upload → Finished on a fixed
//! timeline and answers every `status` with synthetic but plausible
//! values. Used by `--simulate` and by tests; no network traffic is made.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use speedtest_common::models::TestPhase;
use speedtest_common::protocol::{StatusMessage, TelemetryLevel, WorkerCommand};

use crate::worker::{Outbox, Worker, WorkerFactory};

/// Timeline and target values of a simulated run.
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub setup: Duration,
    pub download: Duration,
    pub ping: Duration,
    pub upload: Duration,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub client_ip: String,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            setup: Duration::from_millis(300),
            download: Duration::from_secs(4),
            ping: Duration::from_secs(1),
            upload: Duration::from_secs(4),
            download_mbps: 94.0,
            upload_mbps: 21.5,
            ping_ms: 14.0,
            jitter_ms: 1.8,
            client_ip: "127.0.0.1".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedWorkerFactory {
    profile: SimProfile,
}

impl SimulatedWorkerFactory {
    pub fn new(profile: SimProfile) -> Self {
        Self { profile }
    }
}

impl WorkerFactory for SimulatedWorkerFactory {
    fn spawn(&self, outbox: Outbox) -> anyhow::Result<Arc<dyn Worker>> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let (commands, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(simulate(self.profile.clone(), rx, outbox));
        Ok(Arc::new(SimulatedWorker { commands, task }))
    }
}

struct SimulatedWorker {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl Worker for SimulatedWorker {
    fn post(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            tracing::trace!("simulated worker gone, command dropped");
        }
    }

    fn terminate(&self) {
        self.task.abort();
    }
}

/// Per-run state of the simulated worker.
#[derive(Debug, Default)]
struct SimRun {
    started_at: Option<Instant>,
    aborted: bool,
    telemetry: TelemetryLevel,
    test_id: Option<String>,
}

async fn simulate(
    profile: SimProfile,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    outbox: Outbox,
) {
    let mut run = SimRun::default();

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Start(config) => {
                tracing::debug!(
                    telemetry = ?config.telemetry_level,
                    download = %config.download_endpoint,
                    upload = %config.upload_endpoint,
                    "simulated worker starting"
                );
                run = SimRun {
                    started_at: Some(Instant::now()),
                    telemetry: config.telemetry_level,
                    ..SimRun::default()
                };
            }
            WorkerCommand::Status => {
                let elapsed = run.started_at.map(|t| t.elapsed());
                let mut status = snapshot(&profile, elapsed, run.aborted);
                if status.phase == TestPhase::Finished && run.telemetry != TelemetryLevel::Disabled {
                    let id = run
                        .test_id
                        .get_or_insert_with(|| rand::rng().random_range(1_000..1_000_000).to_string());
                    status.test_id = Some(id.clone());
                }
                if outbox.send(status.to_json()).await.is_err() {
                    break;
                }
            }
            WorkerCommand::Abort => {
                tracing::debug!("simulated worker aborted");
                run.aborted = true;
            }
        }
    }
}

/// Status of a simulated run `elapsed` after its start.
fn snapshot(profile: &SimProfile, elapsed: Option<Duration>, aborted: bool) -> StatusMessage {
    let Some(elapsed) = elapsed else {
        return StatusMessage::new(TestPhase::Idle);
    };
    if aborted {
        return StatusMessage::new(TestPhase::Aborted);
    }

    let dl_end = profile.setup + profile.download;
    let ping_end = dl_end + profile.ping;
    let ul_end = ping_end + profile.upload;

    let mut status = StatusMessage {
        client_ip: Some(profile.client_ip.clone()),
        ..StatusMessage::default()
    };

    if elapsed < profile.setup {
        status.phase = TestPhase::Starting;
        return status;
    }

    if elapsed < dl_end {
        let p = fraction(elapsed - profile.setup, profile.download);
        status.phase = TestPhase::Download;
        status.dl_status = Some(rate(ramp(profile.download_mbps, p)));
        status.dl_progress = Some(p);
        return status;
    }

    status.dl_status = Some(rate(profile.download_mbps));
    status.dl_progress = Some(1.0);

    if elapsed < ping_end {
        let p = fraction(elapsed - dl_end, profile.ping);
        status.phase = TestPhase::Ping;
        status.ping_status = Some(rate(noisy(profile.ping_ms, 0.1)));
        status.jitter_status = Some(rate(noisy(profile.jitter_ms, 0.2)));
        status.ping_progress = Some(p);
        return status;
    }

    status.ping_status = Some(rate(profile.ping_ms));
    status.jitter_status = Some(rate(profile.jitter_ms));
    status.ping_progress = Some(1.0);

    if elapsed < ul_end {
        let p = fraction(elapsed - ping_end, profile.upload);
        status.phase = TestPhase::Upload;
        status.ul_status = Some(rate(ramp(profile.upload_mbps, p)));
        status.ul_progress = Some(p);
        return status;
    }

    status.phase = TestPhase::Finished;
    status.ul_status = Some(rate(profile.upload_mbps));
    status.ul_progress = Some(1.0);
    status
}

fn fraction(elapsed: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
}

/// TCP-like ramp towards `target` with a little measurement noise.
fn ramp(target: f64, progress: f64) -> f64 {
    noisy(target * (1.0 - (-5.0 * progress).exp()), 0.03)
}

fn noisy(value: f64, spread: f64) -> f64 {
    let factor = 1.0 + rand::rng().random_range(-spread..=spread);
    (value * factor).max(0.0)
}

fn rate(value: f64) -> String {
    format!("{value:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::orchestrator::{Orchestrator, OrchestratorConfig};

    fn quick_profile() -> SimProfile {
        SimProfile {
            setup: Duration::from_millis(100),
            download: Duration::from_millis(800),
            ping: Duration::from_millis(300),
            upload: Duration::from_millis(800),
            ..SimProfile::default()
        }
    }

    #[test]
    fn timeline_phases() {
        let p = quick_profile();
        let at = |ms| snapshot(&p, Some(Duration::from_millis(ms)), false).phase;
        assert_eq!(snapshot(&p, None, false).phase, TestPhase::Idle);
        assert_eq!(at(50), TestPhase::Starting);
        assert_eq!(at(500), TestPhase::Download);
        assert_eq!(at(1000), TestPhase::Ping);
        assert_eq!(at(1500), TestPhase::Upload);
        assert_eq!(at(5000), TestPhase::Finished);
    }

    #[test]
    fn aborted_run_reports_abort() {
        let p = quick_profile();
        let status = snapshot(&p, Some(Duration::from_millis(500)), true);
        assert_eq!(status.phase, TestPhase::Aborted);
    }

    #[test]
    fn finished_snapshot_has_final_values() {
        let p = quick_profile();
        let status = snapshot(&p, Some(Duration::from_secs(10)), false);
        assert_eq!(status.dl_status.as_deref(), Some("94.00"));
        assert_eq!(status.ul_status.as_deref(), Some("21.50"));
        assert_eq!(status.ping_status.as_deref(), Some("14.00"));
        assert_eq!(status.ul_progress, Some(1.0));
    }

    #[test]
    fn ramp_stays_near_target() {
        for i in 0..=10 {
            let v = ramp(100.0, i as f64 / 10.0);
            assert!((0.0..=103.0).contains(&v), "ramp out of range: {v}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn orchestrated_simulation_runs_to_completion() {
        let config = OrchestratorConfig {
            history_cap: 8,
            ..OrchestratorConfig::default()
        };
        let mut orch = Orchestrator::new(
            Arc::new(SimulatedWorkerFactory::new(quick_profile())),
            config,
        );
        let mut rx = orch.subscribe();
        orch.start().unwrap();

        let mut phases = Vec::new();
        loop {
            tokio::time::timeout(Duration::from_secs(10), rx.changed())
                .await
                .expect("simulation stalled")
                .unwrap();
            let run = rx.borrow_and_update().clone();
            assert!(run.history.len() <= 8);
            phases.push(run.phase);
            if run.phase.is_terminal() {
                break;
            }
        }

        assert!(phases.windows(2).all(|w| w[0] <= w[1]));
        assert!(phases.contains(&TestPhase::Download));
        assert!(phases.contains(&TestPhase::Upload));

        let run = orch.snapshot();
        assert_eq!(run.phase, TestPhase::Finished);
        assert_eq!(run.download.value, "94.00");
        assert_eq!(run.client_ip, "127.0.0.1");
        assert!(!run.history.is_empty());
        assert!(run.test_id.is_some());
        assert!(!orch.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_mid_run_returns_to_idle() {
        let mut orch = Orchestrator::new(
            Arc::new(SimulatedWorkerFactory::new(quick_profile())),
            OrchestratorConfig::default(),
        );
        orch.start().unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(orch.snapshot().phase, TestPhase::Download);

        orch.abort();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(orch.snapshot().phase, TestPhase::Idle);
        assert!(!orch.is_active());
    }
}
