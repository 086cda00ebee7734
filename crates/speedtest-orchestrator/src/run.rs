//! The live result of a single test run and the fold that builds it.
//!
//! A [`TestRun`] is only ever changed by merging worker status messages
//! into it. Each field has its own override rule (see [`TestRun::apply`]);
//! a message that fails to decode leaves the run untouched.

use serde::Serialize;

use speedtest_common::models::TestPhase;
use speedtest_common::protocol::StatusMessage;

use crate::history::{History, Sample};

/// Display value of a rate before any measurement arrives.
pub const ZERO_RATE: &str = "0.00";
/// Display value of a latency before any measurement arrives.
pub const ZERO_LATENCY: &str = "0";

/// A status message viewed as a patch over a [`TestRun`].
pub type PartialTestRun = StatusMessage;

/// A measured value in the worker's string precision plus its progress
/// fraction in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub value: String,
    pub progress: f64,
}

impl Measurement {
    fn zero(value: &str) -> Self {
        Self {
            value: value.into(),
            progress: 0.0,
        }
    }

    /// Progress as a whole percentage, for display.
    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRun {
    pub phase: TestPhase,
    pub client_ip: String,
    pub download: Measurement,
    pub upload: Measurement,
    /// Ping latency; its progress tracks the ping/jitter phase.
    pub ping: Measurement,
    pub jitter: String,
    pub test_id: Option<String>,
    pub history: History,
}

/// What a fold did with one raw worker message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Not decodable; the run is unchanged.
    Ignored,
    Merged { phase: TestPhase, sampled: bool },
}

impl FoldOutcome {
    pub fn is_merged(self) -> bool {
        matches!(self, FoldOutcome::Merged { .. })
    }

    pub fn reached_terminal(self) -> bool {
        matches!(self, FoldOutcome::Merged { phase, .. } if phase.is_terminal())
    }
}

impl TestRun {
    /// Zero-state, idle.
    pub fn idle(history_cap: usize) -> Self {
        Self {
            phase: TestPhase::Idle,
            client_ip: String::new(),
            download: Measurement::zero(ZERO_RATE),
            upload: Measurement::zero(ZERO_RATE),
            ping: Measurement::zero(ZERO_LATENCY),
            jitter: ZERO_LATENCY.into(),
            test_id: None,
            history: History::with_cap(history_cap),
        }
    }

    /// Zero-state, shown as in progress before the worker reports anything.
    pub fn starting(history_cap: usize) -> Self {
        Self {
            phase: TestPhase::Starting,
            ..Self::idle(history_cap)
        }
    }

    pub fn sample(&self) -> Sample {
        Sample {
            download: self.download.value.clone(),
            upload: self.upload.value.clone(),
            ping: self.ping.value.clone(),
            jitter: self.jitter.clone(),
        }
    }

    /// Overlay a patch onto this run.
    ///
    /// - `phase` moves forward only; a lower code is ignored unless the run is idle.
    /// - Rate and latency strings are replaced when present and non-empty.
    /// - `client_ip` is set once and never changed afterwards.
    /// - Progress fractions are replaced when finite, clamped to `[0, 1]`.
    /// - `test_id` is replaced when present.
    /// - A sample is appended to `history` when the patch's phase is a
    ///   measuring phase; the history itself drops repeats.
    ///
    /// Returns whether a history sample was recorded.
    pub fn apply(&mut self, patch: &PartialTestRun) -> bool {
        if patch.phase >= self.phase || self.phase == TestPhase::Idle {
            self.phase = patch.phase;
        } else {
            tracing::debug!(
                current = %self.phase,
                reported = %patch.phase,
                "ignoring phase regression"
            );
        }

        overlay_text(&mut self.download.value, patch.dl_status.as_deref());
        overlay_text(&mut self.upload.value, patch.ul_status.as_deref());
        overlay_text(&mut self.ping.value, patch.ping_status.as_deref());
        overlay_text(&mut self.jitter, patch.jitter_status.as_deref());

        if self.client_ip.is_empty() {
            if let Some(ip) = patch.client_ip.as_deref().filter(|ip| !ip.is_empty()) {
                self.client_ip = ip.to_string();
            }
        }

        overlay_progress(&mut self.download.progress, patch.dl_progress);
        overlay_progress(&mut self.upload.progress, patch.ul_progress);
        overlay_progress(&mut self.ping.progress, patch.ping_progress);

        if let Some(id) = &patch.test_id {
            self.test_id = Some(id.clone());
        }

        if patch.phase.is_measuring() {
            let sample = self.sample();
            self.history.push(sample)
        } else {
            false
        }
    }

    /// Decode a raw worker message and merge it. Malformed input is dropped
    /// without touching the run.
    pub fn fold_raw(&mut self, raw: &str) -> FoldOutcome {
        match StatusMessage::parse(raw) {
            Ok(patch) => {
                let sampled = self.apply(&patch);
                FoldOutcome::Merged {
                    phase: self.phase,
                    sampled,
                }
            }
            Err(e) => {
                tracing::trace!(error = %e, "dropping malformed worker message");
                FoldOutcome::Ignored
            }
        }
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::idle(History::DEFAULT_CAP)
    }
}

/// Pure form of [`TestRun::apply`].
pub fn merge(mut current: TestRun, patch: &PartialTestRun) -> TestRun {
    current.apply(patch);
    current
}

fn overlay_text(field: &mut String, incoming: Option<&str>) {
    if let Some(value) = incoming.filter(|v| !v.is_empty()) {
        if field != value {
            *field = value.to_string();
        }
    }
}

fn overlay_progress(field: &mut f64, incoming: Option<f64>) {
    if let Some(p) = incoming.filter(|p| p.is_finite()) {
        *field = p.clamp(0.0, 1.0);
    }
}
