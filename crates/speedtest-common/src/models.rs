//! Data models for the speedtest platform.
//!
//! These types are shared between the orchestrator (which folds worker
//! status into them), the server (which stores and aggregates telemetry)
//! and the CLI (which submits and displays them).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Test phase ──────────────────────────────────────────────────────

/// Discrete stage of a test run, integer-coded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestPhase {
    #[default]
    Idle,
    Starting,
    Download,
    Ping,
    Upload,
    Finished,
    Aborted,
}

impl TestPhase {
    /// Map a worker state code. Negative codes mean idle; codes past
    /// `Aborted` are unknown terminal states and collapse into it.
    pub fn from_code(code: i64) -> Self {
        match code {
            i64::MIN..=-1 => TestPhase::Idle,
            0 => TestPhase::Starting,
            1 => TestPhase::Download,
            2 => TestPhase::Ping,
            3 => TestPhase::Upload,
            4 => TestPhase::Finished,
            _ => TestPhase::Aborted,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            TestPhase::Idle => -1,
            TestPhase::Starting => 0,
            TestPhase::Download => 1,
            TestPhase::Ping => 2,
            TestPhase::Upload => 3,
            TestPhase::Finished => 4,
            TestPhase::Aborted => 5,
        }
    }

    /// One of the three phases that produce chartable samples.
    pub fn is_measuring(self) -> bool {
        matches!(
            self,
            TestPhase::Download | TestPhase::Ping | TestPhase::Upload
        )
    }

    /// `Finished` or `Aborted`; polling stops here.
    pub fn is_terminal(self) -> bool {
        self >= TestPhase::Finished
    }

    pub fn is_running(self) -> bool {
        !self.is_terminal() && self != TestPhase::Idle
    }
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestPhase::Idle => write!(f, "idle"),
            TestPhase::Starting => write!(f, "starting"),
            TestPhase::Download => write!(f, "download"),
            TestPhase::Ping => write!(f, "ping"),
            TestPhase::Upload => write!(f, "upload"),
            TestPhase::Finished => write!(f, "finished"),
            TestPhase::Aborted => write!(f, "aborted"),
        }
    }
}

impl Serialize for TestPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TestPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(TestPhase::from_code)
    }
}

// ── Telemetry ───────────────────────────────────────────────────────

/// Client-supplied fields of a telemetry submission.
///
/// `ip`, `ua` and `lang` are never taken from the body; the server derives
/// them from the request itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySubmission {
    pub ispinfo: Option<String>,
    pub extra: Option<String>,
    pub dl: Option<String>,
    pub ul: Option<String>,
    pub ping: Option<String>,
    pub jitter: Option<String>,
    pub log: Option<String>,
}

/// A stored telemetry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedtestRecord {
    pub id: i64,
    pub ip: Option<String>,
    pub ispinfo: Option<String>,
    pub extra: Option<String>,
    pub ua: Option<String>,
    pub lang: Option<String>,
    pub dl: Option<String>,
    pub ul: Option<String>,
    pub ping: Option<String>,
    pub jitter: Option<String>,
    pub log: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_tests: i64,
    pub avg_download: f64,
    pub avg_upload: f64,
    pub avg_ping: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub summary: StatsSummary,
    pub results: Vec<SpeedtestRecord>,
}

/// Round to a fixed number of decimal places for display aggregates.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ── Stats gate ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheck {
    pub logged: bool,
}
