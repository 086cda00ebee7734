//! Wire protocol between the test orchestrator and the measurement worker.
//!
//! Commands sent to the worker are plain strings:
//! - `start <json>` — begin a run with the given [`SessionConfig`]
//! - `status` — ask the worker to emit one status message
//! - `abort` — stop the run
//!
//! The worker answers with JSON objects ([`StatusMessage`]) carrying the
//! current phase and any subset of the measured values.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TestPhase;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    EmptyCommand,
    #[error("unknown worker command: {0}")]
    UnknownCommand(String),
    #[error("malformed start payload: {0}")]
    BadStartPayload(#[source] serde_json::Error),
    #[error("malformed status message: {0}")]
    BadStatus(#[source] serde_json::Error),
}

// ── Session configuration ───────────────────────────────────────────

/// How much telemetry the worker reports alongside a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryLevel {
    Disabled,
    #[default]
    Basic,
    Full,
    Debug,
}

/// Configuration forwarded verbatim to the worker on `start`.
///
/// The endpoint strings are opaque here; the worker resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub telemetry_level: TelemetryLevel,
    #[serde(rename = "url_getIp")]
    pub ip_endpoint: String,
    #[serde(rename = "url_telemetry")]
    pub telemetry_endpoint: String,
    #[serde(rename = "url_dl")]
    pub download_endpoint: String,
    #[serde(rename = "url_ul")]
    pub upload_endpoint: String,
    #[serde(rename = "url_ping")]
    pub ping_endpoint: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            telemetry_level: TelemetryLevel::Basic,
            ip_endpoint: "/api/getIp".into(),
            telemetry_endpoint: "/api/telemetry".into(),
            download_endpoint: "backend/garbage.php".into(),
            upload_endpoint: "backend/empty.php".into(),
            ping_endpoint: "backend/empty.php".into(),
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// A command posted to the measurement worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Start(SessionConfig),
    Status,
    Abort,
}

impl WorkerCommand {
    /// Render the command in the worker's line format.
    pub fn encode(&self) -> String {
        match self {
            WorkerCommand::Start(config) => {
                // SessionConfig holds only strings and a unit enum, so this cannot fail.
                let json = serde_json::to_string(config).unwrap_or_else(|_| "{}".into());
                format!("start {json}")
            }
            WorkerCommand::Status => "status".into(),
            WorkerCommand::Abort => "abort".into(),
        }
    }

    /// Parse a command line as received by a worker.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb {
            "" => Err(ProtocolError::EmptyCommand),
            "status" => Ok(WorkerCommand::Status),
            "abort" => Ok(WorkerCommand::Abort),
            "start" if rest.is_empty() => Ok(WorkerCommand::Start(SessionConfig::default())),
            "start" => serde_json::from_str(rest)
                .map(WorkerCommand::Start)
                .map_err(ProtocolError::BadStartPayload),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

// ── Status messages ─────────────────────────────────────────────────

/// A possibly-partial progress snapshot emitted by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(rename = "testState", alias = "phase")]
    pub phase: TestPhase,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub dl_status: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub ul_status: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub ping_status: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub jitter_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dl_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ul_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_progress: Option<f64>,
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

impl StatusMessage {
    /// Decode a raw worker message. Anything that is not a JSON object with
    /// an integer phase is rejected.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::BadStatus)
    }

    pub fn new(phase: TestPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Workers report numeric values either as strings ("12.34") or as bare
/// JSON numbers; both are kept in their decimal string form.
fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
