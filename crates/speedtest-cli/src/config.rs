//! Client configuration file (TOML).
//!
//! ```toml
//! server = "http://speedtest.lan:3000"
//! poll_interval_ms = 100
//! history_cap = 60
//! worker_cmd = ["speedtest-worker", "--threads", "4"]
//!
//! [session]
//! telemetry_level = "full"
//! url_dl = "backend/garbage.php"
//! ```
//!
//! Every key is optional; anything left out keeps its default.

use std::time::Duration;

use serde::Deserialize;

use speedtest_common::protocol::{SessionConfig, TelemetryLevel};
use speedtest_orchestrator::{OrchestratorConfig, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfigInput {
    pub server: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub history_cap: Option<usize>,
    pub worker_cmd: Option<Vec<String>>,
    pub session: SessionInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionInput {
    pub telemetry_level: Option<TelemetryLevel>,
    #[serde(rename = "url_getIp")]
    pub url_get_ip: Option<String>,
    pub url_telemetry: Option<String>,
    pub url_dl: Option<String>,
    pub url_ul: Option<String>,
    pub url_ping: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    /// Measurement worker command line; empty selects the simulated worker.
    pub worker_cmd: Vec<String>,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.into(),
            worker_cmd: Vec::new(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ClientConfigInput {
    pub fn resolve(self) -> Result<ClientConfig, String> {
        let poll_interval = match self.poll_interval_ms {
            None => DEFAULT_POLL_INTERVAL,
            Some(0) => return Err("poll_interval_ms must be greater than zero".into()),
            Some(ms) => Duration::from_millis(ms),
        };

        let history_cap = self
            .history_cap
            .unwrap_or(OrchestratorConfig::default().history_cap)
            .max(1);

        let server = self
            .server
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER.into());

        let worker_cmd: Vec<String> = self
            .worker_cmd
            .unwrap_or_default()
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect();

        Ok(ClientConfig {
            server,
            worker_cmd,
            orchestrator: OrchestratorConfig {
                poll_interval,
                history_cap,
                session: self.session.resolve(),
            },
        })
    }
}

impl SessionInput {
    fn resolve(self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let pick = |value: Option<String>, default: String| {
            value.filter(|v| !v.trim().is_empty()).unwrap_or(default)
        };
        SessionConfig {
            telemetry_level: self.telemetry_level.unwrap_or(defaults.telemetry_level),
            ip_endpoint: pick(self.url_get_ip, defaults.ip_endpoint),
            telemetry_endpoint: pick(self.url_telemetry, defaults.telemetry_endpoint),
            download_endpoint: pick(self.url_dl, defaults.download_endpoint),
            upload_endpoint: pick(self.url_ul, defaults.upload_endpoint),
            ping_endpoint: pick(self.url_ping, defaults.ping_endpoint),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(ClientConfig::default());
        }
        let parsed: ClientConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.resolve()
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.orchestrator.session.telemetry_level != TelemetryLevel::Disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_default() {
        let c = ClientConfig::from_toml_str("  ").unwrap();
        assert_eq!(c.server, DEFAULT_SERVER);
        assert_eq!(c.orchestrator.poll_interval, Duration::from_millis(100));
        assert_eq!(c.orchestrator.session, SessionConfig::default());
        assert!(c.worker_cmd.is_empty());
        assert!(c.telemetry_enabled());
    }

    #[test]
    fn parse_toml_config_full() {
        let toml = r#"
            server = "http://speedtest.lan:3000/"
            poll_interval_ms = 250
            history_cap = 30
            worker_cmd = ["speedtest-worker", "--threads", "4"]

            [session]
            telemetry_level = "disabled"
            url_getIp = "/ip"
            url_dl = "dl.bin"
        "#;
        let c = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(c.server, "http://speedtest.lan:3000");
        assert_eq!(c.orchestrator.poll_interval, Duration::from_millis(250));
        assert_eq!(c.orchestrator.history_cap, 30);
        assert_eq!(c.worker_cmd, ["speedtest-worker", "--threads", "4"]);

        let session = &c.orchestrator.session;
        assert_eq!(session.telemetry_level, TelemetryLevel::Disabled);
        assert_eq!(session.ip_endpoint, "/ip");
        assert_eq!(session.download_endpoint, "dl.bin");
        assert_eq!(
            session.upload_endpoint,
            SessionConfig::default().upload_endpoint
        );
        assert!(!c.telemetry_enabled());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(ClientConfig::from_toml_str("poll_interval_ms = 0").is_err());
    }

    #[test]
    fn history_cap_has_a_floor() {
        let c = ClientConfig::from_toml_str("history_cap = 0").unwrap();
        assert_eq!(c.orchestrator.history_cap, 1);
    }

    #[test]
    fn blank_entries_fall_back() {
        let c = ClientConfig::from_toml_str(
            r#"
            server = ""
            worker_cmd = ["", "  "]
            [session]
            url_ul = " "
            "#,
        )
        .unwrap();
        assert_eq!(c.server, DEFAULT_SERVER);
        assert!(c.worker_cmd.is_empty());
        assert_eq!(
            c.orchestrator.session.upload_endpoint,
            SessionConfig::default().upload_endpoint
        );
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = ClientConfig::from_toml_str("poll_interval_ms = \"fast\"").unwrap_err();
        assert!(err.contains("Invalid config TOML"));
    }
}
