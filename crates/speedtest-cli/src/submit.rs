//! Talking to the telemetry server.

use anyhow::Context;
use reqwest::StatusCode;

use speedtest_common::models::{LoginRequest, LoginResponse, StatsResponse, TelemetrySubmission};
use speedtest_orchestrator::TestRun;

pub struct ServerClient {
    http: reqwest::Client,
    base: String,
}

impl ServerClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Store a finished run; returns the id the server assigned.
    pub async fn submit(&self, submission: &TelemetrySubmission) -> anyhow::Result<i64> {
        let resp = self
            .http
            .post(self.url("/api/telemetry"))
            .json(submission)
            .send()
            .await
            .context("telemetry request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("telemetry reply unreadable")?;
        if !status.is_success() {
            anyhow::bail!("telemetry rejected: HTTP {status}: {}", text.trim());
        }
        parse_id(&text).ok_or_else(|| anyhow::anyhow!("unexpected telemetry reply: {text:?}"))
    }

    /// Open a stats session. `Ok(None)` when the password is refused.
    pub async fn login(&self, password: &str) -> anyhow::Result<Option<String>> {
        let resp = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&LoginRequest {
                password: password.to_string(),
            })
            .send()
            .await
            .context("login request failed")?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => {
                let body: LoginResponse = resp.json().await.context("login reply unreadable")?;
                Ok(body.success.then_some(body.token))
            }
            status => anyhow::bail!("login failed: HTTP {status}"),
        }
    }

    pub async fn stats(&self, token: &str) -> anyhow::Result<StatsResponse> {
        let resp = self
            .http
            .get(self.url("/api/stats"))
            .bearer_auth(token)
            .send()
            .await
            .context("stats request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("stats request refused: HTTP {status}");
        }
        resp.json().await.context("stats reply unreadable")
    }
}

/// The telemetry record for a finished run.
pub fn submission(run: &TestRun, run_id: &str) -> TelemetrySubmission {
    let extra = serde_json::json!({
        "run_id": run_id,
        "test_id": run.test_id,
        "client_ip": run.client_ip,
    });
    TelemetrySubmission {
        dl: Some(run.download.value.clone()),
        ul: Some(run.upload.value.clone()),
        ping: Some(run.ping.value.clone()),
        jitter: Some(run.jitter.clone()),
        extra: Some(extra.to_string()),
        ..TelemetrySubmission::default()
    }
}

/// Parse the server's `id <n>` reply.
fn parse_id(text: &str) -> Option<i64> {
    text.trim().strip_prefix("id ")?.trim().parse().ok()
}
