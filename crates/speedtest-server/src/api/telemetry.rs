//! Result ingestion and address echo.
//!
//! POST /api/telemetry — store one test result, answers `id <n>`
//! GET  /api/getIp     — the caller's address as plain text

use axum::extract::{FromRequest, Request, State};
use axum::http::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::headers::UserAgent;
use axum_extra::TypedHeader;
use chrono::Utc;

use speedtest_common::models::TelemetrySubmission;

use crate::api::auth::ApiError;
use crate::api::client_addr::ClientAddr;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/telemetry", post(store))
        .route("/getIp", get(get_ip))
}

/// A telemetry body sent either as JSON or as an urlencoded form.
pub struct TelemetryBody(pub TelemetrySubmission);

impl<S> FromRequest<S> for TelemetryBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let submission = if is_json {
            let Json(body) = Json::<TelemetrySubmission>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            body
        } else {
            let Form(body) = Form::<TelemetrySubmission>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            body
        };
        Ok(TelemetryBody(submission))
    }
}

async fn store(
    State(state): State<AppState>,
    ClientAddr(ip): ClientAddr,
    user_agent: Option<TypedHeader<UserAgent>>,
    headers: HeaderMap,
    TelemetryBody(body): TelemetryBody,
) -> Result<String, ApiError> {
    let ip = ip.map(|ip| ip.to_string());
    let ua = user_agent.map(|TypedHeader(ua)| ua.as_str().to_string());
    let lang = headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let now = Utc::now();

    let id = sqlx::query(
        "INSERT INTO speedtest_users
            (ip, ispinfo, extra, ua, lang, dl, ul, ping, jitter, log, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&ip)
    .bind(&body.ispinfo)
    .bind(&body.extra)
    .bind(&ua)
    .bind(&lang)
    .bind(&body.dl)
    .bind(&body.ul)
    .bind(&body.ping)
    .bind(&body.jitter)
    .bind(&body.log)
    .bind(now)
    .bind(now)
    .execute(state.pool())
    .await?
    .last_insert_rowid();

    tracing::info!(
        id,
        ip = ip.as_deref().unwrap_or("-"),
        dl = body.dl.as_deref().unwrap_or("-"),
        ul = body.ul.as_deref().unwrap_or("-"),
        "telemetry stored"
    );

    Ok(format!("id {id}"))
}

async fn get_ip(ClientAddr(ip): ClientAddr) -> String {
    ip.map(|ip| ip.to_string()).unwrap_or_default()
}
