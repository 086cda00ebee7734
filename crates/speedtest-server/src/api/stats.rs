//! GET /api/stats — aggregate summary plus the latest results.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};

use speedtest_common::models::{round_to, SpeedtestRecord, StatsResponse, StatsSummary};

use crate::api::auth::ApiError;
use crate::api::auth_extractor::StatsViewer;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}

type RecordRow = (
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

async fn stats(
    State(state): State<AppState>,
    viewer: StatsViewer,
) -> Result<Json<StatsResponse>, ApiError> {
    // CAST turns non-numeric text into 0; AVG skips NULLs.
    let (total_tests, avg_dl, avg_ul, avg_ping) = sqlx::query_as::<_, (i64, f64, f64, f64)>(
        "SELECT COUNT(*),
                COALESCE(AVG(CAST(dl AS REAL)), 0.0),
                COALESCE(AVG(CAST(ul AS REAL)), 0.0),
                COALESCE(AVG(CAST(ping AS REAL)), 0.0)
         FROM speedtest_users",
    )
    .fetch_one(state.pool())
    .await?;

    let rows = sqlx::query_as::<_, RecordRow>(
        "SELECT id, ip, ispinfo, extra, ua, lang, dl, ul, ping, jitter, log, created_at, updated_at
         FROM speedtest_users
         ORDER BY created_at DESC, id DESC
         LIMIT ?",
    )
    .bind(state.settings().stats_limit)
    .fetch_all(state.pool())
    .await?;

    tracing::debug!(
        session_id = %viewer.session.id,
        total_tests,
        returned = rows.len(),
        "stats served"
    );

    Ok(Json(StatsResponse {
        success: true,
        summary: StatsSummary {
            total_tests,
            avg_download: round_to(avg_dl, 2),
            avg_upload: round_to(avg_ul, 2),
            avg_ping: round_to(avg_ping, 1),
        },
        results: rows.into_iter().map(into_record).collect(),
    }))
}

fn into_record(row: RecordRow) -> SpeedtestRecord {
    let (id, ip, ispinfo, extra, ua, lang, dl, ul, ping, jitter, log, created_at, updated_at) = row;
    SpeedtestRecord {
        id,
        ip,
        ispinfo,
        extra,
        ua,
        lang,
        dl,
        ul,
        ping,
        jitter,
        log,
        created_at,
        updated_at,
    }
}
