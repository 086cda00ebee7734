//! Speedtest telemetry server
//!
//! Single binary that runs:
//! - Result ingestion for finished test runs
//! - Client address echo for the test front-end
//! - Password-gated stats API
//! - Optional static hosting of the browser front-end

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use speedtest_common::auth::SessionSigner;
use speedtest_server::config::ServerConfig;
use speedtest_server::session::PasswordSessions;
use speedtest_server::state::{AppState, Settings};
use speedtest_server::{api, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // ── Database ────────────────────────────────────────────────
    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;

    // ── Dev seed data ───────────────────────────────────────────
    if config.dev_seed {
        db::seed_dev_data(&pool).await?;
    }

    // ── Stats sessions ──────────────────────────────────────────
    let signer = match &config.jwt_seed_b64 {
        Some(seed) => SessionSigner::from_seed_b64(seed)
            .map_err(|e| anyhow::anyhow!("invalid JWT_SEED_B64: {e}"))?,
        None => {
            tracing::warn!(
                "JWT_SEED_B64 not set, generating ephemeral key (sessions won't survive restart)"
            );
            SessionSigner::generate()?.0
        }
    };
    let sessions = PasswordSessions::new(
        config.stats_password.as_deref(),
        signer,
        config.session_ttl_secs,
    )?;

    // ── Shared state ────────────────────────────────────────────
    let state = AppState::new(
        pool,
        Arc::new(sessions),
        Settings {
            stats_limit: config.stats_limit,
            trust_forwarded_for: config.trust_forwarded_for,
        },
    );

    // ── Router ──────────────────────────────────────────────────
    let mut app = Router::new().nest("/api", api::router());
    if let Some(dir) = &config.static_dir {
        tracing::info!(dir = %dir, "serving front-end");
        app = app.fallback_service(ServeDir::new(dir));
    }
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // ── Listen ──────────────────────────────────────────────────
    let addr = config.listen_addr;
    tracing::info!("speedtest-server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
