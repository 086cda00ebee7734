//! Database connection pool and migrations.

use std::str::FromStr;

use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Connect to SQLite and return a connection pool.
///
/// In-memory databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?
    };

    tracing::info!(in_memory, "connected to SQLite");
    Ok(pool)
}

/// Run embedded SQL migrations.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations complete");
    Ok(())
}

/// Insert a handful of sample results into an empty table.
/// Activated by setting `DEV_SEED=1` environment variable.
pub async fn seed_dev_data(pool: &SqlitePool) -> anyhow::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM speedtest_users")
        .fetch_one(pool)
        .await?;

    if count > 0 {
        tracing::info!("dev seed data already exists, skipping");
        return Ok(());
    }

    let samples = [
        ("192.0.2.10", "93.41", "20.12", "13", "1.52"),
        ("192.0.2.11", "47.90", "9.87", "28", "4.10"),
        ("198.51.100.7", "310.55", "102.30", "6", "0.81"),
    ];

    let now = Utc::now();
    for (i, (ip, dl, ul, ping, jitter)) in samples.into_iter().enumerate() {
        let at = now - Duration::minutes(10 * (samples.len() - i) as i64);
        sqlx::query(
            "INSERT INTO speedtest_users (ip, ua, lang, dl, ul, ping, jitter, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ip)
        .bind("speedtest-dev-seed")
        .bind("en")
        .bind(dl)
        .bind(ul)
        .bind(ping)
        .bind(jitter)
        .bind(at)
        .bind(at)
        .execute(pool)
        .await?;
    }

    tracing::info!(rows = samples.len(), "dev seed data inserted");
    Ok(())
}
