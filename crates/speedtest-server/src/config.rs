//! Server configuration from the environment.

use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://speedtest.db?mode=rwc";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_STATS_LIMIT: i64 = 100;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid {expected}: {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    /// Password unlocking the stats endpoints. Stats stay locked when unset.
    pub stats_password: Option<String>,
    /// Base64 Ed25519 seed for session tokens; ephemeral when unset.
    pub jwt_seed_b64: Option<String>,
    /// Number of rows returned by `GET /api/stats`.
    pub stats_limit: i64,
    pub session_ttl_secs: i64,
    /// Take the client address from `X-Forwarded-For` (behind a proxy).
    pub trust_forwarded_for: bool,
    /// Directory with the browser front-end, served as a fallback.
    pub static_dir: Option<String>,
    pub dev_seed: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen = get("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into());
        let listen_addr = listen.parse().map_err(|_| ConfigError::Invalid {
            key: "LISTEN_ADDR",
            expected: "socket address",
            value: listen.clone(),
        })?;

        let stats_limit = parse_positive(get("STATS_LIMIT"), "STATS_LIMIT", DEFAULT_STATS_LIMIT)?;
        let session_ttl_secs = parse_positive(
            get("SESSION_TTL_SECS"),
            "SESSION_TTL_SECS",
            DEFAULT_SESSION_TTL_SECS,
        )?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            listen_addr,
            stats_password: get("STATS_PASSWORD"),
            jwt_seed_b64: get("JWT_SEED_B64"),
            stats_limit,
            session_ttl_secs,
            trust_forwarded_for: get("TRUST_FORWARDED_FOR").is_some_and(|v| is_truthy(&v)),
            static_dir: get("STATIC_DIR"),
            dev_seed: get("DEV_SEED").is_some(),
        })
    }
}

fn parse_positive(
    value: Option<String>,
    key: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "positive integer",
            value,
        }),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
