//! Shared application state.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::session::SessionVerifier;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    pool: SqlitePool,
    sessions: Arc<dyn SessionVerifier>,
    settings: Settings,
}

/// Request-time knobs taken from the server configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub stats_limit: i64,
    pub trust_forwarded_for: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stats_limit: crate::config::DEFAULT_STATS_LIMIT,
            trust_forwarded_for: false,
        }
    }
}

impl AppState {
    pub fn new(pool: SqlitePool, sessions: Arc<dyn SessionVerifier>, settings: Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                sessions,
                settings,
            }),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    pub fn sessions(&self) -> &dyn SessionVerifier {
        self.inner.sessions.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }
}
