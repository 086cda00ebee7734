//! Stats sessions.
//!
//! Access to the stats endpoints is decided by a single [`SessionVerifier`].
//! The stock implementation checks one shared password and hands out signed
//! session tokens; logging out revokes the token's session until it would
//! have expired anyway.

use chrono::Utc;
use dashmap::DashMap;

use speedtest_common::auth::{
    AuthError, SessionClaims, SessionSigner, StatsPassword, EXPIRY_LEEWAY_SECS,
};
use speedtest_common::ids;

/// A verified stats session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Unix timestamp after which the token is rejected on its own.
    pub expires_at: i64,
}

pub trait SessionVerifier: Send + Sync {
    /// Exchange a password for a session token. `Ok(None)` means denied.
    fn login(&self, password: &str) -> Result<Option<String>, AuthError>;

    /// The session behind a valid, unrevoked token.
    fn verify(&self, token: &str) -> Option<Session>;

    fn revoke(&self, session: &Session);
}

pub struct PasswordSessions {
    /// `None` keeps the stats locked for everyone.
    password: Option<StatsPassword>,
    signer: SessionSigner,
    ttl_secs: i64,
    /// Revoked session ID → its expiry.
    revoked: DashMap<String, i64>,
}

impl PasswordSessions {
    pub fn new(
        password: Option<&str>,
        signer: SessionSigner,
        ttl_secs: i64,
    ) -> Result<Self, AuthError> {
        let password = password.map(StatsPassword::new).transpose()?;
        if password.is_none() {
            tracing::warn!("STATS_PASSWORD not set, stats endpoints are locked");
        }
        Ok(Self {
            password,
            signer,
            ttl_secs,
            revoked: DashMap::new(),
        })
    }

    /// Forget revocations of sessions whose tokens have expired.
    fn prune_revoked(&self, now: i64) {
        let leeway = EXPIRY_LEEWAY_SECS as i64;
        self.revoked.retain(|_, expires_at| *expires_at + leeway >= now);
    }
}

impl SessionVerifier for PasswordSessions {
    fn login(&self, password: &str) -> Result<Option<String>, AuthError> {
        let Some(stats_password) = &self.password else {
            return Ok(None);
        };
        if !stats_password.matches(password)? {
            return Ok(None);
        }

        let session_id = ids::session_id();
        let claims = SessionClaims::new(session_id.clone(), Utc::now().timestamp(), self.ttl_secs);
        let token = self.signer.sign(&claims)?;
        tracing::info!(session_id = %session_id, "stats session opened");
        Ok(Some(token))
    }

    fn verify(&self, token: &str) -> Option<Session> {
        let claims = match self.signer.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "rejected session token");
                return None;
            }
        };
        if self.revoked.contains_key(&claims.sub) {
            return None;
        }
        Some(Session {
            id: claims.sub,
            expires_at: claims.exp,
        })
    }

    fn revoke(&self, session: &Session) {
        self.prune_revoked(Utc::now().timestamp());
        if self
            .revoked
            .insert(session.id.clone(), session.expires_at)
            .is_none()
        {
            tracing::info!(session_id = %session.id, "stats session closed");
        }
    }
}
