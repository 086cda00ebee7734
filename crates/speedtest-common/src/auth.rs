//! The stats gate's credentials.
//!
//! There is exactly one secret, the stats password, kept only as an
//! Argon2id hash. Logging in with it yields a short-lived session token: an
//! EdDSA-signed JWT whose subject is the session ID.

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Issuer stamped into and required on every session token.
pub const ISSUER: &str = "speedtest-server";

/// Clock skew tolerated when checking a token's expiry, in seconds.
pub const EXPIRY_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("signing seed must be 32 base64-encoded bytes")]
    InvalidSeed,
}

// ── Password ────────────────────────────────────────────────────────

/// The stats password, hashed once at startup.
#[derive(Clone)]
pub struct StatsPassword {
    hash: String,
}

impl StatsPassword {
    pub fn new(plain: &str) -> Result<Self, AuthError> {
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();
        Ok(Self { hash })
    }

    /// An empty candidate never matches.
    pub fn matches(&self, candidate: &str) -> Result<bool, AuthError> {
        if candidate.is_empty() {
            return Ok(false);
        }
        let parsed = PasswordHash::new(&self.hash).map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok())
    }
}

impl std::fmt::Debug for StatsPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StatsPassword(..)")
    }
}

// ── Session tokens ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session ID (`ses_...`).
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(session_id: impl Into<String>, now: i64, ttl_secs: i64) -> Self {
        Self {
            sub: session_id.into(),
            iss: ISSUER.into(),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

/// Signs and checks session tokens with one Ed25519 key.
pub struct SessionSigner {
    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,
}

impl SessionSigner {
    /// Load the key from its 32-byte seed, base64-encoded (`JWT_SEED_B64`).
    pub fn from_seed_b64(seed_b64: &str) -> Result<Self, AuthError> {
        let bytes = BASE64
            .decode(seed_b64.trim())
            .map_err(|_| AuthError::InvalidSeed)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| AuthError::InvalidSeed)?;
        Self::from_key(&SigningKey::from_bytes(&seed))
    }

    /// A fresh random key; returns the signer and its base64 seed.
    pub fn generate() -> Result<(Self, String), AuthError> {
        let key = SigningKey::generate(&mut OsRng);
        Ok((Self::from_key(&key)?, BASE64.encode(key.to_bytes())))
    }

    fn from_key(key: &SigningKey) -> Result<Self, AuthError> {
        let der = key.to_pkcs8_der().map_err(|_| AuthError::InvalidSeed)?;
        Ok(Self {
            encoding_key: jsonwebtoken::EncodingKey::from_ed_der(der.as_bytes()),
            decoding_key: jsonwebtoken::DecodingKey::from_ed_der(
                key.verifying_key().as_bytes(),
            ),
        })
    }

    pub fn sign(&self, claims: &SessionClaims) -> Result<String, AuthError> {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::EdDSA);
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding_key)?)
    }

    /// Check signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::EdDSA);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = EXPIRY_LEEWAY_SECS;
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}
