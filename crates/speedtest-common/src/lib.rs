//! Shared types for the speedtest platform.
//!
//! This crate contains:
//! - **Worker protocol** — commands to and status messages from the measurement worker
//! - **Data models** — test phases, telemetry records, stats aggregates
//! - **Auth primitives** — Argon2id password checks, JWT session tokens
//! - **ID generation** — Prefixed UUIDv7 helpers (`run_`, `ses_`)

pub mod auth;
pub mod ids;
pub mod models;
pub mod protocol;
