//! Speedtest telemetry server library.
//!
//! Re-exports the API router, shared state, and database utilities so they
//! can be used by integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod session;
pub mod state;
