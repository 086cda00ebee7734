//! REST API route tree.

pub mod auth;
pub mod auth_extractor;
pub mod client_addr;
pub mod stats;
pub mod telemetry;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(telemetry::router())
        .merge(stats::router())
        .nest("/auth", auth::router())
}
