//! Stats gate endpoints.
//!
//! POST /api/auth/login  — exchange the stats password for a session
//! GET  /api/auth/check  — is the caller logged in?
//! POST /api/auth/logout — end the current session

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use speedtest_common::models::{LoginRequest, LoginResponse, SessionCheck};

use crate::api::auth_extractor::{session_token, StatsViewer, SESSION_COOKIE};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/check", get(check))
        .route("/logout", post(logout))
}

// ── Login ───────────────────────────────────────────────────────────

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    // A missing or unreadable body is just a wrong password.
    let password = match &body {
        Ok(Json(req)) => req.password.as_str(),
        Err(e) => {
            tracing::debug!(error = %e, "unreadable login body");
            ""
        }
    };

    let token = state
        .sessions()
        .login(password)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| {
            tracing::info!("stats login denied");
            ApiError::unauthorized("Invalid password")
        })?;

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build();

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            success: true,
            token,
        }),
    ))
}

// ── Check ───────────────────────────────────────────────────────────

async fn check(State(state): State<AppState>, headers: HeaderMap) -> Json<SessionCheck> {
    let logged = session_token(&headers)
        .and_then(|token| state.sessions().verify(&token))
        .is_some();
    Json(SessionCheck { logged })
}

// ── Logout ──────────────────────────────────────────────────────────

async fn logout(
    State(state): State<AppState>,
    viewer: StatsViewer,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    state.sessions().revoke(&viewer.session);
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(serde_json::json!({ "success": true })))
}

// ── Error type ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: msg.into(),
        }
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "database error");
        Self::internal("database error")
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "success": false, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}
