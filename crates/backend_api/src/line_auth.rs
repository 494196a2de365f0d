use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use chrono::Duration;
use line_client::{LineClient, LineError, LineProfile};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::session::{build_cookie, expired_cookie, read_cookie, SESSION_COOKIE, STATE_COOKIE};
use crate::state::AppState;

const STATE_COOKIE_PATH: &str = "/line";
const STATE_COOKIE_MAX_AGE_SECS: i64 = 600;

/// The OAuth collaborator as seen by the login handlers.
#[async_trait]
pub trait LineAuthProvider: Send + Sync {
    fn authorization_url(&self, state: &str) -> String;
    async fn exchange_code(&self, code: &str) -> std::result::Result<String, LineError>;
    async fn fetch_profile(&self, access_token: &str) -> std::result::Result<LineProfile, LineError>;
}

#[async_trait]
impl LineAuthProvider for LineClient {
    fn authorization_url(&self, state: &str) -> String {
        LineClient::authorization_url(self, state).to_string()
    }

    async fn exchange_code(&self, code: &str) -> std::result::Result<String, LineError> {
        LineClient::exchange_code(self, code).await
    }

    async fn fetch_profile(&self, access_token: &str) -> std::result::Result<LineProfile, LineError> {
        LineClient::fetch_profile(self, access_token).await
    }
}

fn provider(state: &AppState) -> Result<&dyn LineAuthProvider> {
    state
        .line
        .as_deref()
        .ok_or_else(|| ApiError::Internal("LINE login is not configured".to_string()))
}

/// GET /line/login
/// Redirects the browser to the LINE authorize page with a fresh state.
pub async fn login(State(state): State<AppState>) -> Result<Response> {
    let provider = provider(&state)?;
    let login_state = Uuid::new_v4().simple().to_string();
    let location = provider.authorization_url(&login_state);
    let state_cookie = build_cookie(
        STATE_COOKIE,
        &login_state,
        STATE_COOKIE_PATH,
        Duration::seconds(STATE_COOKIE_MAX_AGE_SECS),
        state.cookie_secure,
    );

    Ok((
        StatusCode::FOUND,
        AppendHeaders([
            (header::LOCATION, location),
            (header::SET_COOKIE, state_cookie),
        ]),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /line/callback
/// Checks the login state, then trades the code for a profile and a session.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    let provider = provider(&state)?;

    let expected = read_cookie(&headers, STATE_COOKIE);
    match (expected.as_deref(), query.state.as_deref()) {
        (Some(expected), Some(received)) if !expected.is_empty() && expected.as_bytes() == received.as_bytes() => {}
        _ => {
            warn!("LINE callback with missing or mismatched state");
            return Err(ApiError::InvalidState);
        }
    }

    if let Some(error) = query.error {
        return Err(ApiError::BadRequest(format!("LINE login was cancelled: {error}")));
    }
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::BadRequest("code is missing".to_string()))?;

    let access_token = provider.exchange_code(&code).await?;
    let profile = provider.fetch_profile(&access_token).await?;
    info!(user = %profile.user_id, "LINE login succeeded");

    let session_id = state.sessions.create(profile.clone());
    let session_cookie = build_cookie(
        SESSION_COOKIE,
        &session_id,
        "/",
        state.sessions.ttl(),
        state.cookie_secure,
    );
    let cleared_state = expired_cookie(STATE_COOKIE, STATE_COOKIE_PATH, state.cookie_secure);

    Ok((
        AppendHeaders([
            (header::SET_COOKIE, session_cookie),
            (header::SET_COOKIE, cleared_state),
        ]),
        Json(json!({
            "message": "Login successful",
            "userId": profile.user_id,
            "displayName": profile.display_name,
        })),
    )
        .into_response())
}

/// GET /line/me
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<LineProfile>> {
    read_cookie(&headers, SESSION_COOKIE)
        .and_then(|session_id| state.sessions.get(&session_id))
        .map(|session| Json(session.profile))
        .ok_or_else(|| ApiError::Unauthorized("Not logged in".to_string()))
}

/// GET|POST /line/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(session_id) = read_cookie(&headers, SESSION_COOKIE) {
        state.sessions.destroy(&session_id);
    }

    (
        [(header::SET_COOKIE, expired_cookie(SESSION_COOKIE, "/", state.cookie_secure))],
        Json(json!({ "message": "Logged out" })),
    )
}
