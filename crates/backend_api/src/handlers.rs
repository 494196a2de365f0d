use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use models::{
    CreateKaimemoAmountRequest, CreateKaimemoRequest, Kaimemo, KaimemoSummaryResponse,
    RemoveKaimemoRequest,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, Result};
use crate::session::{read_cookie, SESSION_COOKIE};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    #[serde(rename = "tempUserID")]
    pub temp_user_id: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Owner of a request: an explicit id (body, then query), else the
/// logged-in LINE user.
fn resolve_owner(
    state: &AppState,
    headers: &HeaderMap,
    explicit: Option<&str>,
    query: &OwnerQuery,
) -> Result<String> {
    if let Some(owner) = non_empty(explicit).or_else(|| non_empty(query.temp_user_id.as_deref())) {
        return Ok(owner);
    }

    read_cookie(headers, SESSION_COOKIE)
        .and_then(|session_id| state.sessions.get(&session_id))
        .map(|session| session.profile.user_id)
        .ok_or_else(|| ApiError::BadRequest("tempUserID is required".to_string()))
}

/// `tempUserID` from an optional JSON body on DELETE requests.
fn owner_from_body(body: &Bytes) -> Result<Option<String>> {
    if body.is_empty() {
        return Ok(None);
    }
    let req: RemoveKaimemoRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;
    Ok(Some(req.temp_user_id))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "kaimemo-api"
    }))
}

/// GET /kaimemo
pub async fn get_kaimemo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Kaimemo>>> {
    let owner = resolve_owner(&state, &headers, None, &query)?;
    let memos = state.service.fetch_kaimemo(&owner).await?;
    Ok(Json(memos))
}

/// POST /kaimemo
pub async fn create_kaimemo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
    payload: std::result::Result<Json<CreateKaimemoRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(mut req) = payload?;
    req.temp_user_id = resolve_owner(&state, &headers, Some(&req.temp_user_id), &query)?;

    let id = state.service.create_kaimemo(req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// DELETE /kaimemo/:id
/// The owner comes from the query string or an optional JSON body.
pub async fn remove_kaimemo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
    body: Bytes,
) -> Result<StatusCode> {
    let from_body = owner_from_body(&body)?;
    let owner = resolve_owner(&state, &headers, from_body.as_deref(), &query)?;

    state.service.remove_kaimemo(&owner, &id).await?;
    Ok(StatusCode::OK)
}

/// GET /kaimemo/summary
pub async fn get_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<KaimemoSummaryResponse>> {
    let owner = resolve_owner(&state, &headers, None, &query)?;
    let summary = state.service.fetch_summary(&owner).await?;
    Ok(Json(summary))
}

/// POST /kaimemo/summary
pub async fn create_amount(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
    payload: std::result::Result<Json<CreateKaimemoAmountRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(mut req) = payload?;
    req.temp_user_id = resolve_owner(&state, &headers, Some(&req.temp_user_id), &query)?;

    let id = state.service.create_amount(req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// DELETE /kaimemo/summary/:id
/// The owner comes from the query string or an optional JSON body.
pub async fn remove_amount(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
    body: Bytes,
) -> Result<StatusCode> {
    let from_body = owner_from_body(&body)?;
    let owner = resolve_owner(&state, &headers, from_body.as_deref(), &query)?;
    state.service.remove_amount(&owner, &id).await?;
    Ok(StatusCode::OK)
}
