//! HTTP API endpoints for rooms, claims and outcomes.
//!
//! Errors are returned as `{"error": "..."}` with a status code matching the
//! error kind. An exhausted pool is not an error.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::state::{AppState, ClaimOutcome};
use crate::types::*;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rooms", post(create_room).get(find_room))
        .route("/api/rooms/{room_id}", get(get_room).patch(update_room))
        .route("/api/rooms/{room_id}/stats", get(room_stats))
        .route("/api/codes/next", post(next_code))
        .route("/api/codes/{code_id}", patch(update_code))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room: Room,
}

/// Create a room. Seeding continues in the background after the response.
///
/// POST /api/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> CoordinatorResult<(StatusCode, Json<RoomResponse>)> {
    let created = state.create_room(&req.name).await?;
    Ok((StatusCode::CREATED, Json(RoomResponse { room: created.room })))
}

#[derive(Debug, Deserialize)]
pub struct FindRoomQuery {
    pub name: Option<String>,
}

/// GET /api/rooms?name=...
pub async fn find_room(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FindRoomQuery>,
) -> CoordinatorResult<Json<RoomResponse>> {
    let name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| CoordinatorError::Validation("Room name is required".to_string()))?;
    let room = state
        .get_room_by_name(&name)
        .await?
        .ok_or_else(|| CoordinatorError::NotFound("Room not found".to_string()))?;
    Ok(Json(RoomResponse { room }))
}

/// GET /api/rooms/{room_id}
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> CoordinatorResult<Json<RoomResponse>> {
    let room = state
        .get_room(&room_id)
        .await?
        .ok_or_else(|| CoordinatorError::NotFound("Room not found".to_string()))?;
    Ok(Json(RoomResponse { room }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoomRequest {
    pub active: bool,
}

/// PATCH /api/rooms/{room_id}
pub async fn update_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(req): Json<UpdateRoomRequest>,
) -> CoordinatorResult<Json<RoomResponse>> {
    let room = state.set_room_active(&room_id, req.active).await?;
    Ok(Json(RoomResponse { room }))
}

/// Stats are always recomputed; tell every cache layer not to keep them.
///
/// GET /api/rooms/{room_id}/stats
pub async fn room_stats(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> CoordinatorResult<Response> {
    let stats = state.get_room_stats(&room_id).await?;
    let mut response = Json(stats).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    Ok(response)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextCodeRequest {
    #[serde(default)]
    pub room_id: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimedCode {
    pub id: CodeId,
    pub value: String,
    pub status: CodeStatus,
}

/// Claim the next code for testing.
///
/// POST /api/codes/next
///
/// Returns `{"code": {...}}`, or `{"error": "No codes available", "code": null}`
/// with 200 when the pool is empty.
pub async fn next_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NextCodeRequest>,
) -> CoordinatorResult<Json<serde_json::Value>> {
    let outcome = state.claim_next(&req.room_id, req.user_id.as_deref()).await?;
    let body = match outcome {
        ClaimOutcome::Claimed(code) => {
            let claimed = ClaimedCode {
                id: code.id,
                value: code.code,
                status: code.status,
            };
            json!({ "code": claimed })
        }
        ClaimOutcome::Exhausted => json!({ "error": "No codes available", "code": null }),
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCodeRequest {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub code: Code,
}

/// PATCH /api/codes/{code_id}
pub async fn update_code(
    State(state): State<Arc<AppState>>,
    Path(code_id): Path<String>,
    Json(req): Json<UpdateCodeRequest>,
) -> CoordinatorResult<impl IntoResponse> {
    let code = state.set_code_status(&code_id, &req.status).await?;
    Ok(Json(CodeResponse { code }))
}
