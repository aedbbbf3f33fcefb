//! HTTP route handlers for the MindTape sync API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::error;

use crate::sync::core::errors::SyncError;
use crate::sync::core::ids::MemoryId;
use crate::sync::core::record::{MemoryRecord, NewMemory};
use crate::sync::engine::orchestrator::{HealthReport, SyncRequest, SyncResponse};

use super::state::AppState;
use super::websocket::realtime_handler;

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/memory/add", post(add_memory))
        .route("/memory/{id}", get(get_memory).delete(delete_memory))
        .route("/extension/sync", post(sync_extension))
        .route("/sync/realtime", get(realtime_handler))
        .with_state(state)
}

/// Reject requests without the expected `X-API-Key`.
fn require_api_key(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        None => Err((StatusCode::UNAUTHORIZED, "API key required".to_string())),
        Some(key) if key != state.api_key => {
            Err((StatusCode::FORBIDDEN, "Invalid API key".to_string()))
        }
        Some(_) => Ok(()),
    }
}

fn error_response(err: SyncError) -> ApiError {
    match err {
        SyncError::InvalidRecord(_) | SyncError::Url(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        SyncError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        other => {
            error!(error = %other, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn parse_id(raw: &str) -> Result<MemoryId, ApiError> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid memory id: {raw}")))
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthReport>, ApiError> {
    state
        .orchestrator
        .health()
        .await
        .map(Json)
        .map_err(error_response)
}

/// Create or re-capture a memory and enqueue its processing.
async fn add_memory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NewMemory>,
) -> Result<Json<MemoryRecord>, ApiError> {
    require_api_key(&headers, &state)?;
    state
        .orchestrator
        .add_memory(request)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Fetch one memory.
async fn get_memory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MemoryRecord>, ApiError> {
    require_api_key(&headers, &state)?;
    let id = parse_id(&id)?;
    state
        .orchestrator
        .get_memory(id)
        .await
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Memory not found".to_string()))
}

/// Delete one memory from the store and the index.
async fn delete_memory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state)?;
    let memory_id = parse_id(&id)?;
    if !state
        .orchestrator
        .delete_memory(memory_id)
        .await
        .map_err(error_response)?
    {
        return Err((StatusCode::NOT_FOUND, "Memory not found".to_string()));
    }
    Ok(Json(serde_json::json!({
        "status": "deleted",
        "id": memory_id,
    })))
}

/// Push a device's batch and pull what it is missing.
async fn sync_extension(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    require_api_key(&headers, &state)?;
    state
        .orchestrator
        .sync_batch(request)
        .await
        .map(Json)
        .map_err(error_response)
}
