//! Administrative HTTP API over the supervisor.
//!
//! Read-only status and per-room commands. Unknown rooms are 404, any
//! other failure is 500 with the error text.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use roomwatch_core::models::ToolInstallation;
use roomwatch_core::monitor::{MonitorError, MonitorStatus, RoomReport, Supervisor};

#[derive(Clone)]
pub struct AdminState {
    pub supervisor: Arc<Supervisor>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/start_monitor", get(start_monitor))
        .route("/api/stop_monitor", get(stop_monitor))
        .route(
            "/api/start_recording/{platform}/{room_id}",
            get(start_recording),
        )
        .route("/api/stop_recording/{platform}/{room_id}", get(stop_recording))
        .route("/api/rooms", get(rooms))
        .route("/api/room/{room_id}", get(room))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        let status = match e {
            MonitorError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "status": "error", "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Serialize)]
struct StatusResponse {
    monitor: MonitorStatus,
    active_recordings: usize,
    rooms: Vec<RoomReport>,
    tools: Vec<ToolInstallation>,
}

async fn status(State(state): State<AdminState>) -> Json<StatusResponse> {
    let supervisor = &state.supervisor;
    Json(StatusResponse {
        monitor: supervisor.status().await,
        active_recordings: supervisor.active_recordings().await,
        rooms: supervisor.room_reports().await,
        tools: supervisor.installations(),
    })
}

async fn start_monitor(State(state): State<AdminState>) -> Json<Value> {
    if state.supervisor.is_running() {
        return Json(json!({ "status": "success", "message": "Monitor already running" }));
    }
    let watchers = state.supervisor.start().await;
    Json(json!({
        "status": "success",
        "message": format!("Monitoring {} rooms", watchers),
    }))
}

async fn stop_monitor(State(state): State<AdminState>) -> Json<Value> {
    let report = state.supervisor.stop().await;
    let status = if report.complete { "success" } else { "partial" };
    Json(json!({ "status": status, "report": report }))
}

async fn start_recording(
    State(state): State<AdminState>,
    Path((platform, room_id)): Path<(String, String)>,
) -> ApiResult {
    let handle = state
        .supervisor
        .start_recording(&platform, &room_id)
        .await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Recording started for {}_{}", platform, room_id),
        "recording": handle,
    })))
}

async fn stop_recording(
    State(state): State<AdminState>,
    Path((platform, room_id)): Path<(String, String)>,
) -> ApiResult {
    state.supervisor.stop_recording(&platform, &room_id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Recording stopped for {}_{}", platform, room_id),
    })))
}

async fn rooms(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "rooms": state.supervisor.rooms() }))
}

async fn room(State(state): State<AdminState>, Path(room_id): Path<String>) -> ApiResult {
    let report = state
        .supervisor
        .room_report(&room_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Room not found: {}", room_id)))?;
    Ok(Json(json!({ "room": report })))
}
