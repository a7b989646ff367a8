//! Availability routes — CSV download and single-room status updates.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{MethodRouter, post};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::services::availability::{self, AvailabilityError, RoomKey};
use crate::state::AppState;

/// Highest valid status code (0 = sold, 1 = available, 2 = blocked).
const MAX_STATUS: u8 = 2;

#[derive(Debug, Deserialize)]
pub struct UpdateAvailabilityBody {
    pub building_id: Option<u32>,
    pub floor_id: Option<u32>,
    pub room_id: Option<u32>,
    pub status: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct UpdateData {
    pub building_id: u32,
    pub floor_id: u32,
    pub room_id: u32,
    pub status: u8,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<UpdateData>,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse { success: false, message: message.into(), data: None })).into_response()
}

/// `POST /api/update-availability`, with a JSON 405 for every other method.
pub fn update_route() -> MethodRouter<AppState> {
    post(update_availability).fallback(method_not_allowed)
}

async fn method_not_allowed() -> Response {
    failure(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed. Use POST.")
}

/// `POST /api/update-availability` — rewrite one room's status in the CSV.
pub async fn update_availability(
    State(state): State<AppState>,
    body: Result<Json<UpdateAvailabilityBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(error = %rejection, "availability: rejected body");
            return failure(StatusCode::BAD_REQUEST, format!("Invalid request body: {rejection}"));
        }
    };

    info!(?body, "availability: update request");

    // Zero ids count as missing, matching how the kiosk numbers rooms.
    let (Some(building_id), Some(floor_id), Some(room_id), Some(status)) = (
        body.building_id.filter(|v| *v != 0),
        body.floor_id.filter(|v| *v != 0),
        body.room_id.filter(|v| *v != 0),
        body.status,
    ) else {
        return failure(
            StatusCode::BAD_REQUEST,
            "Missing required fields: building_id, floor_id, room_id, status",
        );
    };

    if status > MAX_STATUS {
        return failure(StatusCode::BAD_REQUEST, format!("Invalid status: {status}"));
    }

    let key = RoomKey { building_id, floor_id, room_id };
    match availability::update_status(&state, key, status).await {
        Ok(()) => Json(ApiResponse {
            success: true,
            message: "Availability updated successfully".into(),
            data: Some(UpdateData { building_id, floor_id, room_id, status }),
        })
        .into_response(),
        Err(AvailabilityError::NotFound(key)) => {
            warn!(%key, "availability: room not found in csv");
            failure(StatusCode::NOT_FOUND, format!("Room not found: {key}"))
        }
        Err(e) => {
            error!(error = %e, "availability: update failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /api/availability` — the raw CSV.
pub async fn get_availability(State(state): State<AppState>) -> Response {
    match availability::read_csv(&state.availability_csv).await {
        Ok(content) => ([(CONTENT_TYPE, "text/csv; charset=utf-8")], content).into_response(),
        Err(e) => {
            error!(error = %e, path = %state.availability_csv.display(), "availability: read failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /api/health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "message": "API is running" }))
}

#[cfg(test)]
#[path = "availability_test.rs"]
mod tests;
