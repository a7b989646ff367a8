//! Availability editing over HTTP.
//!
//! DESIGN
//! ======
//! Edits are optimistic: the local index changes first, then the server is
//! told. A failed save is reported through the `SaveBanner` and never rolled
//! back, so the kiosk may disagree with the file until the next reload.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::availability::{RoomStatus, ui_room_to_csv};
use crate::store::Store;

/// The only building the kiosk manages.
pub const BUILDING_ID: u32 = 1;
pub const SUCCESS_VISIBLE: Duration = Duration::from_secs(2);
pub const ERROR_VISIBLE: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Debug, Serialize)]
struct UpdateRequest {
    building_id: u32,
    floor_id: u32,
    room_id: u32,
    status: RoomStatus,
}

/// Server reply to an availability update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AvailabilityApi {
    http: reqwest::Client,
    base_url: String,
}

impl AvailabilityApi {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    /// Persist one unit's status. `ui_room` is the 1-based UI room number.
    ///
    /// # Errors
    ///
    /// Transport failures and any non-2xx answer.
    pub async fn update(&self, floor: u32, ui_room: u32, status: RoomStatus) -> Result<UpdateResponse, ApiError> {
        let body = UpdateRequest { building_id: BUILDING_ID, floor_id: floor, room_id: ui_room_to_csv(ui_room), status };
        let url = format!("{}/api/update-availability", self.base_url);
        let res = self.http.post(&url).json(&body).send().await?;

        let status_code = res.status();
        if !status_code.is_success() {
            let text = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<UpdateResponse>(&text).map(|r| r.message).unwrap_or(text);
            return Err(ApiError::Status { status: status_code.as_u16(), message });
        }
        Ok(res.json::<UpdateResponse>().await?)
    }
}

// =============================================================================
// SAVE BANNER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Success,
    Error,
}

impl SaveStatus {
    #[must_use]
    pub fn message(self) -> Option<&'static str> {
        match self {
            Self::Idle => None,
            Self::Saving => Some("Saving changes..."),
            Self::Success => Some("Changes saved successfully!"),
            Self::Error => Some("Error saving changes. Please try again."),
        }
    }
}

/// Save feedback that falls back to `Idle` on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveBanner {
    status: SaveStatus,
    until: Option<Instant>,
}

impl SaveBanner {
    pub fn show(&mut self, status: SaveStatus) {
        self.status = status;
        self.until = match status {
            SaveStatus::Success => Some(Instant::now() + SUCCESS_VISIBLE),
            SaveStatus::Error => Some(Instant::now() + ERROR_VISIBLE),
            SaveStatus::Idle | SaveStatus::Saving => None,
        };
    }

    #[must_use]
    pub fn current(&self) -> SaveStatus {
        match self.until {
            Some(until) if Instant::now() >= until => SaveStatus::Idle,
            _ => self.status,
        }
    }
}

// =============================================================================
// ADMIN EDITOR
// =============================================================================

pub struct AdminEditor {
    api: AvailabilityApi,
    banner: Mutex<SaveBanner>,
}

impl AdminEditor {
    #[must_use]
    pub fn new(api: AvailabilityApi) -> Self {
        Self { api, banner: Mutex::new(SaveBanner::default()) }
    }

    fn banner_mut(&self) -> MutexGuard<'_, SaveBanner> {
        self.banner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn banner(&self) -> SaveStatus {
        self.banner_mut().current()
    }

    /// Change a unit's status locally, then persist it.
    ///
    /// # Errors
    ///
    /// The API error, after the banner has switched to `Error`. The local
    /// change stays in place.
    pub async fn set_status(
        &self,
        store: &Mutex<Store>,
        floor: u32,
        ui_room: u32,
        status: RoomStatus,
    ) -> Result<UpdateResponse, ApiError> {
        info!(floor, room = ui_room, status = status.label(), "admin: updating availability");
        store.lock().unwrap_or_else(PoisonError::into_inner).update_availability(floor, ui_room, status);
        self.banner_mut().show(SaveStatus::Saving);

        match self.api.update(floor, ui_room, status).await {
            Ok(response) => {
                self.banner_mut().show(SaveStatus::Success);
                Ok(response)
            }
            Err(e) => {
                error!(floor, room = ui_room, error = %e, "admin: availability update failed");
                self.banner_mut().show(SaveStatus::Error);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
