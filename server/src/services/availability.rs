//! Availability service — read and rewrite the room-availability CSV.
//!
//! DESIGN
//! ======
//! The CSV (`building_id,floor_id,room_id,status`) is the source of truth for
//! room status. An update reads the whole file, rewrites every line whose
//! first three fields match, and writes the whole file back. Header, blank
//! and short lines pass through untouched.
//!
//! TRADE-OFFS
//! ==========
//! Writers inside this process are serialised through `AppState::csv_write`,
//! but nothing guards against another process editing the same file.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::state::AppState;

pub const HEADER_PREFIX: &str = "building_id";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("room not found: {0}")]
    NotFound(RoomKey),
    #[error("csv io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of one row in the availability CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoomKey {
    pub building_id: u32,
    pub floor_id: u32,
    pub room_id: u32,
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Building {}, Floor {}, Room {}", self.building_id, self.floor_id, self.room_id)
    }
}

// =============================================================================
// REWRITE
// =============================================================================

/// Rewrite the status of every row matching `key`.
///
/// Returns `None` when no row matched, so callers can leave the file alone.
#[must_use]
pub fn rewrite_status(content: &str, key: RoomKey, status: u8) -> Option<String> {
    let mut updated = false;

    let lines: Vec<String> = content
        .split('\n')
        .map(|line| {
            if line.trim().is_empty() || line.starts_with(HEADER_PREFIX) {
                return line.to_owned();
            }

            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 4 {
                return line.to_owned();
            }

            if row_matches(&parts, key) {
                updated = true;
                info!(floor = parts[1], room = parts[2], from = parts[3], to = status, "availability: row rewritten");
                return format!("{},{},{},{status}", parts[0], parts[1], parts[2]);
            }

            line.to_owned()
        })
        .collect();

    updated.then(|| lines.join("\n"))
}

fn row_matches(parts: &[&str], key: RoomKey) -> bool {
    let parse = |s: &str| s.parse::<u32>().ok();
    parse(parts[0]) == Some(key.building_id)
        && parse(parts[1]) == Some(key.floor_id)
        && parse(parts[2]) == Some(key.room_id)
}

// =============================================================================
// FILE OPERATIONS
// =============================================================================

/// Read the raw availability CSV.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub async fn read_csv(path: &Path) -> Result<String, AvailabilityError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Rewrite one room's status in the CSV at `state.availability_csv`.
///
/// # Errors
///
/// Returns [`AvailabilityError::NotFound`] when no row matches (the file is
/// not written) and [`AvailabilityError::Io`] on read/write failure.
pub async fn update_status(state: &AppState, key: RoomKey, status: u8) -> Result<(), AvailabilityError> {
    let _guard = state.csv_write.lock().await;

    let content = read_csv(&state.availability_csv).await?;
    let Some(rewritten) = rewrite_status(&content, key, status) else {
        return Err(AvailabilityError::NotFound(key));
    };

    tokio::fs::write(&state.availability_csv, rewritten).await?;
    info!(%key, status, "availability: csv updated");
    Ok(())
}

#[cfg(test)]
#[path = "availability_test.rs"]
mod tests;
