//! Unit availability index built from `availability.csv`.
//!
//! Rows are `building_id,floor_id,room_id,status`. The file numbers room
//! slots 1..=10 per floor but only slots 3..=8 are sellable units; the UI
//! numbers those 1..=6.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::csv::{lines, parse_csv_line};

/// CSV room ids that correspond to physical units.
pub const CSV_ROOMS: RangeInclusive<u32> = 3..=8;
/// Difference between a CSV room id and its UI room number.
pub const ROOM_OFFSET: u32 = 2;

/// UI room number for a CSV room id, `None` outside the sellable range.
#[must_use]
pub fn csv_room_to_ui(csv_room: u32) -> Option<u32> {
    CSV_ROOMS.contains(&csv_room).then(|| csv_room - ROOM_OFFSET)
}

#[must_use]
pub fn ui_room_to_csv(ui_room: u32) -> u32 {
    ui_room + ROOM_OFFSET
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RoomStatus {
    Sold,
    #[default]
    Available,
    Blocked,
}

impl RoomStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Sold => "Sold",
            Self::Available => "Available",
            Self::Blocked => "Blocked",
        }
    }

    /// Swatch colour used on the admin grid and LED legend.
    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Self::Sold => "#0064ff",
            Self::Available => "#00ff00",
            Self::Blocked => "#ffff00",
        }
    }
}

impl From<RoomStatus> for u8 {
    fn from(status: RoomStatus) -> Self {
        match status {
            RoomStatus::Sold => 0,
            RoomStatus::Available => 1,
            RoomStatus::Blocked => 2,
        }
    }
}

impl TryFrom<u8> for RoomStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sold),
            1 => Ok(Self::Available),
            2 => Ok(Self::Blocked),
            other => Err(format!("unknown room status {other}")),
        }
    }
}

impl std::str::FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "sold" => Ok(Self::Sold),
            "1" | "available" => Ok(Self::Available),
            "2" | "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown room status {other:?}")),
        }
    }
}

/// Status per `(floor, ui room)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityIndex {
    statuses: BTreeMap<(u32, u32), RoomStatus>,
}

impl AvailabilityIndex {
    /// Build the index from the full file text. The header and any row with
    /// missing or unparsable fields are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut statuses = BTreeMap::new();
        let mut discarded = 0usize;

        for line in lines(text).skip(1) {
            let parts = parse_csv_line(line);
            let [_building, floor, room, status, ..] = parts.as_slice() else { continue };
            let (Ok(floor), Ok(room), Ok(status)) =
                (floor.trim().parse::<u32>(), room.trim().parse::<u32>(), status.trim().parse::<u8>())
            else {
                continue;
            };
            let Ok(status) = RoomStatus::try_from(status) else { continue };
            let Some(ui_room) = csv_room_to_ui(room) else {
                discarded += 1;
                continue;
            };
            statuses.insert((floor, ui_room), status);
        }

        if discarded > 0 {
            debug!(discarded, "availability: non-unit rows dropped");
        }
        info!(units = statuses.len(), "availability: parsed");
        Self { statuses }
    }

    /// Status of a unit; units missing from the file count as available.
    #[must_use]
    pub fn status(&self, floor: u32, ui_room: u32) -> RoomStatus {
        self.statuses.get(&(floor, ui_room)).copied().unwrap_or_default()
    }

    pub fn set(&mut self, floor: u32, ui_room: u32, status: RoomStatus) {
        self.statuses.insert((floor, ui_room), status);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Units in `(floor, room)` order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, RoomStatus)> + '_ {
        self.statuses.iter().map(|(&(floor, room), &status)| (floor, room, status))
    }
}

#[cfg(test)]
#[path = "availability_test.rs"]
mod tests;
