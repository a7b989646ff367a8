//! Building layout index built from `flpx.csv`.
//!
//! Columns: `floor,image,room,room o,view,points`. The `view` column holds
//! one or more direction codes (`"N1,W1"`), quoted when there are several.
//! `room o` (the room's original numbering) is carried but unused.
//!
//! Floors are physical levels: 1 and 2 are commercial, 3..=15 residential
//! (labelled from 1), 16 the rooftop amenity deck and 17 the terrace.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::csv::{lines, parse_csv_line};

/// Commercial floors keep their physical number in room numbers.
const COMMERCIAL_FLOORS: std::ops::RangeInclusive<u32> = 1..=2;

/// Display label for a physical floor number.
#[must_use]
pub fn floor_label(floor: u32) -> String {
    match floor {
        1 => "Ground Floor Commercials".to_owned(),
        2 => "First Floor Commercials".to_owned(),
        3..=15 => format!("Floor {}", floor - 2),
        16 => "Rooftop Amenities".to_owned(),
        17 => "Terrace".to_owned(),
        n => format!("Floor {n}"),
    }
}

/// Sales room number for a room slot on a floor, e.g. floor 6 slot 4 → `"404"`.
#[must_use]
pub fn room_number(floor: u32, room: u32) -> String {
    let level = if COMMERCIAL_FLOORS.contains(&floor) { i64::from(floor) } else { i64::from(floor) - 2 };
    format!("{level}{room:02}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Floor {
    pub id: u32,
    pub label: String,
    /// Floor plan image stem from the first row seen for this floor.
    pub image: Option<String>,
}

/// One directional window view from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewImage {
    pub room: String,
    /// Full direction code, e.g. `"N1"`.
    pub direction: String,
    /// Relative image path: `"{first letter of direction}/{floor - 2}.webp"`.
    pub filename: String,
    pub floor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPolygon {
    pub room: String,
    pub floor: u32,
    /// SVG polygon point list, verbatim.
    pub points: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutIndex {
    pub floors: Vec<Floor>,
    pub floor_images: BTreeMap<u32, String>,
    pub views_by_room: HashMap<String, Vec<ViewImage>>,
    pub polygons: HashMap<(u32, String), Vec<RoomPolygon>>,
}

impl LayoutIndex {
    /// Build the index from the full file text. Malformed rows are skipped
    /// with a warning; the header (first line) is always skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut index = Self::default();
        let mut floor_ids = BTreeSet::new();

        for (n, line) in lines(text).enumerate().skip(1) {
            if !line.contains(',') {
                warn!(line = n, "layout: skipping malformed line");
                continue;
            }
            let parts = parse_csv_line(line);
            let [floor_raw, image, room, _room_original, view, points, ..] = parts.as_slice() else {
                warn!(line = n, columns = parts.len(), "layout: skipping short line");
                continue;
            };
            let Ok(floor) = floor_raw.trim().parse::<u32>() else {
                warn!(line = n, floor = %floor_raw, "layout: invalid floor number");
                continue;
            };

            if floor_ids.insert(floor) {
                debug!(floor, "layout: new floor");
            }
            index.floor_images.entry(floor).or_insert_with(|| image.trim().to_owned());

            let room = room.trim().to_owned();
            let views = index.views_by_room.entry(room.clone()).or_default();
            for direction in view.trim().split(',').map(str::trim).filter(|d| !d.is_empty()) {
                views.push(ViewImage {
                    room: room.clone(),
                    direction: direction.to_owned(),
                    filename: view_filename(direction, floor),
                    floor,
                });
            }

            index.polygons.entry((floor, room.clone())).or_default().push(RoomPolygon {
                room,
                floor,
                points: points.trim().to_owned(),
            });
        }

        index.floors = floor_ids
            .into_iter()
            .map(|id| Floor { id, label: floor_label(id), image: index.floor_images.get(&id).cloned() })
            .collect();

        info!(
            floors = index.floors.len(),
            rooms = index.views_by_room.len(),
            polygons = index.polygons.len(),
            "layout: parsed"
        );
        index
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.floors.is_empty()
    }

    #[must_use]
    pub fn floor(&self, id: u32) -> Option<&Floor> {
        self.floors.iter().find(|f| f.id == id)
    }

    /// Views of `room`, optionally narrowed to those listed for `floor`.
    #[must_use]
    pub fn views(&self, room: &str, floor: Option<u32>) -> Vec<&ViewImage> {
        self.views_by_room
            .get(room)
            .map(|views| views.iter().filter(|v| floor.is_none_or(|f| v.floor == f)).collect())
            .unwrap_or_default()
    }

    /// The view of `room` facing `direction`.
    #[must_use]
    pub fn view(&self, room: &str, direction: &str, floor: Option<u32>) -> Option<&ViewImage> {
        self.views(room, floor).into_iter().find(|v| v.direction == direction)
    }

    /// Every room polygon drawn on `floor`.
    #[must_use]
    pub fn polygons_on_floor(&self, floor: u32) -> Vec<&RoomPolygon> {
        let mut found: Vec<&RoomPolygon> =
            self.polygons.iter().filter(|((f, _), _)| *f == floor).flat_map(|(_, p)| p.iter()).collect();
        found.sort_by(|a, b| a.room.cmp(&b.room));
        found
    }
}

fn view_filename(direction: &str, floor: u32) -> String {
    let letter: String = direction.chars().take(1).collect();
    format!("{letter}/{}.webp", i64::from(floor) - 2)
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod tests;
