//! Kiosk state store: navigation, connection flags and loaded data.
//!
//! DESIGN
//! ======
//! Plain data behind plain `&mut self` mutators. The runtime keeps it in a
//! `Mutex` and never holds the lock across an await. Every mutator logs at
//! debug level so a session can be replayed from the logs.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::amenities;
use crate::availability::{AvailabilityIndex, RoomStatus};
use crate::cast::{CastItem, CastMetadata};
use crate::catalog::Catalog;
use crate::commands::{AMENITY_FLOOR, Relay};
use crate::layout::LayoutIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Page {
    Login,
    #[default]
    Home,
    FloorMap,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Floor,
    Room,
    View,
    Amenity,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavigationState {
    pub page: Page,
    pub mode: Mode,
    pub floor: Option<u32>,
    pub room: Option<String>,
    pub direction: Option<String>,
    pub amenity: Option<String>,
    pub image_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayState {
    pub surrounding: bool,
    pub terrace: bool,
}

/// Payload of `relay/state`; absent relays are left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct RelayUpdate {
    #[serde(default)]
    pub surrounding: Option<bool>,
    #[serde(default)]
    pub terrace: Option<bool>,
}

/// What the cast button shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CastBanner {
    pub is_casting: bool,
    pub holder_client_id: Option<String>,
    pub holder_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Store {
    nav: NavigationState,
    catalog: Catalog,
    catalog_loaded: bool,
    connected: bool,
    device_alive: bool,
    relays: RelayState,
    cast: CastBanner,
    controls_sidebar_open: bool,
}

impl Store {
    // =========================================================================
    // READ
    // =========================================================================

    #[must_use]
    pub fn nav(&self) -> &NavigationState {
        &self.nav
    }

    #[must_use]
    pub fn layout(&self) -> &LayoutIndex {
        &self.catalog.layout
    }

    #[must_use]
    pub fn availability(&self) -> &AvailabilityIndex {
        &self.catalog.availability
    }

    #[must_use]
    pub fn catalog_loaded(&self) -> bool {
        self.catalog_loaded
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn device_alive(&self) -> bool {
        self.device_alive
    }

    #[must_use]
    pub fn relays(&self) -> RelayState {
        self.relays
    }

    #[must_use]
    pub fn cast(&self) -> &CastBanner {
        &self.cast
    }

    #[must_use]
    pub fn controls_sidebar_open(&self) -> bool {
        self.controls_sidebar_open
    }

    // =========================================================================
    // NAVIGATION
    // =========================================================================

    pub fn set_page(&mut self, page: Page) {
        debug!(?page, "store: page");
        self.nav.page = page;
    }

    /// Pick a floor (or none, which returns home). Clears any room, view or
    /// amenity selection.
    pub fn select_floor(&mut self, floor: Option<u32>) {
        debug!(?floor, "store: select floor");
        self.nav = NavigationState {
            page: if floor.is_some() { Page::FloorMap } else { Page::Home },
            mode: Mode::Floor,
            floor,
            ..NavigationState::default()
        };
    }

    pub fn select_room(&mut self, room: Option<String>) {
        debug!(?room, "store: select room");
        self.nav.mode = if room.is_some() { Mode::Room } else { Mode::Floor };
        self.nav.room = room;
        self.nav.direction = None;
    }

    pub fn select_direction(&mut self, direction: Option<String>) {
        debug!(?direction, "store: select direction");
        self.nav.mode = if direction.is_some() { Mode::View } else { Mode::Room };
        self.nav.direction = direction;
    }

    /// Focus an amenity on the rooftop floor. Unknown ids are ignored.
    pub fn select_amenity(&mut self, id: &str) -> bool {
        if amenities::by_id(id).is_none() {
            debug!(%id, "store: unknown amenity ignored");
            return false;
        }
        debug!(%id, "store: select amenity");
        self.nav = NavigationState {
            page: Page::FloorMap,
            mode: Mode::Amenity,
            floor: Some(AMENITY_FLOOR),
            amenity: Some(id.to_owned()),
            ..NavigationState::default()
        };
        true
    }

    /// Choose one photo of the selected amenity, or `None` for all of them.
    pub fn select_amenity_image(&mut self, index: Option<usize>) -> bool {
        let Some(amenity) = self.nav.amenity.as_deref().and_then(amenities::by_id) else {
            return false;
        };
        if index.is_some_and(|i| i >= amenity.images.len()) {
            return false;
        }
        debug!(?index, "store: select amenity image");
        self.nav.image_index = index;
        true
    }

    pub fn reset(&mut self) {
        debug!("store: reset navigation");
        self.nav = NavigationState::default();
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    pub fn set_connected(&mut self, connected: bool) {
        info!(connected, "store: broker connection");
        self.connected = connected;
    }

    /// Returns whether the value changed.
    pub fn set_device_alive(&mut self, alive: bool) -> bool {
        if self.device_alive == alive {
            return false;
        }
        info!(alive, "store: device alive");
        self.device_alive = alive;
        true
    }

    pub fn update_relay_state(&mut self, relay: Relay, active: bool) {
        debug!(relay = relay.as_str(), active, "store: relay");
        match relay {
            Relay::Surrounding => self.relays.surrounding = active,
            Relay::Terrace => self.relays.terrace = active,
        }
    }

    pub fn apply_relay_update(&mut self, update: RelayUpdate) {
        if let Some(active) = update.surrounding {
            self.update_relay_state(Relay::Surrounding, active);
        }
        if let Some(active) = update.terrace {
            self.update_relay_state(Relay::Terrace, active);
        }
    }

    pub fn set_cast_state(&mut self, is_casting: bool, holder_client_id: Option<String>, holder_name: Option<String>) {
        debug!(is_casting, holder = ?holder_name, "store: cast state");
        self.cast = CastBanner { is_casting, holder_client_id, holder_name };
    }

    pub fn toggle_controls_sidebar(&mut self) -> bool {
        self.controls_sidebar_open = !self.controls_sidebar_open;
        debug!(open = self.controls_sidebar_open, "store: controls sidebar");
        self.controls_sidebar_open
    }

    // =========================================================================
    // DATA
    // =========================================================================

    /// Replace both indices.
    pub fn set_catalog(&mut self, catalog: Catalog) {
        info!(floors = catalog.layout.floors.len(), units = catalog.availability.len(), "store: catalog replaced");
        self.catalog = catalog;
        self.catalog_loaded = true;
    }

    pub fn update_availability(&mut self, floor: u32, ui_room: u32, status: RoomStatus) {
        debug!(floor, room = ui_room, status = status.label(), "store: availability");
        self.catalog.availability.set(floor, ui_room, status);
    }

    // =========================================================================
    // CAST SOURCES
    // =========================================================================

    /// Images the current selection can put on the TV.
    #[must_use]
    pub fn cast_items(&self) -> Vec<CastItem> {
        let nav = &self.nav;
        match nav.mode {
            Mode::View => {
                let (Some(room), Some(direction)) = (nav.room.as_deref(), nav.direction.as_deref()) else {
                    return Vec::new();
                };
                let layout = &self.catalog.layout;
                layout
                    .view(room, direction, nav.floor)
                    .or_else(|| layout.view(room, direction, None))
                    .map(|view| CastItem {
                        image_src: format!("/view/{}", view.filename),
                        metadata: CastMetadata::view(nav.floor, room, direction),
                    })
                    .into_iter()
                    .collect()
            }
            Mode::Room => nav
                .room
                .as_deref()
                .map(|room| CastItem { image_src: format!("/rooms/r{room}.png"), metadata: CastMetadata::room(nav.floor, room) })
                .into_iter()
                .collect(),
            Mode::Floor => nav
                .floor
                .and_then(|floor| {
                    self.catalog.layout.floor_images.get(&floor).map(|image| CastItem {
                        image_src: format!("/floors/{image}.png"),
                        metadata: CastMetadata::floor(floor),
                    })
                })
                .into_iter()
                .collect(),
            Mode::Amenity => {
                let Some(amenity) = nav.amenity.as_deref().and_then(amenities::by_id) else {
                    return Vec::new();
                };
                amenity
                    .images
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| nav.image_index.is_none_or(|chosen| chosen == *i))
                    .map(|(i, file)| CastItem {
                        image_src: amenities::image_path(file),
                        metadata: CastMetadata::amenity(amenity.id, i),
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
