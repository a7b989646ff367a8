//! Rooftop amenity catalogue (floor 16).
//!
//! Each amenity owns a strip of LEDs on the model and optionally a set of
//! photos that can be cast. Amenities with photos come first.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amenity {
    pub id: &'static str,
    pub name: &'static str,
    /// Photo file names under `/amenities/`.
    pub images: &'static [&'static str],
    pub led_count: u16,
    pub color: Rgb,
}

impl Amenity {
    /// Button label for the n-th photo.
    #[must_use]
    pub fn image_label(&self, index: usize) -> String {
        format!("View {}", index + 1)
    }
}

const fn amenity(
    id: &'static str,
    name: &'static str,
    images: &'static [&'static str],
    led_count: u16,
    (r, g, b): (u8, u8, u8),
) -> Amenity {
    Amenity { id, name, images, led_count, color: Rgb { r, g, b } }
}

pub static AMENITIES: &[Amenity] = &[
    amenity("pickle-ball", "Pickle Ball Court", &["tennis1.jpg", "tennis2.jpg"], 80, (0, 255, 100)),
    amenity(
        "indoor-games",
        "Multipurpose Indoor Games",
        &["pickleball1.jpg", "pickleball2.jpg", "pickleball3.jpg", "pickleball4.jpg"],
        30,
        (100, 200, 255),
    ),
    amenity("conference", "Conference Room", &["conference1.jpg"], 45, (255, 255, 100)),
    amenity("sitout", "Sitout Space", &["sitout1.jpg", "sitout2.jpg", "sitout3.jpg"], 90, (200, 255, 150)),
    amenity("toddlers", "Art & Craft / Toddlers Area", &["toddlers1.jpg"], 25, (255, 180, 100)),
    amenity("fitness", "Fitness Centre", &["gym1.jpg", "gym2.jpg", "gym3.jpg", "gym4.jpg"], 35, (255, 80, 80)),
    amenity("waiting", "Waiting Lounge", &["waiting1.jpg", "waiting2.jpg", "waiting3.jpg"], 40, (180, 255, 180)),
    // LED-only
    amenity("lounge", "Lounge", &[], 20, (255, 255, 255)),
    amenity("toilet-male", "Toilet (Male)", &[], 50, (100, 150, 255)),
    amenity("toilet-female", "Toilet (Female)", &[], 55, (255, 150, 200)),
    amenity("handicap-toilet", "Handicap Toilet", &[], 60, (200, 200, 255)),
    amenity("kitchen", "Kitchen", &[], 65, (255, 200, 80)),
    amenity("janitor", "Janitor / Cleaning", &[], 70, (150, 150, 150)),
    amenity("banquet", "Banquet Hall", &[], 75, (255, 215, 0)),
    amenity("walkway", "Walkway", &[], 85, (255, 255, 255)),
    amenity("lawn", "Lawn", &[], 95, (100, 255, 100)),
    amenity("meditation", "Meditation Area", &[], 100, (150, 100, 255)),
];

#[must_use]
pub fn by_id(id: &str) -> Option<&'static Amenity> {
    AMENITIES.iter().find(|a| a.id == id)
}

pub fn with_images() -> impl Iterator<Item = &'static Amenity> {
    AMENITIES.iter().filter(|a| !a.images.is_empty())
}

#[must_use]
pub fn image_path(filename: &str) -> String {
    format!("/amenities/{filename}")
}

#[cfg(test)]
#[path = "amenities_test.rs"]
mod tests;
