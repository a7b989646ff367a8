//! Fetches the two data files the kiosk navigates by.
//!
//! ERROR HANDLING
//! ==============
//! Loading never fails as a whole. A file that cannot be fetched leaves its
//! index empty and logs the reason, so the kiosk still starts (with empty
//! navigation) on a flaky network.

use tracing::{error, info};

use crate::api::ApiError;
use crate::availability::AvailabilityIndex;
use crate::layout::LayoutIndex;

pub const LAYOUT_PATH: &str = "/flpx.csv";
pub const AVAILABILITY_PATH: &str = "/api/availability";

/// Both indices, replaced wholesale on every load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub layout: LayoutIndex,
    pub availability: AvailabilityIndex,
}

#[derive(Debug, Clone)]
pub struct CatalogLoader {
    http: reqwest::Client,
    base_url: String,
}

impl CatalogLoader {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    async fn fetch_text(&self, path: &str) -> Result<String, ApiError> {
        let res = self.http.get(format!("{}{path}", self.base_url)).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), message: format!("GET {path} failed") });
        }
        Ok(res.text().await?)
    }

    /// Fetch and parse the layout, then availability.
    pub async fn load(&self) -> Catalog {
        let layout = match self.fetch_text(LAYOUT_PATH).await {
            Ok(text) => LayoutIndex::parse(&text),
            Err(e) => {
                error!(path = LAYOUT_PATH, error = %e, "catalog: layout fetch failed");
                LayoutIndex::default()
            }
        };
        let availability = match self.fetch_text(AVAILABILITY_PATH).await {
            Ok(text) => AvailabilityIndex::parse(&text),
            Err(e) => {
                error!(path = AVAILABILITY_PATH, error = %e, "catalog: availability fetch failed");
                AvailabilityIndex::default()
            }
        };
        info!(floors = layout.floors.len(), units = availability.len(), "catalog: loaded");
        Catalog { layout, availability }
    }
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
