//! Cast coordination — who controls the shared TV.
//!
//! DESIGN
//! ======
//! The lock is the retained value of `{project}/cast/state`. Claiming means
//! publishing `active: true` with our identity; releasing means publishing
//! `active: false`. Every kiosk observes the retained record and derives its
//! own phase from it:
//!
//! ```text
//!   Idle ──request──▶ Requesting ──published──▶ Holding
//!    ▲                                             │
//!    └───────────────release───────────────────────┘
//!   any ──observe(active, other holder)──▶ Blocked
//!   any ──observe(inactive)──▶ Idle
//! ```
//!
//! Records we publish carry a strictly increasing `ts`. A release, or a
//! record of our own, older than our latest publish is a late echo and is
//! ignored, so a quick stop-then-cast is not undone by the stop's echo.
//!
//! TRADE-OFFS
//! ==========
//! There is no arbitration. Two kiosks claiming at the same moment both
//! publish; whichever record the broker stores last wins and the other
//! kiosk drops to `Blocked` when it sees it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::net::{ClientIdentity, ConnectionManager, PublishOptions};

/// Time each image stays on screen during auto-cycle.
pub const AUTO_CYCLE_DWELL: Duration = Duration::from_secs(5);

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastKind {
    Floor,
    Room,
    View,
    Amenity,
}

/// What is on screen, for receivers that want more than the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastMetadata {
    #[serde(rename = "type")]
    pub kind: CastKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amenity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_index: Option<usize>,
}

impl CastMetadata {
    /// Metadata carrying only the kind.
    #[must_use]
    pub fn new(kind: CastKind) -> Self {
        Self { kind, floor: None, room: None, direction: None, amenity: None, image_index: None }
    }

    #[must_use]
    pub fn floor(floor: u32) -> Self {
        Self { floor: Some(floor), ..Self::new(CastKind::Floor) }
    }

    #[must_use]
    pub fn room(floor: Option<u32>, room: &str) -> Self {
        Self { floor, room: Some(room.to_owned()), ..Self::new(CastKind::Room) }
    }

    #[must_use]
    pub fn view(floor: Option<u32>, room: &str, direction: &str) -> Self {
        Self {
            floor,
            room: Some(room.to_owned()),
            direction: Some(direction.to_owned()),
            ..Self::new(CastKind::View)
        }
    }

    #[must_use]
    pub fn amenity(id: &str, image_index: usize) -> Self {
        Self { amenity: Some(id.to_owned()), image_index: Some(image_index), ..Self::new(CastKind::Amenity) }
    }
}

/// One castable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastItem {
    pub image_src: String,
    pub metadata: CastMetadata,
}

/// The retained lock record.
///
/// `metadata` stays loosely typed on the wire so a peer sending something
/// unexpected there cannot make the whole record unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastState {
    pub active: bool,
    #[serde(default)]
    pub holder_client_id: Option<String>,
    #[serde(default)]
    pub holder_name: Option<String>,
    #[serde(default)]
    pub image_src: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub ts: i64,
}

impl CastState {
    #[must_use]
    pub fn claim(identity: &ClientIdentity, item: &CastItem) -> Self {
        Self {
            active: true,
            holder_client_id: Some(identity.client_id.clone()),
            holder_name: Some(identity.client_name.clone()),
            image_src: Some(item.image_src.clone()),
            metadata: serde_json::to_value(&item.metadata).ok(),
            ts: now_ms(),
        }
    }

    #[must_use]
    pub fn released() -> Self {
        Self { active: false, holder_client_id: None, holder_name: None, image_src: None, metadata: None, ts: now_ms() }
    }

    /// Parse a `cast/state` payload. An empty payload (cleared retained
    /// value) reads as released.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed payloads.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        if payload.is_empty() {
            return Ok(Self { ts: 0, ..Self::released() });
        }
        serde_json::from_slice(payload)
    }

    /// Typed metadata, when it is well formed.
    #[must_use]
    pub fn cast_metadata(&self) -> Option<CastMetadata> {
        self.metadata.clone().and_then(|v| serde_json::from_value(v).ok())
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CastPhase {
    #[default]
    Idle,
    Requesting,
    Holding,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub client_id: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CastError {
    #[error("TV is being controlled by {holder}")]
    Blocked { holder: String },
    #[error("nothing to cast for the current selection")]
    NothingToCast,
}

#[derive(Debug, Default)]
struct Lock {
    phase: CastPhase,
    holder: Option<Holder>,
    /// `ts` of the last record we published.
    last_stamp: i64,
    /// Our own or inactive records older than this are late echoes of
    /// something we already superseded.
    ignore_before: i64,
}

impl Lock {
    /// Strictly increasing `ts` for the next record we publish.
    fn stamp(&mut self) -> i64 {
        let ts = now_ms().max(self.last_stamp + 1);
        self.last_stamp = ts;
        self.ignore_before = ts;
        ts
    }
}

/// Returns a claim abandoned mid-publish to `Idle`.
struct ClaimGuard<'a> {
    lock: &'a Mutex<Lock>,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if lock.phase == CastPhase::Requesting {
            warn!("cast: claim abandoned");
            lock.phase = CastPhase::Idle;
            lock.holder = None;
        }
    }
}

pub struct CastCoordinator {
    connection: Arc<ConnectionManager>,
    lock: Mutex<Lock>,
}

impl CastCoordinator {
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection, lock: Mutex::new(Lock::default()) }
    }

    fn state(&self) -> MutexGuard<'_, Lock> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn phase(&self) -> CastPhase {
        self.state().phase
    }

    /// Current holder of an active lock, ourselves included.
    #[must_use]
    pub fn holder(&self) -> Option<Holder> {
        self.state().holder.clone()
    }

    /// Apply a `cast/state` record seen on the broker. Returns the new phase,
    /// or `None` when the record is a late echo older than our last publish
    /// and was ignored.
    ///
    /// Another kiosk's active claim is never ignored: last publisher wins.
    pub fn observe(&self, record: &CastState) -> Option<CastPhase> {
        let me = self.connection.identity();
        let mut lock = self.state();
        let previous = lock.phase;

        let holder_id = record.holder_client_id.clone().unwrap_or_default();
        let theirs = record.active && holder_id != me.client_id;
        if !theirs && record.ts < lock.ignore_before {
            debug!(ts = record.ts, newer = lock.ignore_before, "cast: stale record ignored");
            return None;
        }

        if theirs {
            // Their release may carry an older clock than our last claim.
            lock.ignore_before = 0;
            lock.phase = CastPhase::Blocked;
            lock.holder = Some(Holder { client_id: holder_id, name: record.holder_name.clone().unwrap_or_default() });
        } else if record.active {
            lock.phase = CastPhase::Holding;
            lock.holder = Some(Holder { client_id: holder_id, name: record.holder_name.clone().unwrap_or_default() });
        } else {
            lock.phase = CastPhase::Idle;
            lock.holder = None;
        }

        if lock.phase != previous {
            info!(from = ?previous, to = ?lock.phase, holder = ?lock.holder.as_ref().map(|h| &h.name), "cast: phase changed");
        }
        Some(lock.phase)
    }

    /// Claim the TV and show `item`. Offline, the claim is queued and the
    /// phase moves to `Holding` straight away.
    ///
    /// # Errors
    ///
    /// `CastError::Blocked` while another kiosk holds the lock.
    pub async fn request(&self, item: &CastItem) -> Result<(), CastError> {
        let ts = {
            let mut lock = self.state();
            if lock.phase == CastPhase::Blocked {
                let holder = lock.holder.as_ref().map(|h| h.name.clone()).unwrap_or_default();
                warn!(%holder, "cast: request refused, lock held elsewhere");
                return Err(CastError::Blocked { holder });
            }
            lock.phase = CastPhase::Requesting;
            lock.stamp()
        };

        let me = self.connection.identity();
        info!(image = %item.image_src, "cast: claiming");
        let mut guard = ClaimGuard { lock: &self.lock, armed: true };
        self.publish(&CastState { ts, ..CastState::claim(&me, item) }).await;
        guard.armed = false;

        let mut lock = self.state();
        // A record observed mid-publish already decided the phase.
        if lock.phase == CastPhase::Requesting {
            lock.phase = CastPhase::Holding;
            lock.holder = Some(Holder { client_id: me.client_id, name: me.client_name });
        }
        Ok(())
    }

    /// Re-publish while holding so the TV follows navigation. Returns whether
    /// anything was sent.
    pub async fn follow(&self, item: &CastItem) -> bool {
        let ts = {
            let mut lock = self.state();
            if lock.phase != CastPhase::Holding {
                return false;
            }
            lock.stamp()
        };
        debug!(image = %item.image_src, "cast: following");
        self.publish(&CastState { ts, ..CastState::claim(&self.connection.identity(), item) }).await;
        true
    }

    /// Give the TV back. Only a holder (or pending claimant) releases;
    /// returns whether a release was published.
    pub async fn release(&self) -> bool {
        let ts = {
            let mut lock = self.state();
            if !matches!(lock.phase, CastPhase::Holding | CastPhase::Requesting) {
                debug!(phase = ?lock.phase, "cast: release ignored, not holding");
                return false;
            }
            lock.phase = CastPhase::Idle;
            lock.holder = None;
            lock.stamp()
        };
        info!("cast: releasing");
        self.publish(&CastState { ts, ..CastState::released() }).await;
        true
    }

    /// Claim with the first item, then show each following item after
    /// `dwell`. Stops early when `cancel` fires or the lock is lost.
    ///
    /// Returns how many images were published.
    ///
    /// # Errors
    ///
    /// `NothingToCast` for an empty list, `Blocked` if the claim is refused.
    pub async fn auto_cycle(&self, items: &[CastItem], dwell: Duration, cancel: CancellationToken) -> Result<usize, CastError> {
        let Some((first, rest)) = items.split_first() else {
            return Err(CastError::NothingToCast);
        };
        if cancel.is_cancelled() {
            return Ok(0);
        }

        self.request(first).await?;
        Ok(1 + self.continue_cycle(rest, dwell, cancel).await)
    }

    /// Show `items` one `dwell` apart after a claim already made. Returns how
    /// many were published before the list ran out, `cancel` fired or the
    /// lock was lost.
    pub async fn continue_cycle(&self, items: &[CastItem], dwell: Duration, cancel: CancellationToken) -> usize {
        let mut published = 0;
        for item in items {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(published, "cast: auto-cycle cancelled");
                    return published;
                }
                () = tokio::time::sleep(dwell) => {}
            }
            if cancel.is_cancelled() {
                return published;
            }
            if !self.follow(item).await {
                info!(published, "cast: auto-cycle stopped, lock lost");
                return published;
            }
            published += 1;
        }
        published
    }

    async fn publish(&self, record: &CastState) {
        let topic = self.connection.topics().cast_state();
        self.connection.publish_json(&topic, record, PublishOptions::RETAINED).await;
    }
}

#[cfg(test)]
#[path = "cast_test.rs"]
mod tests;
