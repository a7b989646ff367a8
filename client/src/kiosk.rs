//! Kiosk runtime — wires the connection, cast lock and store together.
//!
//! LIFECYCLE
//! =========
//! `Kiosk::start` spawns three tasks that live until `KioskTasks` is dropped:
//! 1. message pump: inbound broker messages → store / cast coordinator
//! 2. connection watcher: on connect subscribe the kiosk topics and start
//!    the heartbeat; on disconnect mark everything offline and stop it
//! 3. liveness check: re-derive "device alive" from the ack clock
//!
//! Everything else is called by the front end: `toggle_cast`, `navigate`,
//! and the lighting helpers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::Qos;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::amenities;
use crate::cast::{AUTO_CYCLE_DWELL, CastCoordinator, CastError, CastPhase, CastState};
use crate::catalog::Catalog;
use crate::commands::{AMENITY_FLOOR, LightCommand, Relay};
use crate::net::connection::{HEARTBEAT_INTERVAL, LIVENESS_THRESHOLD};
use crate::net::topics::{CAST_STATE, CONTROL_STATE, RELAY_STATE, UI_ACK};
use crate::net::{ConnectionManager, HeartbeatHandle, InboundMessage, TransportEvent};
use crate::store::{RelayUpdate, Store};

/// How casting behaves after the first image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CastPolicy {
    /// The TV follows the kiosk's navigation while the lock is held.
    #[default]
    Follow,
    /// Multi-image selections are shown in turn, one dwell apart.
    AutoCycle,
}

#[derive(Debug, Clone, Copy)]
pub struct KioskOptions {
    pub policy: CastPolicy,
    pub dwell: Duration,
    pub heartbeat_interval: Duration,
    pub liveness_threshold: Duration,
    pub liveness_check: Duration,
}

impl Default for KioskOptions {
    fn default() -> Self {
        Self {
            policy: CastPolicy::default(),
            dwell: AUTO_CYCLE_DWELL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness_threshold: LIVENESS_THRESHOLD,
            liveness_check: Duration::from_secs(2),
        }
    }
}

/// Outcome of a cast toggle, for the front end to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Started { images: usize },
    Stopped,
    NothingToCast,
    Blocked { holder: String },
}

/// Background tasks of a started kiosk; aborted on drop.
#[derive(Debug)]
pub struct KioskTasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for KioskTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

pub struct Kiosk {
    connection: Arc<ConnectionManager>,
    cast: Arc<CastCoordinator>,
    store: Arc<Mutex<Store>>,
    options: KioskOptions,
    cycle: Mutex<Option<CancellationToken>>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl Kiosk {
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>, options: KioskOptions) -> Arc<Self> {
        Arc::new(Self {
            cast: Arc::new(CastCoordinator::new(Arc::clone(&connection))),
            connection,
            store: Arc::new(Mutex::new(Store::default())),
            options,
            cycle: Mutex::new(None),
            heartbeat: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    #[must_use]
    pub fn cast(&self) -> &CastCoordinator {
        &self.cast
    }

    /// Shared store handle, e.g. for `AdminEditor`.
    #[must_use]
    pub fn store_handle(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    /// Lock the store. Do not hold the guard across an await.
    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_catalog(&self, catalog: Catalog) {
        self.store().set_catalog(catalog);
    }

    // =========================================================================
    // TASKS
    // =========================================================================

    /// Spawn the message pump, connection watcher and liveness check.
    pub fn start(self: &Arc<Self>) -> KioskTasks {
        let pump = {
            let kiosk = Arc::clone(self);
            self.connection.on_message(move |message| kiosk.handle_message(&message))
        };

        let watcher = {
            let kiosk = Arc::clone(self);
            let mut events = self.connection.events();
            tokio::spawn(async move {
                if kiosk.connection.is_connected() {
                    kiosk.on_connected().await;
                }
                loop {
                    match events.recv().await {
                        Ok(TransportEvent::Connected) => kiosk.on_connected().await,
                        Ok(TransportEvent::Disconnected) => kiosk.on_disconnected(),
                        Ok(TransportEvent::Error(e)) => debug!(error = %e, "kiosk: transport error"),
                        Ok(TransportEvent::Message(_)) => {}
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "kiosk: connection watcher lagged"),
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let liveness = {
            let kiosk = Arc::clone(self);
            let period = self.options.liveness_check;
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval(period);
                loop {
                    ticks.tick().await;
                    kiosk.refresh_liveness();
                }
            })
        };

        info!(policy = ?self.options.policy, "kiosk: started");
        KioskTasks { handles: vec![pump, watcher, liveness] }
    }

    async fn on_connected(&self) {
        self.store().set_connected(true);
        for topic in self.connection.topics().kiosk_subscriptions() {
            self.connection.subscribe(&topic, Qos::AtMostOnce).await;
        }
        let heartbeat = self.connection.start_heartbeat(self.options.heartbeat_interval);
        if let Some(previous) = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner).replace(heartbeat) {
            previous.stop();
        }
    }

    fn on_disconnected(&self) {
        {
            let mut store = self.store();
            store.set_connected(false);
            store.set_device_alive(false);
        }
        if let Some(heartbeat) = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner).take() {
            heartbeat.stop();
        }
    }

    pub fn refresh_liveness(&self) {
        let alive = self.connection.is_device_alive(self.options.liveness_threshold);
        self.store().set_device_alive(alive);
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Route one inbound message by topic.
    pub fn handle_message(&self, message: &InboundMessage) {
        match self.connection.topics().relative(&message.topic) {
            Some(UI_ACK) => {
                self.connection.record_ack();
                self.refresh_liveness();
            }
            Some(CAST_STATE) => match CastState::from_payload(&message.payload) {
                Ok(record) => self.apply_cast_state(&record),
                Err(e) => warn!(error = %e, "kiosk: unreadable cast state"),
            },
            Some(RELAY_STATE) => match serde_json::from_slice::<RelayUpdate>(&message.payload) {
                Ok(update) => self.store().apply_relay_update(update),
                Err(e) => warn!(error = %e, "kiosk: unreadable relay state"),
            },
            Some(CONTROL_STATE) => debug!(payload = %message.text(), "kiosk: control state"),
            _ => debug!(topic = %message.topic, "kiosk: message ignored"),
        }
    }

    fn apply_cast_state(&self, record: &CastState) {
        let Some(phase) = self.cast.observe(record) else {
            return;
        };
        if phase == CastPhase::Blocked || phase == CastPhase::Idle {
            self.cancel_cycle();
        }
        self.store().set_cast_state(record.active, record.holder_client_id.clone(), record.holder_name.clone());
    }

    // =========================================================================
    // CASTING
    // =========================================================================

    fn cancel_cycle(&self) {
        if let Some(token) = self.cycle.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }

    /// The cast button: stop if we hold the TV, otherwise start casting the
    /// current selection.
    pub async fn toggle_cast(&self) -> Notice {
        if self.cast.phase() == CastPhase::Holding {
            self.cancel_cycle();
            self.cast.release().await;
            return Notice::Stopped;
        }

        let mut items = self.store().cast_items();
        if items.is_empty() {
            warn!("kiosk: nothing to cast");
            return Notice::NothingToCast;
        }
        if self.cast.phase() == CastPhase::Blocked {
            let holder = self.cast.holder().map(|h| h.name).unwrap_or_default();
            return Notice::Blocked { holder };
        }

        let images = items.len();
        match self.cast.request(&items[0]).await {
            Ok(()) => {}
            Err(CastError::Blocked { holder }) => return Notice::Blocked { holder },
            Err(CastError::NothingToCast) => return Notice::NothingToCast,
        }

        // The claim is made before the cycle token exists, so only records
        // newer than it can cancel the cycle.
        if self.options.policy == CastPolicy::AutoCycle && images > 1 {
            let token = CancellationToken::new();
            if let Some(previous) = self.cycle.lock().unwrap_or_else(PoisonError::into_inner).replace(token.clone()) {
                previous.cancel();
            }
            let rest = items.split_off(1);
            let cast = Arc::clone(&self.cast);
            let dwell = self.options.dwell;
            tokio::spawn(async move {
                let shown = cast.continue_cycle(&rest, dwell, token).await;
                debug!(shown = shown + 1, "kiosk: auto-cycle finished");
            });
            return Notice::Started { images };
        }
        Notice::Started { images: 1 }
    }

    /// Apply a navigation change, then keep the TV in step when following.
    pub async fn navigate(&self, change: impl FnOnce(&mut Store)) {
        let first = {
            let mut store = self.store();
            change(&mut store);
            store.cast_items().into_iter().next()
        };
        if self.options.policy != CastPolicy::Follow {
            return;
        }
        if let Some(item) = first {
            self.cast.follow(&item).await;
        }
    }

    // =========================================================================
    // LIGHTING
    // =========================================================================

    pub async fn all_lights(&self) {
        self.connection.send_command(&LightCommand::WhiteAll).await;
    }

    pub async fn all_off(&self) {
        self.connection.send_command(&LightCommand::SetAllFloorsOff).await;
    }

    pub async fn classic(&self) {
        self.connection.send_command(&LightCommand::ClassicAll).await;
    }

    pub async fn show_available(&self) {
        self.connection.send_command(&LightCommand::show_available()).await;
    }

    pub async fn toggle_relay(&self, relay: Relay) {
        self.connection.send_command(&LightCommand::RelayToggle { relay }).await;
    }

    /// Focus an amenity and light its LED strip. Returns `false` for unknown ids.
    pub async fn select_amenity(&self, id: &str) -> bool {
        let Some(amenity) = amenities::by_id(id) else {
            warn!(%id, "kiosk: unknown amenity");
            return false;
        };
        self.navigate(|store| {
            store.select_amenity(id);
        })
        .await;
        let command = LightCommand::CustomLeds {
            floor: AMENITY_FLOOR,
            count: amenity.led_count,
            r: amenity.color.r,
            g: amenity.color.g,
            b: amenity.color.b,
        };
        self.connection.send_command(&command).await;
        true
    }

    /// Return the amenity floor to its default colour.
    pub async fn reset_amenities(&self) {
        self.connection.send_command(&LightCommand::SetFloorColor { floor: AMENITY_FLOOR }).await;
    }
}

#[cfg(test)]
#[path = "kiosk_test.rs"]
mod tests;
