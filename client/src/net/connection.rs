//! Connection Manager — the kiosk's single broker client.
//!
//! DESIGN
//! ======
//! One manager per process, constructed explicitly and shared by `Arc`.
//! It wraps a `Transport` and adds the kiosk's rules on top:
//! - publishes made while offline are queued and the call returns at once;
//!   a spawned task drains the queue, in order, on the next `Connected`
//! - subscribes made while offline wait for the next `Connected`
//! - transport errors are logged and swallowed, never returned
//! - the LED controller's acks feed a liveness clock
//! - a restartable heartbeat pings the controller on `ui/cmd`
//!
//! TRADE-OFFS
//! ==========
//! Delivery is at-most-once. A publish that was deferred and then hits a
//! dropped connection is lost, matching what the broker itself guarantees.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use frames::{Qos, now_ms};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use super::topics::Topics;
use super::transport::{InboundMessage, PublishOptions, Transport, TransportEvent};
use crate::commands::LightCommand;

/// Default heartbeat period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default window after the last ack during which the controller counts as alive.
pub const LIVENESS_THRESHOLD: Duration = Duration::from_secs(12);

/// Who this kiosk is, as stamped on outbound commands and cast claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_name: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), client_name: client_name.into() }
    }
}

struct Deferred {
    topic: String,
    payload: Vec<u8>,
    options: PublishOptions,
}

/// Publishes waiting for a connection. `draining` is set while a drain task
/// owns the queue; new publishes queue behind it to keep their order.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Deferred>,
    draining: bool,
}

struct Heartbeat {
    generation: u64,
    task: AbortHandle,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    topics: Topics,
    identity: RwLock<ClientIdentity>,
    last_ack: Mutex<Option<Instant>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    generation: Mutex<u64>,
    outbox: Mutex<Outbox>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, topics: Topics, identity: ClientIdentity) -> Arc<Self> {
        Arc::new(Self {
            transport,
            topics,
            identity: RwLock::new(identity),
            last_ack: Mutex::new(None),
            heartbeat: Mutex::new(None),
            generation: Mutex::new(0),
            outbox: Mutex::new(Outbox::default()),
        })
    }

    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    #[must_use]
    pub fn identity(&self) -> ClientIdentity {
        self.identity.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the identity, e.g. after a new login.
    pub fn set_identity(&self, identity: ClientIdentity) {
        info!(client_id = %identity.client_id, client_name = %identity.client_name, "connection: identity set");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Raw transport events (connects, drops, messages).
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport.events()
    }

    // =========================================================================
    // PUBLISH / SUBSCRIBE
    // =========================================================================

    /// Resolve once the transport is connected. `false` if it shut down first.
    pub async fn wait_connected(&self) -> bool {
        let mut events = self.transport.events();
        if self.transport.is_connected() {
            return true;
        }
        debug!("connection: waiting for broker");
        loop {
            match events.recv().await {
                Ok(TransportEvent::Connected) => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if self.transport.is_connected() {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Publish `payload` on `topic`. Offline, the publish is queued and this
    /// returns immediately.
    pub async fn publish(self: &Arc<Self>, topic: &str, payload: impl Into<Vec<u8>>, options: PublishOptions) {
        let payload = payload.into();
        let payload = {
            let mut outbox = lock(&self.outbox);
            if outbox.draining || !self.transport.is_connected() {
                debug!(%topic, queued = outbox.queue.len() + 1, "connection: publish deferred");
                outbox.queue.push_back(Deferred { topic: topic.to_owned(), payload, options });
                if !outbox.draining {
                    outbox.draining = true;
                    drop(outbox);
                    self.spawn_drain();
                }
                return;
            }
            payload
        };
        self.send(topic, payload, options).await;
    }

    async fn send(&self, topic: &str, payload: Vec<u8>, options: PublishOptions) {
        match self.transport.publish(topic, payload, options).await {
            Ok(()) => debug!(%topic, retain = options.retain, "connection: published"),
            Err(e) => warn!(%topic, error = %e, "connection: publish failed"),
        }
    }

    /// Wait for a connection in the background, then drain the outbox.
    fn spawn_drain(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut events = self.transport.events();
        let ready = self.transport.is_connected();
        tokio::spawn(async move {
            if !ready {
                loop {
                    match events.recv().await {
                        Ok(TransportEvent::Connected) => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {
                            if weak.upgrade().is_some_and(|manager| manager.is_connected()) {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => {
                            if let Some(manager) = weak.upgrade() {
                                let dropped = std::mem::take(&mut *lock(&manager.outbox)).queue.len();
                                warn!(dropped, "connection: transport closed, deferred publishes dropped");
                            }
                            return;
                        }
                    }
                }
            }
            if let Some(manager) = weak.upgrade() {
                manager.drain_outbox().await;
            }
        });
    }

    async fn drain_outbox(self: &Arc<Self>) {
        loop {
            let next = {
                let mut outbox = lock(&self.outbox);
                if !self.transport.is_connected() {
                    // Dropped again mid-drain; keep `draining` and wait for the next connect.
                    drop(outbox);
                    self.spawn_drain();
                    return;
                }
                let next = outbox.queue.pop_front();
                if next.is_none() {
                    outbox.draining = false;
                }
                next
            };
            let Some(Deferred { topic, payload, options }) = next else { return };
            self.send(&topic, payload, options).await;
        }
    }

    /// Serialize `value` as JSON and publish it.
    pub async fn publish_json<T: Serialize + ?Sized>(self: &Arc<Self>, topic: &str, value: &T, options: PublishOptions) {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(topic, payload, options).await,
            Err(e) => warn!(%topic, error = %e, "connection: payload encode failed"),
        }
    }

    /// Subscribe to `filter`, deferring until connected.
    pub async fn subscribe(&self, filter: &str, qos: Qos) {
        if !self.wait_connected().await {
            warn!(%filter, "connection: transport closed, subscribe dropped");
            return;
        }
        match self.transport.subscribe(filter, qos).await {
            Ok(()) => debug!(%filter, "connection: subscribed"),
            Err(e) => warn!(%filter, error = %e, "connection: subscribe failed"),
        }
    }

    /// Run `handler` for every inbound message, in arrival order, until the
    /// transport closes or the returned task is aborted.
    pub fn on_message<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(InboundMessage) + Send + 'static,
    {
        let mut events = self.transport.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Message(message)) => handler(message),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "connection: message handler lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // =========================================================================
    // LIVENESS
    // =========================================================================

    /// Note an acknowledgement from the LED controller.
    pub fn record_ack(&self) {
        *lock(&self.last_ack) = Some(Instant::now());
    }

    /// Whether the last ack arrived less than `threshold` ago. Never alive
    /// before the first ack.
    #[must_use]
    pub fn is_device_alive(&self, threshold: Duration) -> bool {
        lock(&self.last_ack).is_some_and(|at| at.elapsed() < threshold)
    }

    // =========================================================================
    // HEARTBEAT
    // =========================================================================

    /// Start pinging on `ui/cmd` every `interval`, replacing any running
    /// heartbeat.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> HeartbeatHandle {
        let generation = {
            let mut generation = lock(&self.generation);
            *generation += 1;
            *generation
        };

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + interval, interval);
            loop {
                ticks.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.ping().await;
            }
        });

        let previous = lock(&self.heartbeat).replace(Heartbeat { generation, task: task.abort_handle() });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        debug!(interval_ms = interval.as_millis(), "connection: heartbeat started");

        HeartbeatHandle { manager: Arc::downgrade(self), generation }
    }

    /// Stop the running heartbeat, if any.
    pub fn stop_heartbeat(&self) {
        if let Some(heartbeat) = lock(&self.heartbeat).take() {
            heartbeat.task.abort();
            debug!("connection: heartbeat stopped");
        }
    }

    fn stop_generation(&self, generation: u64) {
        let mut slot = lock(&self.heartbeat);
        if slot.as_ref().is_some_and(|h| h.generation == generation) {
            if let Some(heartbeat) = slot.take() {
                heartbeat.task.abort();
            }
        }
    }

    async fn ping(&self) {
        if !self.transport.is_connected() {
            return;
        }
        let payload = json!({ "type": "ping", "ts": now_ms() });
        let topic = self.topics.ui_cmd();
        if let Err(e) = self.transport.publish(&topic, payload.to_string().into_bytes(), PublishOptions::default()).await {
            warn!(error = %e, "connection: heartbeat publish failed");
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Send a lighting directive stamped with this kiosk's identity.
    pub async fn send_command(self: &Arc<Self>, command: &LightCommand) {
        let identity = self.identity();
        let payload = command.envelope(&identity.client_id, &identity.client_name, now_ms());
        info!(kind = command.kind(), "connection: sending command");
        self.publish_json(&self.topics.ui_cmd(), &payload, PublishOptions::default()).await;
    }
}

/// Stops the heartbeat it was returned for. A handle from an earlier,
/// already replaced heartbeat does nothing.
#[derive(Debug)]
pub struct HeartbeatHandle {
    manager: Weak<ConnectionManager>,
    generation: u64,
}

impl HeartbeatHandle {
    pub fn stop(self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.stop_generation(self.generation);
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("project", &self.topics.project())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
