//! In-process broker: a `MemoryHub` shared by any number of
//! `MemoryTransport`s.
//!
//! DESIGN
//! ======
//! The hub mirrors the server broker's rules so client logic can be tested
//! without sockets: wildcard filters, one delivery per subscriber, retained
//! last values replayed on subscribe, empty retained payload clears.
//!
//! Each transport can be switched offline. Going offline drops its
//! subscriptions (clean session) and it stops receiving deliveries, so a
//! kiosk has to resubscribe after `Connected` exactly as it would against the
//! real broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use frames::{Qos, topic_matches, valid_filter};
use tokio::sync::broadcast;
use tracing::debug;

use super::transport::{EVENT_CAPACITY, InboundMessage, PublishOptions, Transport, TransportError, TransportEvent};

// =============================================================================
// HUB
// =============================================================================

struct Peer {
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
    filters: Vec<String>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    peers: HashMap<u64, Peer>,
    retained: HashMap<String, Vec<u8>>,
}

/// Shared loopback broker.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current retained payload for `topic`.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.lock().retained.get(topic).cloned()
    }

    fn attach(&self, connected: Arc<AtomicBool>, events: broadcast::Sender<TransportEvent>) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.peers.insert(id, Peer { connected, events, filters: Vec::new() });
        id
    }

    fn detach(&self, id: u64) {
        self.lock().peers.remove(&id);
    }

    fn clear_filters(&self, id: u64) {
        if let Some(peer) = self.lock().peers.get_mut(&id) {
            peer.filters.clear();
        }
    }

    fn subscribe(&self, id: u64, filter: &str) {
        let mut inner = self.lock();
        let replay: Vec<InboundMessage> = inner
            .retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter, topic))
            .map(|(topic, payload)| InboundMessage { topic: topic.clone(), payload: payload.clone(), retained: true })
            .collect();

        let Some(peer) = inner.peers.get_mut(&id) else { return };
        if !peer.filters.iter().any(|f| f == filter) {
            peer.filters.push(filter.to_owned());
        }
        for message in replay {
            let _ = peer.events.send(TransportEvent::Message(message));
        }
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> usize {
        let mut inner = self.lock();
        if retain {
            if payload.is_empty() {
                inner.retained.remove(topic);
            } else {
                inner.retained.insert(topic.to_owned(), payload.clone());
            }
        }

        let mut delivered = 0;
        for peer in inner.peers.values() {
            if !peer.connected.load(Ordering::SeqCst) || !peer.filters.iter().any(|f| topic_matches(f, topic)) {
                continue;
            }
            let message = InboundMessage { topic: topic.to_owned(), payload: payload.clone(), retained: false };
            let _ = peer.events.send(TransportEvent::Message(message));
            delivered += 1;
        }
        debug!(%topic, delivered, "memory hub: published");
        delivered
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// One client attached to a `MemoryHub`.
pub struct MemoryTransport {
    hub: MemoryHub,
    id: u64,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryTransport {
    /// Attach an already connected client.
    #[must_use]
    pub fn connected(hub: &MemoryHub) -> Arc<Self> {
        Self::attach(hub, true)
    }

    /// Attach a client that stays offline until `set_connected(true)`.
    #[must_use]
    pub fn disconnected(hub: &MemoryHub) -> Arc<Self> {
        Self::attach(hub, false)
    }

    fn attach(hub: &MemoryHub, connected: bool) -> Arc<Self> {
        let connected = Arc::new(AtomicBool::new(connected));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let id = hub.attach(Arc::clone(&connected), events.clone());
        Arc::new(Self { hub: hub.clone(), id, connected, events })
    }

    /// Flip the connection, emitting `Connected` / `Disconnected` on change.
    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        if connected {
            let _ = self.events.send(TransportEvent::Connected);
        } else {
            self.hub.clear_filters(self.id);
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, options: PublishOptions) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.hub.publish(topic, payload, options.retain);
        Ok(())
    }

    async fn subscribe(&self, filter: &str, _qos: Qos) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if !valid_filter(filter) {
            return Err(TransportError::Refused(format!("invalid filter {filter}")));
        }
        self.hub.subscribe(self.id, filter);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
