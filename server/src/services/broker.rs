//! Broker service — topic fan-out with retained last values.
//!
//! DESIGN
//! ======
//! Sessions register an outbound channel when their websocket connects.
//! Publishing fans the packet out to every session with a matching filter,
//! at most once per session. A publish flagged `retain` also replaces the
//! topic's stored value (an empty retained payload clears it), and every new
//! subscription is immediately replayed the stored values it matches.
//!
//! The kiosk's cast lock is nothing more than the retained value of its
//! `cast/state` topic: whoever published last holds it. The broker does not
//! arbitrate between concurrent publishers.
//!
//! ERROR HANDLING
//! ==============
//! Delivery is at-most-once. A full session queue drops the packet with a
//! warning; a closed queue is ignored (the websocket task is unregistering).

use frames::{Packet, PacketKind, topic_matches, valid_filter};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, BrokerSession};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),
    #[error("invalid publish topic: {0}")]
    InvalidTopic(String),
    #[error("unknown session: {0}")]
    UnknownSession(Uuid),
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Register a connected session.
pub async fn register(state: &AppState, session_id: Uuid, client_id: String, tx: mpsc::Sender<Packet>) {
    let mut broker = state.broker.write().await;
    info!(%session_id, %client_id, sessions = broker.sessions.len() + 1, "broker: session registered");
    broker.sessions.insert(session_id, BrokerSession::new(client_id, tx));
}

/// Drop a session and all of its subscriptions. Retained values are kept.
pub async fn unregister(state: &AppState, session_id: Uuid) {
    let mut broker = state.broker.write().await;
    if let Some(session) = broker.sessions.remove(&session_id) {
        info!(%session_id, client_id = %session.client_id, "broker: session unregistered");
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Add `filter` to a session and replay matching retained values to it.
///
/// Returns the number of retained packets replayed.
///
/// # Errors
///
/// Returns an error for malformed filters or unknown sessions.
pub async fn subscribe(state: &AppState, session_id: Uuid, filter: &str) -> Result<usize, BrokerError> {
    if !valid_filter(filter) {
        return Err(BrokerError::InvalidFilter(filter.to_owned()));
    }

    let mut broker = state.broker.write().await;

    let replay: Vec<Packet> = broker
        .retained
        .iter()
        .filter(|(topic, _)| topic_matches(filter, topic))
        .map(|(_, packet)| {
            let mut packet = packet.clone();
            packet.retain = true;
            packet
        })
        .collect();

    let session = broker
        .sessions
        .get_mut(&session_id)
        .ok_or(BrokerError::UnknownSession(session_id))?;

    if !session.filters.iter().any(|f| f == filter) {
        session.filters.push(filter.to_owned());
    }
    debug!(%session_id, %filter, retained = replay.len(), "broker: subscribed");

    for packet in &replay {
        deliver(&session.tx, packet, session_id);
    }
    Ok(replay.len())
}

/// Remove `filter` from a session. Unknown filters are ignored.
pub async fn unsubscribe(state: &AppState, session_id: Uuid, filter: &str) {
    let mut broker = state.broker.write().await;
    if let Some(session) = broker.sessions.get_mut(&session_id) {
        session.filters.retain(|f| f != filter);
    }
}

// =============================================================================
// PUBLISH
// =============================================================================

/// Store (if retained) and fan out one publish packet.
///
/// Returns the number of sessions the packet was handed to.
///
/// # Errors
///
/// Returns an error if the packet has no topic or its topic contains
/// wildcard characters.
pub async fn publish(state: &AppState, packet: Packet) -> Result<usize, BrokerError> {
    let topic = packet.topic_str().to_owned();
    if packet.kind != PacketKind::Publish || topic.is_empty() || topic.contains(['+', '#']) {
        return Err(BrokerError::InvalidTopic(topic));
    }

    let mut broker = state.broker.write().await;

    if packet.retain {
        if packet.payload.is_empty() {
            broker.retained.remove(&topic);
        } else {
            broker.retained.insert(topic.clone(), packet.clone());
        }
    }

    // Live deliveries are never flagged as retained.
    let mut live = packet;
    live.retain = false;

    let mut delivered = 0;
    for (session_id, session) in &broker.sessions {
        if session.filters.iter().any(|f| topic_matches(f, &topic)) {
            deliver(&session.tx, &live, *session_id);
            delivered += 1;
        }
    }
    debug!(%topic, delivered, "broker: published");
    Ok(delivered)
}

/// Current retained value for a topic, if any.
#[cfg(test)]
pub async fn retained(state: &AppState, topic: &str) -> Option<Packet> {
    state.broker.read().await.retained.get(topic).cloned()
}

fn deliver(tx: &mpsc::Sender<Packet>, packet: &Packet, session_id: Uuid) {
    match tx.try_send(packet.clone()) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => {
            warn!(%session_id, topic = %packet.topic_str(), "broker: session queue full, dropping packet");
        }
    }
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod tests;
