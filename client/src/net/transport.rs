//! Transport seam between the kiosk and a publish/subscribe broker.
//!
//! DESIGN
//! ======
//! A transport owns exactly one broker connection and reports everything
//! that happens to it as a `TransportEvent` on a broadcast channel. Callers
//! that need to react to connects, drops or inbound messages take their own
//! receiver from `events()`; nothing is delivered through callbacks.

use async_trait::async_trait;
use frames::Qos;
use tokio::sync::broadcast;

/// Capacity of each transport's event channel.
pub const EVENT_CAPACITY: usize = 256;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Replayed retained value rather than a live publish.
    pub retained: bool,
}

impl InboundMessage {
    /// Payload as UTF-8 text, lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
    Error(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: Qos,
    pub retain: bool,
}

impl PublishOptions {
    /// At-most-once, stored by the broker as the topic's last value.
    pub const RETAINED: Self = Self { qos: Qos::AtMostOnce, retain: true };
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("transport closed")]
    Closed,
    #[error("connect timed out")]
    Timeout,
    #[error("broker refused session: {0}")]
    Refused(String),
    #[error("websocket error: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("packet codec error: {0}")]
    Codec(#[from] frames::CodecError),
    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(value))
    }
}

/// A broker connection.
#[async_trait]
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fresh receiver for connection and message events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// # Errors
    ///
    /// Fails when the connection is down or the send fails.
    async fn publish(&self, topic: &str, payload: Vec<u8>, options: PublishOptions) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Fails when the connection is down or the send fails.
    async fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), TransportError>;
}
