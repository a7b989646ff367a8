//! Shared packet model and protobuf codec for the topic broker transport.
//!
//! This crate owns the wire representation used by both `server` (the broker)
//! and `client` (the kiosk connection). Packets mirror the small subset of
//! MQTT the kiosk relies on: connect, subscribe, publish with a retain flag,
//! and keepalive pings. Payloads are opaque bytes; the kiosk puts JSON there.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;

/// Error returned by [`decode_packet`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WirePacket`.
    #[error("failed to decode protobuf packet: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `kind` integer on the wire does not map to a known [`PacketKind`].
    #[error("invalid packet kind: {0}")]
    InvalidKind(i32),
    /// The `qos` integer on the wire does not map to a known [`Qos`].
    #[error("invalid qos level: {0}")]
    InvalidQos(i32),
}

/// What a packet asks the other side to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    /// First packet a client sends after the socket opens.
    Connect,
    /// Broker acceptance of a `Connect`.
    ConnAck,
    /// Register interest in a topic filter.
    Subscribe,
    /// Broker acknowledgement of a `Subscribe`.
    SubAck,
    /// Drop interest in a topic filter.
    Unsubscribe,
    /// A message for a topic, in either direction.
    Publish,
    /// Keepalive request.
    PingReq,
    /// Keepalive response.
    PingResp,
    /// Graceful close.
    Disconnect,
}

impl PacketKind {
    /// Convert kind into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Connect => WirePacketKind::Connect as i32,
            Self::ConnAck => WirePacketKind::ConnAck as i32,
            Self::Subscribe => WirePacketKind::Subscribe as i32,
            Self::SubAck => WirePacketKind::SubAck as i32,
            Self::Unsubscribe => WirePacketKind::Unsubscribe as i32,
            Self::Publish => WirePacketKind::Publish as i32,
            Self::PingReq => WirePacketKind::PingReq as i32,
            Self::PingResp => WirePacketKind::PingResp as i32,
            Self::Disconnect => WirePacketKind::Disconnect as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WirePacketKind::try_from(value) {
            Ok(WirePacketKind::Connect) => Ok(Self::Connect),
            Ok(WirePacketKind::ConnAck) => Ok(Self::ConnAck),
            Ok(WirePacketKind::Subscribe) => Ok(Self::Subscribe),
            Ok(WirePacketKind::SubAck) => Ok(Self::SubAck),
            Ok(WirePacketKind::Unsubscribe) => Ok(Self::Unsubscribe),
            Ok(WirePacketKind::Publish) => Ok(Self::Publish),
            Ok(WirePacketKind::PingReq) => Ok(Self::PingReq),
            Ok(WirePacketKind::PingResp) => Ok(Self::PingResp),
            Ok(WirePacketKind::Disconnect) => Ok(Self::Disconnect),
            Err(_) => Err(CodecError::InvalidKind(value)),
        }
    }
}

/// Delivery quality requested by the sender.
///
/// The broker delivers everything at most once; the level is carried so the
/// kiosk can state its intent on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    /// Convert qos into its wire integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(CodecError::InvalidQos(other)),
        }
    }
}

/// A single message on the broker wire protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// What this packet asks for.
    pub kind: PacketKind,
    /// Topic (publish) or topic filter (subscribe/unsubscribe).
    pub topic: Option<String>,
    /// Opaque message body. Empty for control packets.
    pub payload: Vec<u8>,
    /// Requested delivery quality.
    pub qos: Qos,
    /// Publish: store as the topic's last value. Delivery: came from the store.
    pub retain: bool,
    /// Connect: the client's self-chosen identifier.
    pub client_id: Option<String>,
    /// Connect: broker username.
    pub username: Option<String>,
    /// Connect: broker password.
    pub password: Option<String>,
    /// Connect: keepalive period the client promises to ping within.
    pub keepalive_secs: u32,
    /// Milliseconds since the Unix epoch when the packet was created.
    pub ts: i64,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Packet {
    fn bare(kind: PacketKind) -> Self {
        Self {
            kind,
            topic: None,
            payload: Vec::new(),
            qos: Qos::AtMostOnce,
            retain: false,
            client_id: None,
            username: None,
            password: None,
            keepalive_secs: 0,
            ts: now_ms(),
        }
    }

    /// Opening packet carrying client identity and credentials.
    pub fn connect(
        client_id: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
        keepalive_secs: u32,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            username,
            password,
            keepalive_secs,
            ..Self::bare(PacketKind::Connect)
        }
    }

    #[must_use]
    pub fn conn_ack() -> Self {
        Self::bare(PacketKind::ConnAck)
    }

    pub fn subscribe(filter: impl Into<String>, qos: Qos) -> Self {
        Self { topic: Some(filter.into()), qos, ..Self::bare(PacketKind::Subscribe) }
    }

    pub fn sub_ack(filter: impl Into<String>) -> Self {
        Self { topic: Some(filter.into()), ..Self::bare(PacketKind::SubAck) }
    }

    pub fn unsubscribe(filter: impl Into<String>) -> Self {
        Self { topic: Some(filter.into()), ..Self::bare(PacketKind::Unsubscribe) }
    }

    /// A message for `topic`. Set `retain` to make it the topic's stored value.
    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: Qos, retain: bool) -> Self {
        Self {
            topic: Some(topic.into()),
            payload: payload.into(),
            qos,
            retain,
            ..Self::bare(PacketKind::Publish)
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::bare(PacketKind::PingReq)
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::bare(PacketKind::PingResp)
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Self::bare(PacketKind::Disconnect)
    }

    /// Topic as a string slice, empty when absent.
    #[must_use]
    pub fn topic_str(&self) -> &str {
        self.topic.as_deref().unwrap_or("")
    }
}

/// Encode a packet into protobuf bytes.
#[must_use]
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let wire = packet_to_wire(packet);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot run out of buffer space.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a packet.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidKind`] / [`CodecError::InvalidQos`] for out-of-range
/// enum values.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, CodecError> {
    let wire = WirePacket::decode(bytes)?;
    wire_to_packet(wire)
}

fn packet_to_wire(packet: &Packet) -> WirePacket {
    WirePacket {
        kind: packet.kind.as_i32(),
        topic: packet.topic.clone(),
        payload: packet.payload.clone(),
        qos: packet.qos.as_i32(),
        retain: packet.retain,
        client_id: packet.client_id.clone(),
        username: packet.username.clone(),
        password: packet.password.clone(),
        keepalive_secs: packet.keepalive_secs,
        ts: packet.ts,
    }
}

fn wire_to_packet(wire: WirePacket) -> Result<Packet, CodecError> {
    Ok(Packet {
        kind: PacketKind::from_i32(wire.kind)?,
        topic: wire.topic,
        payload: wire.payload,
        qos: Qos::from_i32(wire.qos)?,
        retain: wire.retain,
        client_id: wire.client_id,
        username: wire.username,
        password: wire.password,
        keepalive_secs: wire.keepalive_secs,
        ts: wire.ts,
    })
}

// =============================================================================
// TOPIC FILTERS
// =============================================================================

/// Whether `filter` is a well-formed subscription filter.
///
/// `+` must occupy a whole level; `#` must occupy the whole last level.
#[must_use]
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        other => !other.contains('+') && !other.contains('#'),
    })
}

/// Match a concrete topic against a subscription filter.
///
/// `+` matches exactly one level, a trailing `#` matches any remainder
/// including none (`a/#` matches `a`).
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct WirePacket {
    #[prost(enumeration = "WirePacketKind", tag = "1")]
    kind: i32,
    #[prost(string, optional, tag = "2")]
    topic: Option<String>,
    #[prost(bytes = "vec", tag = "3")]
    payload: Vec<u8>,
    #[prost(int32, tag = "4")]
    qos: i32,
    #[prost(bool, tag = "5")]
    retain: bool,
    #[prost(string, optional, tag = "6")]
    client_id: Option<String>,
    #[prost(string, optional, tag = "7")]
    username: Option<String>,
    #[prost(string, optional, tag = "8")]
    password: Option<String>,
    #[prost(uint32, tag = "9")]
    keepalive_secs: u32,
    #[prost(int64, tag = "10")]
    ts: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WirePacketKind {
    Connect = 0,
    ConnAck = 1,
    Subscribe = 2,
    SubAck = 3,
    Unsubscribe = 4,
    Publish = 5,
    PingReq = 6,
    PingResp = 7,
    Disconnect = 8,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
