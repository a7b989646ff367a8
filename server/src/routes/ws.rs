//! WebSocket handler — broker session relay.
//!
//! DESIGN
//! ======
//! On upgrade, waits for the client's `Connect` packet, registers a broker
//! session, answers `ConnAck`, then enters a `select!` loop:
//! - Incoming client packets → decode + dispatch by packet kind
//! - Deliveries queued by the broker → forward to client
//!
//! Dispatch is pure with respect to the socket: it mutates broker state and
//! returns the packets owed to the sender, so tests can drive it directly.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → client sends `Connect` (within the connect timeout)
//! 2. Register session → send `ConnAck`
//! 3. Subscribe / Publish / PingReq until `Disconnect` or socket close
//! 4. Unregister session (retained values outlive it)

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{Packet, PacketKind, decode_packet, encode_packet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::broker;
use crate::state::AppState;

/// How long a fresh socket may stay silent before sending `Connect`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth per session.
const SESSION_QUEUE: usize = 256;

/// What the relay loop should do after one inbound packet.
#[derive(Debug)]
enum Flow {
    /// Send these packets to the sender and keep going.
    Continue(Vec<Packet>),
    /// Client asked to disconnect.
    Close,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let Some(connect) = await_connect(&mut socket).await else {
        debug!("ws: socket closed before connect");
        return;
    };

    let session_id = Uuid::new_v4();
    let client_id = connect.client_id.unwrap_or_else(|| session_id.to_string());
    info!(
        %session_id,
        %client_id,
        username = connect.username.as_deref().unwrap_or("-"),
        keepalive_secs = connect.keepalive_secs,
        "ws: client connected"
    );

    let (tx, mut rx) = mpsc::channel::<Packet>(SESSION_QUEUE);
    broker::register(&state, session_id, client_id, tx).await;

    if send_packet(&mut socket, &Packet::conn_ack()).await.is_err() {
        broker::unregister(&state, session_id).await;
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => match process_inbound(&state, session_id, &bytes).await {
                        Flow::Continue(replies) => {
                            let mut failed = false;
                            for packet in &replies {
                                if send_packet(&mut socket, packet).await.is_err() {
                                    failed = true;
                                    break;
                                }
                            }
                            if failed {
                                break;
                            }
                        }
                        Flow::Close => break,
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(packet) = rx.recv() => {
                if send_packet(&mut socket, &packet).await.is_err() {
                    break;
                }
            }
        }
    }

    broker::unregister(&state, session_id).await;
    info!(%session_id, "ws: client disconnected");
}

/// Read until the first `Connect` packet, or give up on timeout/close.
async fn await_connect(socket: &mut WebSocket) -> Option<Packet> {
    let wait = async {
        while let Some(Ok(msg)) = socket.recv().await {
            let Message::Binary(bytes) = msg else { continue };
            match decode_packet(&bytes) {
                Ok(packet) if packet.kind == PacketKind::Connect => return Some(packet),
                Ok(packet) => warn!(kind = ?packet.kind, "ws: packet before connect ignored"),
                Err(e) => warn!(error = %e, "ws: invalid packet before connect"),
            }
        }
        None
    };

    tokio::time::timeout(CONNECT_TIMEOUT, wait).await.ok().flatten()
}

// =============================================================================
// PACKET DISPATCH
// =============================================================================

/// Decode and apply one inbound packet; return what the sender is owed.
async fn process_inbound(state: &AppState, session_id: Uuid, bytes: &[u8]) -> Flow {
    let packet = match decode_packet(bytes) {
        Ok(p) => p,
        Err(e) => {
            warn!(%session_id, error = %e, "ws: invalid inbound packet");
            return Flow::Continue(Vec::new());
        }
    };

    match packet.kind {
        PacketKind::Publish => {
            let topic = packet.topic_str().to_owned();
            if let Err(e) = broker::publish(state, packet).await {
                warn!(%session_id, %topic, error = %e, "ws: publish rejected");
            }
            Flow::Continue(Vec::new())
        }
        PacketKind::Subscribe => {
            let filter = packet.topic_str().to_owned();
            match broker::subscribe(state, session_id, &filter).await {
                Ok(_) => Flow::Continue(vec![Packet::sub_ack(filter)]),
                Err(e) => {
                    warn!(%session_id, %filter, error = %e, "ws: subscribe rejected");
                    Flow::Continue(Vec::new())
                }
            }
        }
        PacketKind::Unsubscribe => {
            broker::unsubscribe(state, session_id, packet.topic_str()).await;
            Flow::Continue(Vec::new())
        }
        PacketKind::PingReq => Flow::Continue(vec![Packet::pong()]),
        PacketKind::Disconnect => Flow::Close,
        PacketKind::Connect | PacketKind::ConnAck | PacketKind::SubAck | PacketKind::PingResp => {
            debug!(%session_id, kind = ?packet.kind, "ws: unexpected packet ignored");
            Flow::Continue(Vec::new())
        }
    }
}

async fn send_packet(socket: &mut WebSocket, packet: &Packet) -> Result<(), axum::Error> {
    socket.send(Message::Binary(encode_packet(packet).into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
