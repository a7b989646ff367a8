//! Websocket transport for the `/mqtt` broker.
//!
//! LIFECYCLE
//! =========
//! 1. `spawn` starts a background task and returns immediately.
//! 2. The task connects (bounded by the connect timeout), sends `Connect`
//!    and waits for `ConnAck`, then emits `Connected`.
//! 3. While up it forwards queued outbound packets, emits inbound publishes
//!    as `Message` events and pings every keepalive period.
//! 4. Any failure emits `Disconnected` (or `Error` if never connected),
//!    sleeps the fixed reconnect period and starts over. Retries never stop.
//! 5. `close` (or dropping the transport) cancels the task. Queued packets
//!    are flushed and a clean `Disconnect` is sent if a session is up.
//!
//! ERROR HANDLING
//! ==============
//! The background task never returns an error. Failures are logged and
//! surfaced as events. `publish`/`subscribe` only fail fast when the
//! connection is currently down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use frames::{Packet, PacketKind, Qos, decode_packet, encode_packet};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transport::{EVENT_CAPACITY, InboundMessage, PublishOptions, Transport, TransportError, TransportEvent};
use crate::config::BrokerConfig;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound packets queued while the socket is busy.
const OUTBOUND_QUEUE: usize = 256;

/// Why a live session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

pub struct WsTransport {
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
    outbound: mpsc::Sender<Packet>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Start connecting in the background as `client_id`.
    #[must_use]
    pub fn spawn(config: BrokerConfig, client_id: impl Into<String>) -> Arc<Self> {
        let connected = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let shutdown = CancellationToken::new();

        let task = Supervisor {
            config,
            client_id: client_id.into(),
            connected: Arc::clone(&connected),
            events: events.clone(),
            outbound: outbound_rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(task.run());

        Arc::new(Self { connected, events, outbound, shutdown, task: Mutex::new(Some(task)) })
    }

    /// Flush queued packets, disconnect cleanly and stop reconnecting.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, options: PublishOptions) -> Result<(), TransportError> {
        self.enqueue(Packet::publish(topic, payload, options.qos, options.retain)).await
    }

    async fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), TransportError> {
        self.enqueue(Packet::subscribe(filter, qos)).await
    }
}

impl WsTransport {
    async fn enqueue(&self, packet: Packet) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound.send(packet).await.map_err(|_| TransportError::Closed)
    }
}

// =============================================================================
// BACKGROUND TASK
// =============================================================================

struct Supervisor {
    config: BrokerConfig,
    client_id: String,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
    outbound: mpsc::Receiver<Packet>,
    shutdown: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            let attempt = tokio::select! {
                () = self.shutdown.cancelled() => return,
                result = self.connect() => result,
            };

            match attempt {
                Ok(socket) => {
                    // Anything queued against the previous session is stale.
                    while self.outbound.try_recv().is_ok() {}
                    self.connected.store(true, Ordering::SeqCst);
                    info!(url = %self.config.url, client_id = %self.client_id, "ws transport: connected");
                    let _ = self.events.send(TransportEvent::Connected);

                    let end = self.drive(socket).await;
                    self.connected.store(false, Ordering::SeqCst);
                    let _ = self.events.send(TransportEvent::Disconnected);
                    match end {
                        SessionEnd::Shutdown => {
                            info!("ws transport: shut down");
                            return;
                        }
                        SessionEnd::Lost(reason) => warn!(%reason, "ws transport: connection lost"),
                    }
                }
                Err(e) => {
                    error!(url = %self.config.url, error = %e, "ws transport: connect failed");
                    let _ = self.events.send(TransportEvent::Error(e.to_string()));
                }
            }

            let delay = self.config.reconnect_period;
            debug!(delay_ms = delay.as_millis(), "ws transport: reconnecting");
            tokio::select! {
                () = sleep(delay) => {}
                () = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Open the socket and complete the `Connect` / `ConnAck` handshake.
    async fn connect(&self) -> Result<Socket, TransportError> {
        let handshake = async {
            let (mut socket, _) = connect_async(self.config.url.as_str()).await?;
            let keepalive_secs = u32::try_from(self.config.keepalive.as_secs()).unwrap_or(u32::MAX);
            let connect = Packet::connect(
                self.client_id.clone(),
                Some(self.config.username.clone()),
                Some(self.config.password.clone()),
                keepalive_secs,
            );
            socket.send(WsMessage::Binary(encode_packet(&connect).into())).await?;

            while let Some(msg) = socket.next().await {
                let WsMessage::Binary(bytes) = msg? else { continue };
                let packet = decode_packet(&bytes)?;
                if packet.kind == PacketKind::ConnAck {
                    return Ok(socket);
                }
                debug!(kind = ?packet.kind, "ws transport: packet before connack ignored");
            }
            Err(TransportError::Refused("socket closed before connack".into()))
        };

        timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn drive(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let period = self.config.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    while let Ok(packet) = self.outbound.try_recv() {
                        let _ = sink.send(WsMessage::Binary(encode_packet(&packet).into())).await;
                    }
                    let _ = sink.send(WsMessage::Binary(encode_packet(&Packet::disconnect()).into())).await;
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                msg = stream.next() => match msg {
                    Some(Ok(WsMessage::Binary(bytes))) => self.dispatch(&bytes),
                    Some(Ok(WsMessage::Close(_))) | None => return SessionEnd::Lost("closed by broker".into()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                },
                Some(packet) = self.outbound.recv() => {
                    if let Err(e) = sink.send(WsMessage::Binary(encode_packet(&packet).into())).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(e) = sink.send(WsMessage::Binary(encode_packet(&Packet::ping()).into())).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
            }
        }
    }

    fn dispatch(&self, bytes: &[u8]) {
        match decode_packet(bytes) {
            Ok(packet) if packet.kind == PacketKind::Publish => {
                let message = InboundMessage {
                    topic: packet.topic_str().to_owned(),
                    retained: packet.retain,
                    payload: packet.payload,
                };
                let _ = self.events.send(TransportEvent::Message(message));
            }
            Ok(packet) => debug!(kind = ?packet.kind, "ws transport: control packet"),
            Err(e) => warn!(error = %e, "ws transport: undecodable packet"),
        }
    }
}
