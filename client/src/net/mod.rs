//! Broker networking.
//!
//! SYSTEM CONTEXT
//! ==============
//! `transport` defines the seam every broker client implements,
//! `ws_transport` talks to the `/mqtt` websocket broker, `memory` is an
//! in-process hub for tests and offline use, and `connection` layers the
//! kiosk's publish/heartbeat/liveness behaviour on top of any transport.

pub mod connection;
pub mod memory;
pub mod topics;
pub mod transport;
pub mod ws_transport;

pub use connection::{ClientIdentity, ConnectionManager, HeartbeatHandle};
pub use memory::{MemoryHub, MemoryTransport};
pub use topics::Topics;
pub use transport::{InboundMessage, PublishOptions, Transport, TransportError, TransportEvent};
pub use ws_transport::WsTransport;
