//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the broker's live sessions and retained topic values, plus the
//! paths of the CSV files the availability endpoints read and rewrite.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use frames::Packet;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::config::ServerConfig;

// =============================================================================
// BROKER SESSION
// =============================================================================

/// One connected websocket client.
pub struct BrokerSession {
    /// Identifier the client chose in its `Connect` packet.
    pub client_id: String,
    /// Sender for outgoing packets (live deliveries and retained replays).
    pub tx: mpsc::Sender<Packet>,
    /// Topic filters this session is subscribed to.
    pub filters: Vec<String>,
}

impl BrokerSession {
    #[must_use]
    pub fn new(client_id: String, tx: mpsc::Sender<Packet>) -> Self {
        Self { client_id, tx, filters: Vec::new() }
    }
}

// =============================================================================
// BROKER STATE
// =============================================================================

/// Broker bookkeeping: who is connected and the last retained value per topic.
pub struct BrokerState {
    /// Connected sessions keyed by server-assigned session ID.
    pub sessions: HashMap<Uuid, BrokerSession>,
    /// Retained packets keyed by concrete topic. One record per topic.
    pub retained: HashMap<String, Packet>,
}

impl BrokerState {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: HashMap::new(), retained: HashMap::new() }
    }
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<RwLock<BrokerState>>,
    pub public_dir: PathBuf,
    pub availability_csv: PathBuf,
    /// Serialises read-modify-write cycles on the availability CSV.
    pub csv_write: Arc<Mutex<()>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            broker: Arc::new(RwLock::new(BrokerState::new())),
            public_dir: config.public_dir.clone(),
            availability_csv: config.availability_csv.clone(),
            csv_write: Arc::new(Mutex::new(())),
        }
    }
}
