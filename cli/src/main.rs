use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use client::api::{AdminEditor, ApiError, AvailabilityApi};
use client::availability::RoomStatus;
use client::cast::{CastCoordinator, CastError, CastItem, CastKind, CastMetadata, CastPhase, CastState};
use client::catalog::CatalogLoader;
use client::commands::{LightCommand, Relay};
use client::config::{
    BrokerConfig, DEFAULT_API_URL, DEFAULT_MQTT_PASS, DEFAULT_MQTT_URL, DEFAULT_MQTT_USER, DEFAULT_PROJECT,
};
use client::kiosk::{CastPolicy, Kiosk, KioskOptions};
use client::layout::{floor_label, room_number};
use client::net::{
    ClientIdentity, ConnectionManager, MemoryHub, MemoryTransport, Topics, Transport, TransportEvent, WsTransport,
};
use client::session::{self, AuthError, FileStore, Role, Session, StorageError};
use client::store::Store;
use frames::Qos;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for the retained `cast/state` after subscribing.
const RETAINED_WAIT: Duration = Duration::from_millis(750);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("timed out waiting for the broker")]
    Timeout,
    #[error("not logged in as admin; run `towerdeck login admin <password>`")]
    NotAdmin,
    #[error("unknown amenity `{0}`")]
    UnknownAmenity(String),
    #[error("--data must be a JSON object")]
    NotAnObject,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("session storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("availability API failed: {0}")]
    Api(#[from] ApiError),
    #[error("cast failed: {0}")]
    Cast(#[from] CastError),
}

#[derive(Parser, Debug)]
#[command(name = "towerdeck", about = "Sales kiosk lighting, casting and availability CLI")]
struct Cli {
    #[arg(long, env = "TOWERDECK_MQTT_URL", default_value = DEFAULT_MQTT_URL)]
    mqtt_url: String,

    #[arg(long, env = "TOWERDECK_MQTT_USER", default_value = DEFAULT_MQTT_USER)]
    mqtt_user: String,

    #[arg(long, env = "TOWERDECK_MQTT_PASS", default_value = DEFAULT_MQTT_PASS, hide_env_values = true)]
    mqtt_pass: String,

    #[arg(long, env = "TOWERDECK_MQTT_PROJECT", default_value = DEFAULT_PROJECT)]
    project: String,

    #[arg(long, env = "TOWERDECK_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[arg(long, env = "TOWERDECK_SESSION_FILE", default_value = ".towerdeck/session.json")]
    session_file: PathBuf,

    #[arg(long, default_value_t = 10, help = "Seconds to wait for the broker before giving up")]
    timeout_secs: u64,

    #[arg(long, global = true, help = "Use an in-process broker instead of the network")]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    broker: BrokerConfig,
    api_url: String,
    session_file: PathBuf,
    timeout: Duration,
    offline: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a kiosk until Ctrl-C, logging connection, liveness and cast changes.
    Watch {
        #[arg(long, value_enum, default_value = "follow")]
        policy: PolicyArg,
    },
    /// Whole-building lighting presets.
    Lights {
        #[arg(value_enum)]
        preset: LightPreset,
    },
    /// Toggle a relay-driven light group.
    Relay {
        #[arg(value_enum)]
        relay: RelayArg,
    },
    /// Light an amenity's LED strip, or `reset` the amenity floor.
    Amenity { id: String },
    /// Send an arbitrary lighting command.
    Send {
        kind: String,
        #[arg(long, help = "JSON object merged into the command")]
        data: Option<String>,
    },
    /// Claim the TV and show one image.
    Cast {
        image: String,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Give the TV back if this kiosk holds it.
    Release,
    /// Claim the TV and show each image in turn. Ctrl-C stops early.
    Cycle {
        #[arg(required = true)]
        images: Vec<String>,
        #[arg(long, default_value_t = 5)]
        dwell_secs: u64,
    },
    Availability(AvailabilityCommand),
    /// Sign in and persist the session.
    Login { username: String, password: String },
    /// Clear the persisted session.
    Logout,
}

#[derive(Args, Debug)]
struct AvailabilityCommand {
    #[command(subcommand)]
    command: AvailabilitySubcommand,
}

#[derive(Subcommand, Debug)]
enum AvailabilitySubcommand {
    /// Print unit statuses.
    Show {
        #[arg(long)]
        floor: Option<u32>,
    },
    /// Change one unit's status (admin only).
    Set {
        #[arg(long)]
        floor: u32,
        #[arg(long, help = "Room number as shown on the floor map (1-6)")]
        room: u32,
        #[arg(long, help = "sold, available, blocked or 0-2")]
        status: RoomStatus,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PolicyArg {
    Follow,
    AutoCycle,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LightPreset {
    All,
    Off,
    Classic,
    Available,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RelayArg {
    Surrounding,
    Terrace,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
    Floor,
    Room,
    View,
    Amenity,
}

impl From<PolicyArg> for CastPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Follow => Self::Follow,
            PolicyArg::AutoCycle => Self::AutoCycle,
        }
    }
}

impl From<RelayArg> for Relay {
    fn from(value: RelayArg) -> Self {
        match value {
            RelayArg::Surrounding => Self::Surrounding,
            RelayArg::Terrace => Self::Terrace,
        }
    }
}

impl From<KindArg> for CastKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Floor => Self::Floor,
            KindArg::Room => Self::Room,
            KindArg::View => Self::View,
            KindArg::Amenity => Self::Amenity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    // A missing .env file is normal; flags and defaults cover everything.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = CliContext {
        broker: BrokerConfig {
            url: cli.mqtt_url,
            username: cli.mqtt_user,
            password: cli.mqtt_pass,
            project: cli.project,
            ..BrokerConfig::default()
        },
        api_url: cli.api_url.trim_end_matches('/').to_owned(),
        session_file: cli.session_file,
        timeout: Duration::from_secs(cli.timeout_secs),
        offline: cli.offline,
    };

    match cli.command {
        Command::Watch { policy } => run_watch(&ctx, policy.into()).await,
        Command::Lights { preset } => run_lights(&ctx, preset).await,
        Command::Relay { relay } => run_relay(&ctx, relay.into()).await,
        Command::Amenity { id } => run_amenity(&ctx, &id).await,
        Command::Send { kind, data } => run_send(&ctx, kind, data.as_deref()).await,
        Command::Cast { image, kind } => run_cast(&ctx, &image, kind.map(CastKind::from)).await,
        Command::Release => run_release(&ctx).await,
        Command::Cycle { images, dwell_secs } => run_cycle(&ctx, &images, Duration::from_secs(dwell_secs)).await,
        Command::Availability(availability) => run_availability(&ctx, availability).await,
        Command::Login { username, password } => run_login(&ctx, &username, &password),
        Command::Logout => run_logout(&ctx),
    }
}

// =============================================================================
// BROKER LINK
// =============================================================================

/// A connection manager plus whatever has to be shut down with it.
struct Link {
    connection: Arc<ConnectionManager>,
    ws: Option<Arc<WsTransport>>,
}

impl Link {
    fn open(ctx: &CliContext, identity: ClientIdentity) -> Self {
        let topics = Topics::new(ctx.broker.project.clone());
        if ctx.offline {
            let transport: Arc<dyn Transport> = MemoryTransport::connected(&MemoryHub::new());
            info!("cli: using in-process broker");
            return Self { connection: ConnectionManager::new(transport, topics, identity), ws: None };
        }

        let ws = WsTransport::spawn(ctx.broker.clone(), identity.client_id.clone());
        let transport: Arc<dyn Transport> = ws.clone();
        Self { connection: ConnectionManager::new(transport, topics, identity), ws: Some(ws) }
    }

    /// Flush queued publishes and disconnect.
    async fn close(self) {
        if let Some(ws) = self.ws {
            ws.close().await;
        }
    }
}

fn open_store(ctx: &CliContext) -> Result<FileStore, CliError> {
    Ok(FileStore::open(&ctx.session_file)?)
}

/// The logged-in salesperson, or an anonymous kiosk identity.
fn identity(store: &FileStore) -> Result<ClientIdentity, CliError> {
    match Session::restore(store) {
        Some(session) => Ok(session.identity()),
        None => Ok(session::ensure_identity(store)?),
    }
}

async fn open_link(ctx: &CliContext) -> Result<Link, CliError> {
    let store = open_store(ctx)?;
    Ok(Link::open(ctx, identity(&store)?))
}

/// Open a link and wait for the broker. Publishes made offline are only
/// queued, so one-shot commands must not start before this.
async fn connected_link(ctx: &CliContext) -> Result<Link, CliError> {
    let link = open_link(ctx).await?;
    match within(ctx, link.connection.wait_connected()).await {
        Ok(true) => Ok(link),
        Ok(false) | Err(_) => {
            link.close().await;
            Err(CliError::Timeout)
        }
    }
}

/// Bound a broker operation so an unreachable broker fails instead of hanging.
async fn within<T>(ctx: &CliContext, fut: impl Future<Output = T>) -> Result<T, CliError> {
    tokio::time::timeout(ctx.timeout, fut).await.map_err(|_| CliError::Timeout)
}

// =============================================================================
// KIOSK
// =============================================================================

async fn run_watch(ctx: &CliContext, policy: CastPolicy) -> Result<(), CliError> {
    let link = open_link(ctx).await?;
    let kiosk = Kiosk::new(Arc::clone(&link.connection), KioskOptions { policy, ..KioskOptions::default() });

    if !ctx.offline {
        kiosk.set_catalog(CatalogLoader::new(ctx.api_url.clone()).load().await);
    }
    let tasks = kiosk.start();
    info!(client_id = %link.connection.identity().client_id, "cli: watching, Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cli: ctrl-c handler failed");
    }
    drop(tasks);

    let summary = {
        let store = kiosk.store();
        json!({
            "connected": store.connected(),
            "device_alive": store.device_alive(),
            "casting": store.cast().is_casting,
            "cast_holder": store.cast().holder_name,
        })
    };
    link.close().await;
    print_json(&summary)
}

async fn run_lights(ctx: &CliContext, preset: LightPreset) -> Result<(), CliError> {
    let link = connected_link(ctx).await?;
    let kiosk = Kiosk::new(Arc::clone(&link.connection), KioskOptions::default());
    within(ctx, async {
        match preset {
            LightPreset::All => kiosk.all_lights().await,
            LightPreset::Off => kiosk.all_off().await,
            LightPreset::Classic => kiosk.classic().await,
            LightPreset::Available => kiosk.show_available().await,
        }
    })
    .await?;
    link.close().await;
    println!("sent");
    Ok(())
}

async fn run_relay(ctx: &CliContext, relay: Relay) -> Result<(), CliError> {
    let link = connected_link(ctx).await?;
    let kiosk = Kiosk::new(Arc::clone(&link.connection), KioskOptions::default());
    within(ctx, kiosk.toggle_relay(relay)).await?;
    link.close().await;
    println!("toggled {}", relay.as_str());
    Ok(())
}

async fn run_amenity(ctx: &CliContext, id: &str) -> Result<(), CliError> {
    let link = connected_link(ctx).await?;
    let kiosk = Kiosk::new(Arc::clone(&link.connection), KioskOptions::default());

    let result = if id == "reset" {
        within(ctx, kiosk.reset_amenities()).await.map(|()| true)
    } else {
        within(ctx, kiosk.select_amenity(id)).await
    };
    link.close().await;

    if !result? {
        return Err(CliError::UnknownAmenity(id.to_owned()));
    }
    println!("sent");
    Ok(())
}

async fn run_send(ctx: &CliContext, kind: String, data: Option<&str>) -> Result<(), CliError> {
    let command = raw_command(kind, data)?;
    let link = connected_link(ctx).await?;
    within(ctx, link.connection.send_command(&command)).await?;
    link.close().await;
    println!("sent");
    Ok(())
}

fn raw_command(kind: String, data: Option<&str>) -> Result<LightCommand, CliError> {
    let data = match data {
        None => Map::new(),
        Some(text) => match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => map,
            _ => return Err(CliError::NotAnObject),
        },
    };
    Ok(LightCommand::Raw { kind, data })
}

// =============================================================================
// CAST
// =============================================================================

async fn run_cast(ctx: &CliContext, image: &str, kind: Option<CastKind>) -> Result<(), CliError> {
    let link = connected_link(ctx).await?;
    let cast = CastCoordinator::new(Arc::clone(&link.connection));

    let result = async {
        sync_cast_state(ctx, &link, &cast).await?;
        within(ctx, cast.request(&cast_item(image, kind))).await??;
        Ok::<_, CliError>(())
    }
    .await;
    link.close().await;
    result?;

    println!("casting {image}");
    Ok(())
}

async fn run_release(ctx: &CliContext) -> Result<(), CliError> {
    let link = connected_link(ctx).await?;
    let cast = CastCoordinator::new(Arc::clone(&link.connection));

    let result = async {
        sync_cast_state(ctx, &link, &cast).await?;
        within(ctx, cast.release()).await
    }
    .await;
    link.close().await;

    if result? {
        println!("released");
    } else {
        match cast.holder() {
            Some(holder) if cast.phase() == CastPhase::Blocked => println!("not holding; TV is held by {}", holder.name),
            _ => println!("not holding"),
        }
    }
    Ok(())
}

async fn run_cycle(ctx: &CliContext, images: &[String], dwell: Duration) -> Result<(), CliError> {
    let items: Vec<CastItem> = images.iter().map(|image| cast_item(image, None)).collect();
    let link = connected_link(ctx).await?;
    let cast = CastCoordinator::new(Arc::clone(&link.connection));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = async {
        sync_cast_state(ctx, &link, &cast).await?;
        // Only the claim is bounded; the cycle itself runs until done or cancelled.
        Ok::<_, CliError>(cast.auto_cycle(&items, dwell, cancel).await?)
    }
    .await;
    link.close().await;

    let published = result?;
    print_json(&json!({ "published": published, "total": items.len() }))
}

/// Subscribe to `cast/state` and apply the retained record, if any, so a
/// one-shot command knows whether another kiosk holds the TV.
async fn sync_cast_state(ctx: &CliContext, link: &Link, cast: &CastCoordinator) -> Result<(), CliError> {
    let topic = link.connection.topics().cast_state();
    let mut events = link.connection.events();
    within(ctx, link.connection.subscribe(&topic, Qos::AtMostOnce)).await?;

    let retained = async {
        loop {
            match events.recv().await {
                Ok(TransportEvent::Message(message)) if message.topic == topic => return Some(message),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    };

    // No retained record within the wait means nobody has cast yet.
    if let Ok(Some(message)) = tokio::time::timeout(RETAINED_WAIT, retained).await {
        match CastState::from_payload(&message.payload) {
            Ok(record) => {
                cast.observe(&record);
            }
            Err(e) => warn!(error = %e, "cli: unreadable cast state ignored"),
        }
    }
    Ok(())
}

/// Build a cast item, inferring the kind from the asset folder when not given.
fn cast_item(image: &str, kind: Option<CastKind>) -> CastItem {
    let kind = kind.unwrap_or_else(|| {
        let path = image.trim_start_matches('/');
        if path.starts_with("floors/") {
            CastKind::Floor
        } else if path.starts_with("rooms/") {
            CastKind::Room
        } else if path.starts_with("amenities/") {
            CastKind::Amenity
        } else {
            CastKind::View
        }
    });
    CastItem { image_src: image.to_owned(), metadata: CastMetadata::new(kind) }
}

// =============================================================================
// AVAILABILITY
// =============================================================================

async fn run_availability(ctx: &CliContext, availability: AvailabilityCommand) -> Result<(), CliError> {
    match availability.command {
        AvailabilitySubcommand::Show { floor } => {
            let catalog = CatalogLoader::new(ctx.api_url.clone()).load().await;
            let rows: Vec<Value> = catalog
                .availability
                .iter()
                .filter(|(f, _, _)| floor.is_none_or(|wanted| wanted == *f))
                .map(|(f, room, status)| availability_row(f, room, status))
                .collect();
            print_json(&Value::Array(rows))
        }
        AvailabilitySubcommand::Set { floor, room, status } => {
            let store = open_store(ctx)?;
            if Session::restore(&store).map(|s| s.role) != Some(Role::Admin) {
                return Err(CliError::NotAdmin);
            }

            let editor = AdminEditor::new(AvailabilityApi::new(ctx.api_url.clone()));
            let local = Mutex::new(Store::default());
            let response = editor.set_status(&local, floor, room, status).await?;
            let mut row = availability_row(floor, room, status);
            row["message"] = json!(response.message);
            print_json(&row)
        }
    }
}

fn availability_row(floor: u32, room: u32, status: RoomStatus) -> Value {
    json!({
        "floor": floor_label(floor),
        "room": room,
        "unit": room_number(floor, room),
        "status": status.label(),
        "color": status.color(),
    })
}

// =============================================================================
// SESSION
// =============================================================================

fn run_login(ctx: &CliContext, username: &str, password: &str) -> Result<(), CliError> {
    let store = open_store(ctx)?;
    let session = Session::login(&store, username, password)?;
    print_json(&json!({
        "client_id": session.client_id,
        "name": session.display_name,
        "role": session.role.as_str(),
    }))
}

fn run_logout(ctx: &CliContext) -> Result<(), CliError> {
    let store = open_store(ctx)?;
    Session::logout(&store)?;
    println!("logged out");
    Ok(())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
