use frames::Qos;
use serde_json::json;

use super::*;
use crate::availability::AvailabilityIndex;
use crate::layout::LayoutIndex;
use crate::net::{ClientIdentity, MemoryHub, MemoryTransport, PublishOptions, Topics, Transport};

const LAYOUT: &str = "floor,image,room,room o,view,points\n\
6,12,604,4,\"N1,W1\",0 0\n\
6,12,605,5,E1,0 0\n";

const CAST_TOPIC: &str = "platinum/cast/state";

fn kiosk(hub: &MemoryHub, id: &str, name: &str, policy: CastPolicy) -> (Arc<Kiosk>, Arc<MemoryTransport>) {
    let transport = MemoryTransport::connected(hub);
    let connection =
        ConnectionManager::new(transport.clone(), Topics::new("platinum"), ClientIdentity::new(id, name));
    let kiosk = Kiosk::new(connection, KioskOptions { policy, ..KioskOptions::default() });
    kiosk.set_catalog(Catalog { layout: LayoutIndex::parse(LAYOUT), availability: AvailabilityIndex::default() });
    (kiosk, transport)
}

fn retained(hub: &MemoryHub) -> CastState {
    CastState::from_payload(&hub.retained(CAST_TOPIC).expect("retained")).expect("parse")
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Connection wiring
// =============================================================================

#[tokio::test]
async fn ack_marks_device_alive_after_connect() {
    let hub = MemoryHub::new();
    let (kiosk, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let _tasks = kiosk.start();
    settle().await;
    assert!(kiosk.store().connected());
    assert!(!kiosk.store().device_alive());

    let device = MemoryTransport::connected(&hub);
    device.publish("platinum/ui/ack", b"{}".to_vec(), PublishOptions::default()).await.expect("ack");
    settle().await;

    assert!(kiosk.store().device_alive());
}

#[tokio::test]
async fn reconnect_resubscribes_and_disconnect_clears_flags() {
    let hub = MemoryHub::new();
    let (kiosk, transport) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let _tasks = kiosk.start();
    settle().await;

    transport.set_connected(false);
    settle().await;
    assert!(!kiosk.store().connected());
    assert!(!kiosk.store().device_alive());

    transport.set_connected(true);
    settle().await;
    assert!(kiosk.store().connected());

    let relays = MemoryTransport::connected(&hub);
    relays
        .publish("platinum/relay/state", br#"{"terrace":true}"#.to_vec(), PublishOptions::default())
        .await
        .expect("relay");
    settle().await;
    assert!(kiosk.store().relays().terrace, "subscriptions restored after reconnect");
}

#[tokio::test(start_paused = true)]
async fn device_goes_stale_without_acks() {
    let hub = MemoryHub::new();
    let (kiosk, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let _tasks = kiosk.start();
    settle().await;

    let device = MemoryTransport::connected(&hub);
    device.publish("platinum/ui/ack", b"{}".to_vec(), PublishOptions::default()).await.expect("ack");
    settle().await;
    assert!(kiosk.store().device_alive());

    tokio::time::sleep(Duration::from_secs(13)).await;
    assert!(!kiosk.store().device_alive());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_runs_while_connected() {
    let hub = MemoryHub::new();
    let device = MemoryTransport::connected(&hub);
    let mut rx = device.events();
    device.subscribe("platinum/ui/cmd", Qos::AtMostOnce).await.expect("subscribe");

    let (kiosk, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let _tasks = kiosk.start();
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    let ping = std::iter::from_fn(|| rx.try_recv().ok()).find_map(|e| match e {
        TransportEvent::Message(m) => serde_json::from_slice::<serde_json::Value>(&m.payload).ok(),
        _ => None,
    });
    assert_eq!(ping.map(|p| p["type"].clone()), Some(json!("ping")));
}

// =============================================================================
// Casting
// =============================================================================

#[tokio::test]
async fn nothing_selected_means_nothing_to_cast() {
    let hub = MemoryHub::new();
    let (kiosk, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);

    assert_eq!(kiosk.toggle_cast().await, Notice::NothingToCast);
    assert_eq!(hub.retained(CAST_TOPIC), None);
}

#[tokio::test]
async fn second_kiosk_is_blocked_while_first_holds() {
    let hub = MemoryHub::new();
    let (a, _ta) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let (b, _tb) = kiosk(&hub, "id-b", "Sales Person 2", CastPolicy::Follow);
    let _a_tasks = a.start();
    let _b_tasks = b.start();
    settle().await;

    a.navigate(|s| s.select_floor(Some(6))).await;
    assert_eq!(a.toggle_cast().await, Notice::Started { images: 1 });
    settle().await;

    b.navigate(|s| s.select_floor(Some(6))).await;
    assert_eq!(b.toggle_cast().await, Notice::Blocked { holder: "Sales Person 1".into() });
    assert_eq!(b.store().cast().holder_name.as_deref(), Some("Sales Person 1"));
    assert_eq!(a.cast().phase(), CastPhase::Holding);
}

#[tokio::test]
async fn follow_mode_tracks_navigation_then_stops() {
    let hub = MemoryHub::new();
    let (a, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let _tasks = a.start();
    settle().await;

    a.navigate(|s| s.select_floor(Some(6))).await;
    a.toggle_cast().await;
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/floors/12.png"));

    a.navigate(|s| s.select_room(Some("604".into()))).await;
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/rooms/r604.png"));

    a.navigate(|s| s.select_direction(Some("N1".into()))).await;
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/view/N/4.webp"));

    assert_eq!(a.toggle_cast().await, Notice::Stopped);
    assert!(!retained(&hub).active);
}

#[tokio::test(start_paused = true)]
async fn auto_cycle_yields_to_another_holder() {
    let hub = MemoryHub::new();
    let (a, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::AutoCycle);
    let _tasks = a.start();
    settle().await;

    assert!(a.select_amenity("fitness").await);
    assert_eq!(a.toggle_cast().await, Notice::Started { images: 4 });
    settle().await;
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/amenities/gym1.jpg"));

    let other = MemoryTransport::connected(&hub);
    let takeover = json!({
        "active": true,
        "holderClientId": "id-b",
        "holderName": "Sales Person 2",
        "imageSrc": "/floors/12.png",
        "metadata": null,
        "ts": 1
    });
    other
        .publish(CAST_TOPIC, takeover.to_string().into_bytes(), PublishOptions::RETAINED)
        .await
        .expect("takeover");
    settle().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(retained(&hub).holder_client_id.as_deref(), Some("id-b"));
    assert_eq!(a.cast().phase(), CastPhase::Blocked);
}

#[tokio::test(start_paused = true)]
async fn quick_stop_then_cast_keeps_the_new_cycle() {
    let hub = MemoryHub::new();
    let (a, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::AutoCycle);
    let _tasks = a.start();
    settle().await;

    assert!(a.select_amenity("fitness").await);
    assert_eq!(a.toggle_cast().await, Notice::Started { images: 4 });
    settle().await;

    // Stop and start again before the stop's echo is processed.
    assert_eq!(a.toggle_cast().await, Notice::Stopped);
    assert_eq!(a.toggle_cast().await, Notice::Started { images: 4 });
    settle().await;
    assert_eq!(a.cast().phase(), CastPhase::Holding);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let record = retained(&hub);
    assert!(record.active);
    assert_eq!(record.image_src.as_deref(), Some("/amenities/gym2.jpg"));
    assert!(a.store().cast().is_casting);
}

#[tokio::test]
async fn offline_cast_and_lighting_return_promptly() {
    let hub = MemoryHub::new();
    let device = MemoryTransport::connected(&hub);
    let mut rx = device.events();
    device.subscribe("platinum/ui/cmd", Qos::AtMostOnce).await.expect("subscribe");

    let transport = MemoryTransport::disconnected(&hub);
    let connection =
        ConnectionManager::new(transport.clone(), Topics::new("platinum"), ClientIdentity::new("id-a", "Sales Person 1"));
    let a = Kiosk::new(connection, KioskOptions::default());
    a.set_catalog(Catalog { layout: LayoutIndex::parse(LAYOUT), availability: AvailabilityIndex::default() });
    let _tasks = a.start();
    a.navigate(|s| s.select_floor(Some(6))).await;

    let notice = tokio::time::timeout(Duration::from_secs(1), a.toggle_cast()).await.expect("toggle must not block");
    assert_eq!(notice, Notice::Started { images: 1 });
    tokio::time::timeout(Duration::from_secs(1), a.all_lights()).await.expect("lighting must not block");
    assert_eq!(a.cast().phase(), CastPhase::Holding);
    assert_eq!(hub.retained(CAST_TOPIC), None);

    transport.set_connected(true);
    settle().await;
    assert_eq!(retained(&hub).holder_client_id.as_deref(), Some("id-a"));
    let commands = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, TransportEvent::Message(m) if m.text().contains("white_all")))
        .count();
    assert_eq!(commands, 1);
}

#[tokio::test]
async fn heartbeat_handle_follows_connection() {
    let hub = MemoryHub::new();
    let (kiosk, transport) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);
    let _tasks = kiosk.start();
    settle().await;
    assert!(kiosk.heartbeat.lock().expect("lock").is_some());

    transport.set_connected(false);
    settle().await;
    assert!(kiosk.heartbeat.lock().expect("lock").is_none());

    transport.set_connected(true);
    settle().await;
    assert!(kiosk.heartbeat.lock().expect("lock").is_some());
}

// =============================================================================
// Lighting
// =============================================================================

#[tokio::test]
async fn amenity_selection_lights_its_strip() {
    let hub = MemoryHub::new();
    let device = MemoryTransport::connected(&hub);
    let mut rx = device.events();
    device.subscribe("platinum/ui/cmd", Qos::AtMostOnce).await.expect("subscribe");
    let (a, _t) = kiosk(&hub, "id-a", "Sales Person 1", CastPolicy::Follow);

    assert!(a.select_amenity("pickle-ball").await);
    assert!(!a.select_amenity("pool").await);
    a.reset_amenities().await;

    let sent: Vec<serde_json::Value> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            TransportEvent::Message(m) => serde_json::from_slice(&m.payload).ok(),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["type"], "custom_leds");
    assert_eq!(sent[0]["floor"], 16);
    assert_eq!(sent[0]["count"], 80);
    assert_eq!(sent[0]["g"], 255);
    assert_eq!(sent[1]["type"], "set_floor_color");
    assert_eq!(a.store().nav().amenity.as_deref(), Some("pickle-ball"));
}
