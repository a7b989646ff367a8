use frames::Qos;
use serde_json::json;
use tokio::sync::broadcast;

use super::*;
use crate::net::{InboundMessage, MemoryHub, MemoryTransport, Topics, Transport, TransportEvent};

const TOPIC: &str = "platinum/cast/state";

fn coordinator(hub: &MemoryHub, id: &str, name: &str) -> CastCoordinator {
    let connection = ConnectionManager::new(
        MemoryTransport::connected(hub),
        Topics::new("platinum"),
        ClientIdentity::new(id, name),
    );
    CastCoordinator::new(connection)
}

fn item(src: &str) -> CastItem {
    CastItem { image_src: src.to_owned(), metadata: CastMetadata::floor(6) }
}

fn retained(hub: &MemoryHub) -> CastState {
    CastState::from_payload(&hub.retained(TOPIC).expect("retained cast state")).expect("parse")
}

async fn watcher(hub: &MemoryHub) -> (Arc<MemoryTransport>, broadcast::Receiver<TransportEvent>) {
    let transport = MemoryTransport::connected(hub);
    let rx = transport.events();
    transport.subscribe(TOPIC, Qos::AtMostOnce).await.expect("subscribe");
    (transport, rx)
}

fn cast_messages(rx: &mut broadcast::Receiver<TransportEvent>) -> Vec<InboundMessage> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            TransportEvent::Message(m) => Some(m),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Wire record
// =============================================================================

#[tokio::test]
async fn claim_is_retained_in_camel_case() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");

    a.request(&item("/floors/12.png")).await.expect("request");

    let raw: serde_json::Value = serde_json::from_slice(&hub.retained(TOPIC).expect("retained")).expect("json");
    assert_eq!(raw["active"], json!(true));
    assert_eq!(raw["holderClientId"], json!("id-a"));
    assert_eq!(raw["holderName"], json!("Sales Person 1"));
    assert_eq!(raw["imageSrc"], json!("/floors/12.png"));
    assert_eq!(raw["metadata"], json!({"type": "floor", "floor": 6}));
    assert_eq!(a.phase(), CastPhase::Holding);
}

#[test]
fn empty_payload_reads_as_released() {
    let state = CastState::from_payload(b"").expect("parse");
    assert!(!state.active);
    assert_eq!(state.holder_client_id, None);
}

#[test]
fn odd_metadata_does_not_break_record() {
    let state = CastState::from_payload(br#"{"active":true,"holderClientId":"x","metadata":[1,2]}"#).expect("parse");
    assert!(state.active);
    assert_eq!(state.cast_metadata(), None);
}

// =============================================================================
// Lock semantics
// =============================================================================

#[tokio::test]
async fn last_publisher_wins() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    let b = coordinator(&hub, "id-b", "Sales Person 2");

    a.request(&item("/floors/1.png")).await.expect("a claims");
    b.request(&item("/floors/2.png")).await.expect("b claims");

    let record = retained(&hub);
    assert_eq!(record.holder_client_id.as_deref(), Some("id-b"));

    // A third kiosk joining later sees B as the holder.
    let c = coordinator(&hub, "id-c", "Sales Person 3");
    assert_eq!(c.observe(&record), Some(CastPhase::Blocked));
    assert_eq!(c.holder().map(|h| h.name), Some("Sales Person 2".to_owned()));

    // A sees B's claim and drops out of Holding.
    assert_eq!(a.observe(&record), Some(CastPhase::Blocked));
    assert_eq!(b.observe(&record), Some(CastPhase::Holding));
}

#[tokio::test]
async fn blocked_request_is_refused_without_publishing() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    let b = coordinator(&hub, "id-b", "Sales Person 2");
    a.request(&item("/floors/1.png")).await.expect("a claims");
    b.observe(&retained(&hub));

    let err = b.request(&item("/floors/2.png")).await.expect_err("blocked");

    assert_eq!(err, CastError::Blocked { holder: "Sales Person 1".into() });
    assert_eq!(retained(&hub).holder_client_id.as_deref(), Some("id-a"));
}

#[tokio::test]
async fn release_publishes_inactive_record() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    a.request(&item("/floors/1.png")).await.expect("claim");

    assert!(a.release().await);

    let record = retained(&hub);
    assert!(!record.active);
    assert_eq!(record.holder_client_id, None);
    assert_eq!(record.image_src, None);
    assert_eq!(a.phase(), CastPhase::Idle);
}

#[tokio::test]
async fn blocked_kiosk_cannot_release_someone_elses_lock() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    let b = coordinator(&hub, "id-b", "Sales Person 2");
    a.request(&item("/floors/1.png")).await.expect("claim");
    b.observe(&retained(&hub));

    assert!(!b.release().await);
    assert!(retained(&hub).active);
}

#[tokio::test]
async fn observing_release_unblocks() {
    let hub = MemoryHub::new();
    let b = coordinator(&hub, "id-b", "Sales Person 2");
    let held = CastState::claim(&ClientIdentity::new("id-a", "Sales Person 1"), &item("/x.png"));
    b.observe(&held);
    assert_eq!(b.phase(), CastPhase::Blocked);

    assert_eq!(b.observe(&CastState::released()), Some(CastPhase::Idle));
    assert_eq!(b.holder(), None);
}

#[tokio::test]
async fn follow_only_publishes_while_holding() {
    let hub = MemoryHub::new();
    let (_w, mut rx) = watcher(&hub).await;
    let a = coordinator(&hub, "id-a", "Sales Person 1");

    assert!(!a.follow(&item("/floors/1.png")).await);
    assert!(cast_messages(&mut rx).is_empty());

    a.request(&item("/floors/1.png")).await.expect("claim");
    assert!(a.follow(&item("/rooms/r604.png")).await);
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/rooms/r604.png"));
}

// =============================================================================
// Late echoes and offline claims
// =============================================================================

#[tokio::test]
async fn own_records_are_stamped_in_increasing_order() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");

    a.request(&item("/floors/1.png")).await.expect("claim");
    let first = retained(&hub).ts;
    assert!(a.release().await);
    let second = retained(&hub).ts;
    a.request(&item("/floors/2.png")).await.expect("claim again");
    let third = retained(&hub).ts;

    assert!(first < second && second < third, "{first} < {second} < {third}");
}

#[tokio::test]
async fn late_echo_of_own_release_does_not_undo_new_claim() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");

    a.request(&item("/floors/1.png")).await.expect("claim");
    let old_claim = retained(&hub);
    assert!(a.release().await);
    let old_release = retained(&hub);
    a.request(&item("/floors/2.png")).await.expect("claim again");

    assert_eq!(a.observe(&old_release), None);
    assert_eq!(a.observe(&old_claim), None);
    assert_eq!(a.phase(), CastPhase::Holding);
    assert_eq!(a.observe(&retained(&hub)), Some(CastPhase::Holding));
}

#[tokio::test]
async fn release_after_takeover_applies_despite_older_clock() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    a.request(&item("/floors/1.png")).await.expect("claim");

    let takeover = CastState {
        ts: 1,
        ..CastState::claim(&ClientIdentity::new("id-b", "Sales Person 2"), &item("/b.png"))
    };
    assert_eq!(a.observe(&takeover), Some(CastPhase::Blocked));

    let their_release = CastState { ts: 2, ..CastState::released() };
    assert_eq!(a.observe(&their_release), Some(CastPhase::Idle));
}

#[tokio::test]
async fn offline_claim_returns_at_once_and_lands_on_connect() {
    let hub = MemoryHub::new();
    let transport = MemoryTransport::disconnected(&hub);
    let connection = ConnectionManager::new(
        transport.clone(),
        Topics::new("platinum"),
        ClientIdentity::new("id-a", "Sales Person 1"),
    );
    let a = CastCoordinator::new(connection);

    tokio::time::timeout(Duration::from_secs(1), a.request(&item("/floors/1.png")))
        .await
        .expect("offline claim must not block")
        .expect("claim");
    assert_eq!(a.phase(), CastPhase::Holding);
    assert_eq!(hub.retained(TOPIC), None);

    transport.set_connected(true);
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(retained(&hub).holder_client_id.as_deref(), Some("id-a"));
}

#[tokio::test]
async fn abandoned_claim_falls_back_to_idle() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    a.state().phase = CastPhase::Requesting;

    drop(ClaimGuard { lock: &a.lock, armed: true });

    assert_eq!(a.phase(), CastPhase::Idle);
}

// =============================================================================
// Auto-cycle
// =============================================================================

#[tokio::test]
async fn auto_cycle_with_nothing_publishes_nothing() {
    let hub = MemoryHub::new();
    let a = coordinator(&hub, "id-a", "Sales Person 1");

    let result = a.auto_cycle(&[], AUTO_CYCLE_DWELL, CancellationToken::new()).await;

    assert_eq!(result, Err(CastError::NothingToCast));
    assert_eq!(hub.retained(TOPIC), None);
    assert_eq!(a.phase(), CastPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn auto_cycle_shows_every_item_then_stops() {
    let hub = MemoryHub::new();
    let (_w, mut rx) = watcher(&hub).await;
    let a = coordinator(&hub, "id-a", "Sales Person 1");
    let items = [item("/amenities/gym1.jpg"), item("/amenities/gym2.jpg"), item("/amenities/gym3.jpg")];

    let published = a.auto_cycle(&items, AUTO_CYCLE_DWELL, CancellationToken::new()).await;

    assert_eq!(published, Ok(3));
    assert_eq!(cast_messages(&mut rx).len(), 3);
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/amenities/gym3.jpg"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_auto_cycle_publishes_nothing_more() {
    let hub = MemoryHub::new();
    let (_w, mut rx) = watcher(&hub).await;
    let a = Arc::new(coordinator(&hub, "id-a", "Sales Person 1"));
    let items = vec![item("/amenities/gym1.jpg"), item("/amenities/gym2.jpg")];
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let a = Arc::clone(&a);
        let cancel = cancel.clone();
        async move { a.auto_cycle(&items, AUTO_CYCLE_DWELL, cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cast_messages(&mut rx).len(), 1, "first image is published immediately");

    cancel.cancel();
    assert_eq!(task.await.expect("join"), Ok(1));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(cast_messages(&mut rx).is_empty());
    assert_eq!(retained(&hub).image_src.as_deref(), Some("/amenities/gym1.jpg"));
}

#[tokio::test(start_paused = true)]
async fn auto_cycle_stops_when_lock_is_taken() {
    let hub = MemoryHub::new();
    let a = Arc::new(coordinator(&hub, "id-a", "Sales Person 1"));
    let items = vec![item("/1.png"), item("/2.png"), item("/3.png")];

    let task = tokio::spawn({
        let a = Arc::clone(&a);
        async move { a.auto_cycle(&items, AUTO_CYCLE_DWELL, CancellationToken::new()).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let b_claim = CastState::claim(&ClientIdentity::new("id-b", "Sales Person 2"), &item("/b.png"));
    a.observe(&b_claim);

    assert_eq!(task.await.expect("join"), Ok(1));
}
