use super::*;
use crate::state::test_helpers;
use frames::Qos;
use tokio::time::{Duration, timeout};

async fn recv_packet(rx: &mut mpsc::Receiver<Packet>) -> Packet {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("packet receive timed out")
        .expect("session channel closed unexpectedly")
}

async fn assert_no_packet(rx: &mut mpsc::Receiver<Packet>) {
    assert!(
        timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
        "expected no packet"
    );
}

fn cast_publish(body: &str) -> Packet {
    Packet::publish("platinum/cast/state", body.as_bytes().to_vec(), Qos::AtMostOnce, true)
}

#[tokio::test]
async fn publish_reaches_matching_subscribers_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());
    let (a, mut rx_a) = test_helpers::seed_session(&state, "a").await;
    let (b, mut rx_b) = test_helpers::seed_session(&state, "b").await;

    subscribe(&state, a, "platinum/ui/ack").await.expect("subscribe a");
    subscribe(&state, b, "platinum/relay/state").await.expect("subscribe b");

    let packet = Packet::publish("platinum/ui/ack", b"ok".to_vec(), Qos::AtMostOnce, false);
    let delivered = publish(&state, packet).await.expect("publish");

    assert_eq!(delivered, 1);
    assert_eq!(recv_packet(&mut rx_a).await.payload, b"ok");
    assert_no_packet(&mut rx_b).await;
}

#[tokio::test]
async fn overlapping_filters_deliver_once_per_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());
    let (a, mut rx_a) = test_helpers::seed_session(&state, "a").await;

    subscribe(&state, a, "platinum/#").await.expect("subscribe");
    subscribe(&state, a, "platinum/+/cmd").await.expect("subscribe");

    let packet = Packet::publish("platinum/ui/cmd", b"{}".to_vec(), Qos::AtMostOnce, false);
    publish(&state, packet).await.expect("publish");

    recv_packet(&mut rx_a).await;
    assert_no_packet(&mut rx_a).await;
}

#[tokio::test]
async fn late_subscriber_receives_retained_value_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());

    publish(&state, cast_publish(r#"{"active":true,"holderClientId":"a"}"#))
        .await
        .expect("publish");

    let (late, mut rx) = test_helpers::seed_session(&state, "late").await;
    let replayed = subscribe(&state, late, "platinum/cast/state").await.expect("subscribe");

    assert_eq!(replayed, 1);
    let packet = recv_packet(&mut rx).await;
    assert!(packet.retain);
    assert_eq!(packet.payload, br#"{"active":true,"holderClientId":"a"}"#);
}

#[tokio::test]
async fn retained_value_is_last_publish_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());

    publish(&state, cast_publish(r#"{"holderClientId":"a"}"#)).await.expect("publish a");
    publish(&state, cast_publish(r#"{"holderClientId":"b"}"#)).await.expect("publish b");

    let stored = retained(&state, "platinum/cast/state").await.expect("retained");
    assert_eq!(stored.payload, br#"{"holderClientId":"b"}"#);
}

#[tokio::test]
async fn empty_retained_payload_clears_topic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());

    publish(&state, cast_publish("{}")).await.expect("publish");
    publish(&state, cast_publish("")).await.expect("clear");

    assert!(retained(&state, "platinum/cast/state").await.is_none());
}

#[tokio::test]
async fn live_delivery_is_not_flagged_retained() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());
    let (a, mut rx) = test_helpers::seed_session(&state, "a").await;
    subscribe(&state, a, "platinum/cast/state").await.expect("subscribe");

    publish(&state, cast_publish("{}")).await.expect("publish");

    assert!(!recv_packet(&mut rx).await.retain);
}

#[tokio::test]
async fn publish_rejects_wildcard_topic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());
    let packet = Packet::publish("platinum/+/state", Vec::new(), Qos::AtMostOnce, false);

    let err = publish(&state, packet).await.expect_err("should reject");
    assert!(matches!(err, BrokerError::InvalidTopic(_)));
}

#[tokio::test]
async fn subscribe_rejects_malformed_filter_and_unknown_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());

    let err = subscribe(&state, Uuid::new_v4(), "a/#/b").await.expect_err("bad filter");
    assert!(matches!(err, BrokerError::InvalidFilter(_)));

    let err = subscribe(&state, Uuid::new_v4(), "a/b").await.expect_err("unknown session");
    assert!(matches!(err, BrokerError::UnknownSession(_)));
}

#[tokio::test]
async fn unsubscribe_and_unregister_stop_delivery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());
    let (a, mut rx_a) = test_helpers::seed_session(&state, "a").await;
    let (b, _rx_b) = test_helpers::seed_session(&state, "b").await;
    subscribe(&state, a, "platinum/ui/cmd").await.expect("subscribe a");
    subscribe(&state, b, "platinum/ui/cmd").await.expect("subscribe b");

    unsubscribe(&state, a, "platinum/ui/cmd").await;
    unregister(&state, b).await;

    let packet = Packet::publish("platinum/ui/cmd", b"{}".to_vec(), Qos::AtMostOnce, false);
    assert_eq!(publish(&state, packet).await.expect("publish"), 0);
    assert_no_packet(&mut rx_a).await;
}
