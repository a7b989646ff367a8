use super::*;

fn drain(rx: &mut broadcast::Receiver<TransportEvent>) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TransportEvent::Message(m) = event {
            out.push(m);
        }
    }
    out
}

#[tokio::test]
async fn overlapping_filters_deliver_once() {
    let hub = MemoryHub::new();
    let a = MemoryTransport::connected(&hub);
    let b = MemoryTransport::connected(&hub);
    let mut rx = a.events();
    a.subscribe("p/#", Qos::AtMostOnce).await.expect("sub");
    a.subscribe("p/ui/+", Qos::AtMostOnce).await.expect("sub");

    b.publish("p/ui/ack", b"ok".to_vec(), PublishOptions::default()).await.expect("pub");

    let got = drain(&mut rx);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].payload, b"ok");
    assert!(!got[0].retained);
}

#[tokio::test]
async fn retained_value_replays_to_late_subscriber() {
    let hub = MemoryHub::new();
    let a = MemoryTransport::connected(&hub);
    a.publish("p/cast/state", b"one".to_vec(), PublishOptions::RETAINED).await.expect("pub");
    a.publish("p/cast/state", b"two".to_vec(), PublishOptions::RETAINED).await.expect("pub");

    let late = MemoryTransport::connected(&hub);
    let mut rx = late.events();
    late.subscribe("p/cast/state", Qos::AtMostOnce).await.expect("sub");

    let got = drain(&mut rx);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].payload, b"two");
    assert!(got[0].retained);
}

#[tokio::test]
async fn empty_retained_payload_clears() {
    let hub = MemoryHub::new();
    let a = MemoryTransport::connected(&hub);
    a.publish("p/cast/state", b"x".to_vec(), PublishOptions::RETAINED).await.expect("pub");
    a.publish("p/cast/state", Vec::new(), PublishOptions::RETAINED).await.expect("pub");
    assert_eq!(hub.retained("p/cast/state"), None);
}

#[tokio::test]
async fn offline_transport_rejects_and_loses_subscriptions() {
    let hub = MemoryHub::new();
    let a = MemoryTransport::connected(&hub);
    let b = MemoryTransport::connected(&hub);
    a.subscribe("p/ui/cmd", Qos::AtMostOnce).await.expect("sub");
    let mut rx = a.events();

    a.set_connected(false);
    assert!(matches!(
        a.publish("p/x", b"1".to_vec(), PublishOptions::default()).await,
        Err(TransportError::NotConnected)
    ));

    a.set_connected(true);
    b.publish("p/ui/cmd", b"1".to_vec(), PublishOptions::default()).await.expect("pub");

    let events: Vec<TransportEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(matches!(events[0], TransportEvent::Disconnected));
    assert!(matches!(events[1], TransportEvent::Connected));
    assert_eq!(events.len(), 2, "no delivery without resubscribing");
}
