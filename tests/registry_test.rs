//! Channel registry behavior tests
//!
//! Exercise join/leave lifecycle, duplicate-join rejection, message
//! forwarding, and ordering against the in-process backend with a short
//! poll timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chatrelay::backend::{Backend, ChatMessage, MemoryBackend, Subscription};
use chatrelay::session::{ChannelRegistry, SessionError, SessionEvent};

const POLL: Duration = Duration::from_millis(50);
const RECV_WAIT: Duration = Duration::from_secs(1);

fn setup() -> (
    Arc<MemoryBackend>,
    ChannelRegistry,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    let backend = Arc::new(MemoryBackend::new());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let registry = ChannelRegistry::new(backend.clone(), event_tx, POLL);
    (backend, registry, event_rx)
}

async fn next_channel_message(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> (String, ChatMessage) {
    loop {
        let event = timeout(RECV_WAIT, rx.recv())
            .await
            .expect("timed out waiting for a forwarded message")
            .expect("event channel closed");
        if let SessionEvent::ChannelMessage { channel, message } = event {
            return (channel, message);
        }
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while rx.try_recv().is_ok() {}
}

#[tokio::test]
async fn test_leave_without_join_is_not_joined_error() {
    let (_backend, mut registry, _rx) = setup();

    let err = registry.leave("ghost", "alice").await.unwrap_err();
    assert!(matches!(err, SessionError::NotJoined(_)));
    assert!(registry.joined_channels().is_empty());
}

#[tokio::test]
async fn test_double_join_is_rejected_and_first_listener_survives() {
    let (backend, mut registry, mut rx) = setup();

    registry.join("general", "alice").await.unwrap();
    let err = registry.join("general", "alice").await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyJoined(_)));

    // The first listener remains the sole owner: one publish, one forward.
    let msg = ChatMessage::new("bob", "hello");
    backend.publish("general", &msg).await.unwrap();

    let (channel, message) = next_channel_message(&mut rx).await;
    assert_eq!(channel, "general");
    assert_eq!(message, msg);

    assert!(
        timeout(Duration::from_millis(150), rx.recv()).await.is_err(),
        "a rejected duplicate join must not create a second listener"
    );

    registry.leave("general", "alice").await.unwrap();
}

#[tokio::test]
async fn test_leave_stops_forwarding_and_rejoin_creates_fresh_listener() {
    let (backend, mut registry, mut rx) = setup();

    registry.join("general", "alice").await.unwrap();
    registry.leave("general", "alice").await.unwrap();
    assert!(!registry.joined("general"));

    // The leave notice may have been forwarded before cancellation landed.
    drain(&mut rx);

    backend
        .publish("general", &ChatMessage::new("bob", "anyone here?"))
        .await
        .unwrap();
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "messages published after leave must not be forwarded"
    );

    // A re-join succeeds and creates a brand-new listener.
    registry.join("general", "alice").await.unwrap();
    backend
        .publish("general", &ChatMessage::new("bob", "welcome back"))
        .await
        .unwrap();

    let (_, message) = next_channel_message(&mut rx).await;
    assert_eq!(message.message, "welcome back");

    registry.leave("general", "alice").await.unwrap();
}

#[tokio::test]
async fn test_messages_arrive_in_publish_order() {
    let (backend, mut registry, mut rx) = setup();

    registry.join("general", "alice").await.unwrap();

    for body in ["m1", "m2", "m3"] {
        backend
            .publish("general", &ChatMessage::new("bob", body))
            .await
            .unwrap();
    }

    for expected in ["m1", "m2", "m3"] {
        let (_, message) = next_channel_message(&mut rx).await;
        assert_eq!(message.message, expected);
    }

    registry.leave("general", "alice").await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_twice_does_not_error() {
    let (backend, _registry, _rx) = setup();

    let mut subscription = backend.subscribe("general").await.unwrap();
    subscription.unsubscribe().await.unwrap();
    subscription.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_channels_are_isolated() {
    let (backend, mut registry, mut rx) = setup();

    registry.join("alpha", "alice").await.unwrap();
    registry.join("beta", "alice").await.unwrap();
    drain(&mut rx);

    backend
        .publish("alpha", &ChatMessage::new("bob", "only alpha"))
        .await
        .unwrap();

    let (channel, message) = next_channel_message(&mut rx).await;
    assert_eq!(channel, "alpha");
    assert_eq!(message.message, "only alpha");

    assert!(
        timeout(Duration::from_millis(150), rx.recv()).await.is_err(),
        "a publish to alpha must never surface on beta's listener"
    );

    registry.shutdown_all("alice").await;
    assert!(registry.joined_channels().is_empty());
}

#[tokio::test]
async fn test_join_publishes_system_notice_to_history() {
    let (backend, mut registry, _rx) = setup();

    registry.join("general", "alice").await.unwrap();

    let history = backend.read_history("general").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].username, "System");
    assert!(history[0].message.contains("alice"));
    assert!(history[0].message.contains("joined"));

    registry.leave("general", "alice").await.unwrap();

    let history = backend.read_history("general").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].message.contains("left"));
}
