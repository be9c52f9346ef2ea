//! End-to-end session flow tests
//!
//! Full join → publish → forward → leave → rejoin scenarios, pattern
//! feeds, and exit-time cleanup, timed against the configured poll
//! interval.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;

use chatrelay::backend::{Backend, ChatMessage, MemoryBackend, Subscription};
use chatrelay::session::{ChannelRegistry, SessionEvent};

const POLL: Duration = Duration::from_millis(50);
// Generous slack over poll timeout + unsubscribe latency
const EPSILON: Duration = Duration::from_millis(450);

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

#[tokio::test]
async fn test_end_to_end_join_publish_leave_rejoin() {
    let (backend, mut registry, mut rx) = setup();

    registry.join("general", "alice").await.unwrap();

    backend
        .publish("general", &ChatMessage::new("bob", "hello"))
        .await
        .unwrap();

    // Forwarded within one poll interval (plus scheduling slack).
    let event = timeout(POLL + EPSILON, rx.recv())
        .await
        .expect("message should be forwarded within one poll interval")
        .expect("event channel closed");
    match event {
        SessionEvent::ChannelMessage { channel, message } => {
            assert_eq!(channel, "general");
            assert_eq!(message.message, "hello");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Leave completes within poll timeout + epsilon.
    let started = Instant::now();
    registry.leave("general", "alice").await.unwrap();
    assert!(
        started.elapsed() <= POLL + EPSILON,
        "leave took {:?}, expected under {:?}",
        started.elapsed(),
        POLL + EPSILON
    );

    // A fresh join succeeds with a new listener.
    registry.join("general", "alice").await.unwrap();
    registry.leave("general", "alice").await.unwrap();
}

#[tokio::test]
async fn test_shutdown_all_tears_down_every_channel() {
    let (backend, mut registry, mut rx) = setup();

    for channel in ["alpha", "beta", "gamma"] {
        registry.join(channel, "alice").await.unwrap();
    }
    assert_eq!(registry.joined_channels().len(), 3);

    registry.shutdown_all("alice").await;
    assert!(registry.joined_channels().is_empty());

    while rx.try_recv().is_ok() {}

    backend
        .publish("alpha", &ChatMessage::new("bob", "too late"))
        .await
        .unwrap();
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "no listener should survive shutdown_all"
    );
}

#[tokio::test]
async fn test_pattern_feed_spans_matching_channels() {
    let (backend, registry, _rx) = setup();

    let mut feed = registry.pattern_feed("news.*", "alice").await.unwrap();

    backend
        .publish("news.tech", &ChatMessage::new("carol", "launch day"))
        .await
        .unwrap();
    backend
        .publish("sports.f1", &ChatMessage::new("dave", "lights out"))
        .await
        .unwrap();

    let delivery = feed
        .next_message(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("matching channel should be delivered");
    assert_eq!(delivery.channel, "news.tech");
    assert_eq!(delivery.message.message, "launch day");

    let none = feed.next_message(POLL).await.unwrap();
    assert!(none.is_none(), "non-matching channel must be filtered");

    // The caller stops the feed by ceasing iteration and unsubscribing.
    feed.unsubscribe().await.unwrap();
    feed.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_pattern_feed_sees_join_notices_for_active_channels() {
    let (_backend, mut registry, _rx) = setup();

    // One channel is already live before the pattern watch begins.
    registry.join("news.tech", "alice").await.unwrap();

    let mut feed = registry.pattern_feed("news.*", "bob").await.unwrap();

    // The feed is opened before the notices are published, so it sees bob's
    // join notice on the active channel.
    let delivery = feed
        .next_message(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("join notice should reach the pattern feed");
    assert_eq!(delivery.channel, "news.tech");
    assert_eq!(delivery.message.username, "System");
    assert!(delivery.message.message.contains("bob"));

    feed.unsubscribe().await.unwrap();
    registry.leave("news.tech", "alice").await.unwrap();
}

#[tokio::test]
async fn test_history_survives_leave() {
    let (backend, mut registry, _rx) = setup();

    registry.join("general", "alice").await.unwrap();
    backend
        .publish("general", &ChatMessage::new("alice", "for posterity"))
        .await
        .unwrap();
    registry.leave("general", "alice").await.unwrap();

    let history = backend.read_history("general").await.unwrap();
    let bodies: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
    assert!(bodies.contains(&"for posterity"));
}
