//! In-process pub/sub backend
//!
//! A broker over a broadcast bus plus mutex-guarded maps for history, keys,
//! hashes, and sets. Selected with `backend.mode = "memory"` for offline
//! single-process use, and used throughout the test suite where a real
//! server is unavailable.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use super::traits::{Backend, Subscription};
use super::types::{BackendError, ChatMessage, Delivery};

/// Redis-style glob match supporting `*` and `?`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Backtrack: let the last `*` swallow one more character
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct MemoryInner {
    bus: broadcast::Sender<Delivery>,
    history: Mutex<HashMap<String, Vec<ChatMessage>>>,
    kv: Mutex<HashMap<String, KvEntry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    // Sync mutex so a dropped subscription can release its count without
    // an async context.
    subscribers: std::sync::Mutex<HashMap<String, usize>>,
}

/// In-process broker backend
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(MemoryInner {
                bus,
                history: Mutex::new(HashMap::new()),
                kv: Mutex::new(HashMap::new()),
                hashes: Mutex::new(HashMap::new()),
                sets: Mutex::new(HashMap::new()),
                subscribers: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn publish(&self, channel: &str, message: &ChatMessage) -> Result<(), BackendError> {
        self.inner
            .history
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(message.clone());

        // No receivers is not an error; delivery is at-most-once.
        let _ = self.inner.bus.send(Delivery {
            channel: channel.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BackendError> {
        let rx = self.inner.bus.subscribe();
        *self
            .inner
            .subscribers
            .lock()
            .expect("subscriber map lock poisoned")
            .entry(channel.to_string())
            .or_insert(0) += 1;

        Ok(Box::new(MemorySubscription {
            rx,
            filter: Filter::Channel(channel.to_string()),
            inner: self.inner.clone(),
            closed: false,
        }))
    }

    async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<Box<dyn Subscription>, BackendError> {
        let rx = self.inner.bus.subscribe();
        Ok(Box::new(MemorySubscription {
            rx,
            filter: Filter::Pattern(pattern.to_string()),
            inner: self.inner.clone(),
            closed: false,
        }))
    }

    async fn append_history(
        &self,
        channel: &str,
        message: &ChatMessage,
    ) -> Result<(), BackendError> {
        self.inner
            .history
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn read_history(&self, channel: &str) -> Result<Vec<ChatMessage>, BackendError> {
        Ok(self
            .inner
            .history
            .lock()
            .await
            .get(channel)
            .cloned()
            .unwrap_or_default())
    }

    async fn active_channels(&self) -> Result<Vec<String>, BackendError> {
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber map lock poisoned");
        Ok(subscribers
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(channel, _)| channel.clone())
            .collect())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut kv = self.inner.kv.lock().await;
        match kv.get(key) {
            Some(entry) if entry.expired() => {
                kv.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.inner.kv.lock().await.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn kv_set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        self.inner.kv.lock().await.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn kv_keys(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .inner
            .kv
            .lock()
            .await
            .iter()
            .filter(|(key, entry)| !entry.expired() && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), BackendError> {
        let mut hashes = self.inner.hashes.lock().await;
        let entry = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        Ok(self
            .inner
            .hashes
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.inner
            .sets
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BackendError> {
        if let Some(set) = self.inner.sets.lock().await.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }
}

enum Filter {
    Channel(String),
    Pattern(String),
}

impl Filter {
    fn matches(&self, channel: &str) -> bool {
        match self {
            Filter::Channel(name) => name == channel,
            Filter::Pattern(pattern) => glob_match(pattern, channel),
        }
    }
}

/// Subscription over the broadcast bus, filtered to one channel or pattern
pub struct MemorySubscription {
    rx: broadcast::Receiver<Delivery>,
    filter: Filter,
    inner: Arc<MemoryInner>,
    closed: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Filter::Channel(name) = &self.filter {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .expect("subscriber map lock poisoned");
            if let Some(count) = subscribers.get_mut(name) {
                *count -= 1;
                if *count == 0 {
                    subscribers.remove(name);
                }
            }
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BackendError> {
        if self.closed {
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(Ok(delivery)) => {
                    if self.filter.matches(&delivery.channel) {
                        return Ok(Some(delivery));
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!("Subscription lagged, {} messages dropped", skipped);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(BackendError::Connection("broker closed".to_string()));
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), BackendError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("news.*", "news.tech"));
        assert!(!glob_match("news.*", "sports.tech"));
        assert!(glob_match("ch?t", "chat"));
        assert!(!glob_match("ch?t", "cheat"));
        assert!(glob_match("*relay*", "chatrelay-dev"));
        assert!(!glob_match("", "x"));
        assert!(glob_match("", ""));
    }

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("general").await.unwrap();

        let msg = ChatMessage::new("alice", "hello");
        backend.publish("general", &msg).await.unwrap();

        let delivery = sub
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("message should be delivered");
        assert_eq!(delivery.channel, "general");
        assert_eq!(delivery.message, msg);
    }

    #[tokio::test]
    async fn test_subscription_filters_other_channels() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("alpha").await.unwrap();

        backend
            .publish("beta", &ChatMessage::new("bob", "wrong room"))
            .await
            .unwrap();

        let got = sub.next_message(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_pattern_subscription_spans_channels() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe_pattern("news.*").await.unwrap();

        backend
            .publish("news.tech", &ChatMessage::new("carol", "launch day"))
            .await
            .unwrap();
        backend
            .publish("sports.f1", &ChatMessage::new("dave", "lights out"))
            .await
            .unwrap();

        let delivery = sub
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("pattern should match news.tech");
        assert_eq!(delivery.channel, "news.tech");

        let got = sub.next_message(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none(), "sports.f1 must not match news.*");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("general").await.unwrap();

        sub.unsubscribe().await.unwrap();
        sub.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_exists_without_subscribers() {
        let backend = MemoryBackend::new();
        let msg = ChatMessage::new("alice", "for the record");
        backend.publish("empty-room", &msg).await.unwrap();

        let history = backend.read_history("empty-room").await.unwrap();
        assert_eq!(history, vec![msg]);
    }

    #[tokio::test]
    async fn test_active_channels_tracks_subscriptions() {
        let backend = MemoryBackend::new();
        assert!(backend.active_channels().await.unwrap().is_empty());

        let mut sub = backend.subscribe("general").await.unwrap();
        assert_eq!(backend.active_channels().await.unwrap(), vec!["general"]);

        sub.unsubscribe().await.unwrap();
        assert!(backend.active_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kv_expiry() {
        let backend = MemoryBackend::new();
        backend
            .kv_set_ex("weather:Nashville:2024-01-01", "{}", Duration::from_millis(30))
            .await
            .unwrap();

        assert!(
            backend
                .kv_get("weather:Nashville:2024-01-01")
                .await
                .unwrap()
                .is_some()
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            backend
                .kv_get("weather:Nashville:2024-01-01")
                .await
                .unwrap()
                .is_none()
        );
        assert!(backend.kv_keys("weather:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_history_does_not_deliver() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("general").await.unwrap();

        let msg = ChatMessage::new("alice", "backfilled");
        backend.append_history("general", &msg).await.unwrap();

        let got = sub.next_message(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none(), "append_history must not publish");
        assert_eq!(backend.read_history("general").await.unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn test_set_membership_roundtrip() {
        let backend = MemoryBackend::new();
        backend.set_add("channels:alice", "general").await.unwrap();
        backend.set_add("channels:alice", "random").await.unwrap();
        backend
            .set_remove("channels:alice", "general")
            .await
            .unwrap();
        // Removing from an unknown set is a no-op
        backend.set_remove("channels:bob", "general").await.unwrap();
    }

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .hash_set("user:alice", &[("user_name", "alice"), ("user_age", "30")])
            .await
            .unwrap();

        let fields = backend.hash_get_all("user:alice").await.unwrap();
        assert_eq!(fields.get("user_name").map(String::as_str), Some("alice"));
        assert_eq!(fields.get("user_age").map(String::as_str), Some("30"));

        assert!(backend.hash_get_all("user:nobody").await.unwrap().is_empty());
    }
}
