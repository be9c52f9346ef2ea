//! Backend adapter traits
//!
//! The seam between the session core and the pub/sub store. The registry and
//! listeners only ever see these traits, so the same session code runs
//! against the RESP backend and the in-process broker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::types::{BackendError, ChatMessage, Delivery};

/// Publish/subscribe store with a keyed append-only history log and the
/// small key/value surface the auxiliary commands need.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Deliver `message` to current subscribers of `channel` and append it
    /// to the channel's history log. Delivery to subscribers is
    /// at-most-once; listeners mid-teardown may miss it.
    async fn publish(&self, channel: &str, message: &ChatMessage) -> Result<(), BackendError>;

    /// Register interest in one channel. History is not delivered
    /// retroactively.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BackendError>;

    /// Register interest in all channels matching a glob-style pattern
    /// (`*` and `?`), as a single multiplexed feed.
    async fn subscribe_pattern(&self, pattern: &str)
    -> Result<Box<dyn Subscription>, BackendError>;

    /// Append to the history log without publishing.
    async fn append_history(
        &self,
        channel: &str,
        message: &ChatMessage,
    ) -> Result<(), BackendError>;

    /// Read the full history log in publish order. History exists even with
    /// zero subscribers.
    async fn read_history(&self, channel: &str) -> Result<Vec<ChatMessage>, BackendError>;

    /// Channels that currently have at least one subscriber.
    async fn active_channels(&self) -> Result<Vec<String>, BackendError>;

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Set a value that expires after `ttl`.
    async fn kv_set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError>;

    /// Keys matching a glob-style pattern.
    async fn kv_keys(&self, pattern: &str) -> Result<Vec<String>, BackendError>;

    async fn hash_set(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), BackendError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BackendError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BackendError>;
}

/// Live handle to a pub/sub feed, owned exclusively by one listener.
#[async_trait]
pub trait Subscription: Send {
    /// Block up to `timeout` for the next message. Returns `Ok(None)` on
    /// timeout; errors only indicate connection failure.
    async fn next_message(&mut self, timeout: Duration)
    -> Result<Option<Delivery>, BackendError>;

    /// Stop receiving messages. Idempotent; safe to call after a
    /// timeout-driven poll loop has exited.
    async fn unsubscribe(&mut self) -> Result<(), BackendError>;
}
