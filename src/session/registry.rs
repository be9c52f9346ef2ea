//! Channel registry
//!
//! Maps channel name to its live listener. Enforces at-most-one active
//! listener per channel, drives listener creation on join and synchronous
//! teardown on leave. The registry owns its bookkeeping; nothing here is
//! process-global, so it can be exercised in isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SessionError;
use super::events::SessionEvent;
use super::listener::ChannelListener;
use crate::backend::{Backend, ChatMessage, Subscription};

fn membership_key(user: &str) -> String {
    format!("channels:{}", user)
}

/// Pairs a listener's cancellation token with the handle the registry
/// blocks on to observe termination
struct ListenerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Registry of live channel listeners for one session
pub struct ChannelRegistry {
    backend: Arc<dyn Backend>,
    listeners: HashMap<String, ListenerHandle>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    poll_timeout: Duration,
}

impl ChannelRegistry {
    /// Create a new ChannelRegistry
    pub fn new(
        backend: Arc<dyn Backend>,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            listeners: HashMap::new(),
            event_tx,
            poll_timeout,
        }
    }

    /// Join a channel: publish the notice, subscribe, and start a listener
    /// bound to a fresh cancellation token
    pub async fn join(&mut self, channel: &str, user: &str) -> Result<(), SessionError> {
        if let Some(handle) = self.listeners.get(channel) {
            if !handle.task.is_finished() {
                return Err(SessionError::AlreadyJoined(channel.to_string()));
            }
        }
        // A leftover entry here means the listener died on its own (backend
        // failure); reap it before creating a replacement.
        if let Some(stale) = self.listeners.remove(channel) {
            debug!("Reaping terminated listener for {}", channel);
            if let Err(e) = stale.task.await {
                error!("Stale listener task for {} failed: {}", channel, e);
            }
        }

        let notice = ChatMessage::system(format!("User {} has joined the channel.", user));
        self.backend.publish(channel, &notice).await?;
        self.backend
            .set_add(&membership_key(user), channel)
            .await?;

        let subscription = self.backend.subscribe(channel).await?;

        let token = CancellationToken::new();
        let listener = ChannelListener::new(
            channel.to_string(),
            subscription,
            token.clone(),
            self.event_tx.clone(),
            self.poll_timeout,
        );
        let task = tokio::spawn(listener.run());

        self.listeners
            .insert(channel.to_string(), ListenerHandle { token, task });

        info!("Joined channel: {}", channel);
        Ok(())
    }

    /// Leave a channel: publish the notice, cancel the listener, and block
    /// until it confirms termination
    pub async fn leave(&mut self, channel: &str, user: &str) -> Result<(), SessionError> {
        let handle = self
            .listeners
            .remove(channel)
            .ok_or_else(|| SessionError::NotJoined(channel.to_string()))?;

        let notice = ChatMessage::system(format!("User {} has left the channel.", user));
        if let Err(e) = self.backend.publish(channel, &notice).await {
            // The entry still has to go; teardown continues.
            warn!("Failed to publish leave notice for {}: {}", channel, e);
        }
        if let Err(e) = self.backend.set_remove(&membership_key(user), channel).await {
            warn!("Failed to update membership for {}: {}", user, e);
        }

        handle.token.cancel();
        if let Err(e) = handle.task.await {
            error!("Listener task for {} failed: {}", channel, e);
        }

        info!("Left channel: {}", channel);
        Ok(())
    }

    /// Subscribe to all channels matching a glob-style pattern as one feed
    ///
    /// Deliberately not tracked here and bound to no cancellation token:
    /// the caller owns the feed and stops it by ceasing to poll and
    /// unsubscribing. Joined notices go to every currently active channel,
    /// and the feed is opened first so it sees them.
    pub async fn pattern_feed(
        &self,
        pattern: &str,
        user: &str,
    ) -> Result<Box<dyn Subscription>, SessionError> {
        let feed = self.backend.subscribe_pattern(pattern).await?;

        let notice = ChatMessage::system(format!("User {} has joined the channel.", user));
        for channel in self.backend.active_channels().await? {
            if let Err(e) = self.backend.publish(&channel, &notice).await {
                warn!("Failed to publish pattern-join notice to {}: {}", channel, e);
            }
        }

        info!("Watching channels matching pattern: {}", pattern);
        Ok(feed)
    }

    /// Leave every joined channel; best-effort, used at process exit
    pub async fn shutdown_all(&mut self, user: &str) {
        let channels: Vec<String> = self.listeners.keys().cloned().collect();
        for channel in channels {
            if let Err(e) = self.leave(&channel, user).await {
                error!("Failed to leave {} during shutdown: {}", channel, e);
            }
        }
    }

    /// Whether a channel currently has a registry entry
    pub fn joined(&self, channel: &str) -> bool {
        self.listeners.contains_key(channel)
    }

    /// Channels with a registry entry
    pub fn joined_channels(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        if !self.listeners.is_empty() {
            warn!(
                "ChannelRegistry dropped with {} live listeners",
                self.listeners.len()
            );
        }
    }
}
