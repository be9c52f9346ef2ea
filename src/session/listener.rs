//! Channel listener task
//!
//! One listener per joined channel. Owns the channel's subscription, polls
//! with a bounded timeout so the cancellation token is observed promptly,
//! and forwards every message to the session loop. The poll timeout bounds
//! worst-case leave latency.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::SessionEvent;
use crate::backend::Subscription;

/// Listener for one channel's subscription
pub struct ChannelListener {
    channel: String,
    subscription: Box<dyn Subscription>,
    token: CancellationToken,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    poll_timeout: Duration,
}

impl ChannelListener {
    /// Create a new ChannelListener bound to a fresh cancellation token
    pub fn new(
        channel: String,
        subscription: Box<dyn Subscription>,
        token: CancellationToken,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            subscription,
            token,
            event_tx,
            poll_timeout,
        }
    }

    /// Run the listener loop until cancelled or the backend fails
    ///
    /// The registry observes termination by awaiting the task handle; a
    /// re-join always creates a brand-new listener.
    pub async fn run(mut self) {
        info!("Listening to channel: {}", self.channel);

        loop {
            if self.token.is_cancelled() {
                info!("Stopped listening to {}", self.channel);
                break;
            }

            match self.subscription.next_message(self.poll_timeout).await {
                Ok(Some(delivery)) => {
                    let forwarded = self.event_tx.send(SessionEvent::ChannelMessage {
                        channel: delivery.channel,
                        message: delivery.message,
                    });
                    if forwarded.is_err() {
                        // Session loop is gone; nothing left to forward to.
                        debug!("Event channel closed, stopping listener for {}", self.channel);
                        break;
                    }
                }
                Ok(None) => {
                    // Poll timeout; loop around and re-check the token.
                }
                Err(e) => {
                    // Implicit cancellation: exit instead of retrying against
                    // a failing backend.
                    error!("Backend error while polling {}: {}", self.channel, e);
                    let _ = self.event_tx.send(SessionEvent::ListenerStopped {
                        channel: self.channel.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Err(e) = self.subscription.unsubscribe().await {
            warn!("Error unsubscribing from {}: {}", self.channel, e);
        }

        debug!("Listener terminated for channel: {}", self.channel);
    }
}
