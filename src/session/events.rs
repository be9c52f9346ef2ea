//! Event Channel for asynchronous event processing

use anyhow::Result;
use tokio::sync::mpsc;

use crate::backend::ChatMessage;

/// Session events for communication between listeners and the session loop
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message forwarded by a channel listener
    ChannelMessage {
        channel: String,
        message: ChatMessage,
    },
    /// A listener exited on its own (backend failure treated as implicit
    /// cancellation)
    ListenerStopped { channel: String, reason: String },
}

/// Event channel between channel listeners and the session loop
pub struct EventChannel {
    /// Event sender
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Event receiver
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Clone for EventChannel {
    fn clone(&self) -> Self {
        Self {
            event_tx: self.event_tx.clone(),
            event_rx: None, // Receivers cannot be cloned
        }
    }
}

impl EventChannel {
    /// Create a new EventChannel
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Send event to channel
    pub fn send_event(&self, event: SessionEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|e| anyhow::anyhow!("Failed to send event: {}", e))
    }

    /// Get next event from channel
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event_rx) = &mut self.event_rx {
            event_rx.recv().await
        } else {
            None
        }
    }

    /// Get event sender for external use
    pub fn event_tx(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Get event receiver for external use
    pub fn event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
