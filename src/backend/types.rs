//! Pub/sub backend data types and structures

use serde::{Deserialize, Serialize};

/// A chat message as published and persisted
///
/// Wire format is JSON: `{"username": ..., "message": ...}`. History order
/// stands in for timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
}

impl ChatMessage {
    /// Create a message attributed to a user
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
        }
    }

    /// Create a System-attributed notice
    pub fn system(message: impl Into<String>) -> Self {
        Self::new("System", message)
    }
}

/// A message as yielded by a subscription
///
/// Pattern subscriptions span many channels, so every delivery carries the
/// concrete channel it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    pub message: ChatMessage,
}

/// Error types for backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("subscription closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
