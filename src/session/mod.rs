//! Interactive session module
//!
//! The channel session core: per-channel listeners, the registry that owns
//! them, and the foreground session loop.

pub mod events;
pub mod listener;
pub mod registry;
pub mod session_manager;

pub use events::{EventChannel, SessionEvent};
pub use listener::ChannelListener;
pub use registry::ChannelRegistry;
pub use session_manager::SessionManager;

use crate::backend::BackendError;

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("already joined channel: {0}")]
    AlreadyJoined(String),
    #[error("not joined to channel: {0}")]
    NotJoined(String),
    #[error("you need to identify yourself first")]
    IdentityRequired,
    #[error(transparent)]
    Backend(#[from] BackendError),
}
