//! Pub/sub backend integration module
//!
//! Wraps the publish/subscribe store behind the `Backend` trait: a RESP
//! client for Redis-compatible servers and an in-process broker for
//! offline use and tests.

pub mod memory;
pub mod redis;
pub mod resp;
pub mod traits;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::BackendConfig;

// Re-export commonly used types
pub use memory::MemoryBackend;
pub use redis::RedisBackend;
pub use traits::{Backend, Subscription};
pub use types::{BackendError, ChatMessage, Delivery};

/// Build the backend selected by configuration
pub async fn connect(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match config.mode.as_str() {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        _ => {
            let backend = RedisBackend::connect(
                &config.addr,
                Duration::from_millis(config.connect_timeout_ms),
            )
            .await
            .with_context(|| format!("Failed to connect to backend at {}", config.addr))?;
            Ok(Arc::new(backend))
        }
    }
}
