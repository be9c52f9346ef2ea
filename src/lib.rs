//! Chatrelay Terminal Chat Library
//!
//! A terminal chat client and channel session manager layered over a
//! Redis-style publish/subscribe store, focusing on per-channel listener
//! lifecycle and clean cooperative teardown.

pub mod backend;
pub mod cli;
pub mod config;
pub mod services;
pub mod session;
pub mod ui;
pub mod users;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing subscriber for logging
///
/// Log lines go to the configured file so they do not interleave with the
/// interactive prompt; the returned guard must be kept alive for the
/// lifetime of the process.
pub fn init_logging(level: &str, file_path: &str) -> Result<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let path = std::path::Path::new(file_path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => std::path::Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chatrelay.log".to_string());

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatrelay={}", level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}
