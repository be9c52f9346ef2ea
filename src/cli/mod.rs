//! Command Line Interface module
//!
//! Implements argument parsing for the chatrelay binary.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "chatrelay")]
#[command(about = "Chatrelay Terminal Chat Client")]
#[command(long_about = "A terminal chat client and channel session manager over a pub/sub store")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, default_value = "chatrelay.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Dry-run mode: show welcome page and configuration without connecting
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }

    /// Check if we're running in dry-run mode
    pub fn is_dry_run_mode(&self) -> bool {
        self.dry_run
    }
}
