//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Display name the client announces itself under
    pub bot_name: String,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Pub/sub backend configuration
    pub backend: BackendConfig,

    /// Weather provider configuration
    pub weather: WeatherConfig,

    /// Stock provider configuration
    pub stocks: StocksConfig,

    /// Tone-mimicking responder configuration
    pub mimic: MimicConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend mode: "redis" (RESP over TCP) or "memory" (in-process broker)
    pub mode: String,

    /// Backend address, host:port
    pub addr: String,

    /// Bounded poll timeout for channel listeners in milliseconds;
    /// also the worst-case leave latency
    pub poll_timeout_ms: u64,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Current-weather endpoint, OpenWeatherMap style
    pub api_url: String,

    /// API key; empty means cache-only lookups
    pub api_key: String,

    /// Country suffix appended to city queries
    pub country: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StocksConfig {
    /// Chart endpoint base URL, Yahoo chart style
    pub api_url: String,

    /// Tickers prefetched into the cache at session start
    pub tickers: Vec<String>,

    /// History range requested from the provider
    pub range: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MimicConfig {
    /// Chat completions endpoint, OpenAI compatible
    pub api_url: String,

    /// API key; empty disables the mimic command
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Completion token cap per turn
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Absolute or relative path to the log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_name: "Chatrelay".to_string(),
            log_level: "info".to_string(),
            log: LogConfig::default(),
            backend: BackendConfig::default(),
            weather: WeatherConfig::default(),
            stocks: StocksConfig::default(),
            mimic: MimicConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: "redis".to_string(),
            addr: "127.0.0.1:6379".to_string(),
            poll_timeout_ms: 2000,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
            api_key: String::new(),
            country: "US".to_string(),
        }
    }
}

impl Default for StocksConfig {
    fn default() -> Self {
        Self {
            api_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
            tickers: [
                "AAPL", "GOOGL", "AMZN", "MSFT", "TSLA", "META", "NVDA", "PYPL", "INTC", "ADBE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            range: "6mo".to_string(),
        }
    }
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 150,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/chatrelay.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // CHATRELAY_BOT_NAME - announced display name
        if let Ok(bot_name) = env::var("CHATRELAY_BOT_NAME") {
            if !bot_name.trim().is_empty() {
                self.bot_name = bot_name;
            }
        }

        // CHATRELAY_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("CHATRELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // CHATRELAY_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("CHATRELAY_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // CHATRELAY_BACKEND_MODE - "redis" or "memory"
        if let Ok(mode) = env::var("CHATRELAY_BACKEND_MODE") {
            self.backend.mode = mode;
        }

        // CHATRELAY_BACKEND_ADDR - backend host:port
        if let Ok(addr) = env::var("CHATRELAY_BACKEND_ADDR") {
            self.backend.addr = addr;
        }

        // CHATRELAY_POLL_TIMEOUT_MS - listener poll timeout
        if let Ok(timeout) = env::var("CHATRELAY_POLL_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.backend.poll_timeout_ms = value;
            }
        }

        // CHATRELAY_CONNECT_TIMEOUT_MS - backend connect timeout
        if let Ok(timeout) = env::var("CHATRELAY_CONNECT_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.backend.connect_timeout_ms = value;
            }
        }

        // CHATRELAY_WEATHER_API_URL / CHATRELAY_WEATHER_API_KEY
        if let Ok(api_url) = env::var("CHATRELAY_WEATHER_API_URL") {
            self.weather.api_url = api_url;
        }
        if let Ok(api_key) = env::var("CHATRELAY_WEATHER_API_KEY") {
            self.weather.api_key = api_key;
        }

        // CHATRELAY_STOCKS_API_URL - chart endpoint base
        if let Ok(api_url) = env::var("CHATRELAY_STOCKS_API_URL") {
            self.stocks.api_url = api_url;
        }

        // CHATRELAY_STOCKS_TICKERS - comma-separated list of tickers
        if let Ok(tickers) = env::var("CHATRELAY_STOCKS_TICKERS") {
            self.stocks.tickers = tickers
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // CHATRELAY_MIMIC_API_URL / CHATRELAY_MIMIC_API_KEY / CHATRELAY_MIMIC_MODEL
        if let Ok(api_url) = env::var("CHATRELAY_MIMIC_API_URL") {
            self.mimic.api_url = api_url;
        }
        if let Ok(api_key) = env::var("CHATRELAY_MIMIC_API_KEY") {
            self.mimic.api_key = api_key;
        }
        if let Ok(model) = env::var("CHATRELAY_MIMIC_MODEL") {
            self.mimic.model = model;
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.backend.mode.as_str() {
            "redis" | "memory" => {}
            other => anyhow::bail!("Unsupported backend mode: {}", other),
        }

        if self.backend.addr.trim().is_empty() {
            anyhow::bail!("Backend address must not be empty");
        }

        if self.backend.poll_timeout_ms == 0 {
            anyhow::bail!("Poll timeout must be greater than 0");
        }

        if self.backend.connect_timeout_ms == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        if !(0.0..=2.0).contains(&self.mimic.temperature) {
            anyhow::bail!(
                "mimic.temperature must be between 0.0 and 2.0, got {}",
                self.mimic.temperature
            );
        }

        if self.mimic.max_tokens == 0 {
            anyhow::bail!("mimic.max_tokens must be greater than 0");
        }

        for ticker in &self.stocks.tickers {
            if ticker.is_empty() {
                anyhow::bail!("Stock ticker must not be empty");
            }
        }

        Ok(())
    }

    /// Display configuration summary
    pub fn display_summary(&self) -> Result<()> {
        println!("Configuration summary:");
        println!("  backend: {} ({})", self.backend.mode, self.backend.addr);
        println!("  poll timeout: {}ms", self.backend.poll_timeout_ms);
        println!("  log file: {}", self.log.file_path);
        println!(
            "  weather API key: {}",
            if self.weather.api_key.is_empty() {
                "not configured"
            } else {
                "configured"
            }
        );
        println!(
            "  mimic API key: {}",
            if self.mimic.api_key.is_empty() {
                "not configured"
            } else {
                "configured"
            }
        );
        println!("  stock tickers: {}", self.stocks.tickers.join(", "));
        Ok(())
    }
}
