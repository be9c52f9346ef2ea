//! Session Manager for the interactive terminal session
//!
//! The foreground control surface: one select loop over user input, events
//! forwarded by channel listeners, and (when active) the pattern feed.
//! The original nested-prompt flow is modeled as an explicit input-mode
//! state machine so listener output can interleave with prompts.

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError, ChatMessage, Delivery, Subscription};
use crate::config::Config;
use crate::services::{MimicResponder, MimicSession, StockService, WeatherService};
use crate::ui;
use crate::users::{UserDirectory, UserProfile};

use super::SessionError;
use super::events::{EventChannel, SessionEvent};
use super::registry::ChannelRegistry;

/// Session state tracking
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

/// Session statistics for monitoring
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: Instant,
    pub commands_processed: u64,
    pub messages_forwarded: u64,
    pub errors_encountered: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            commands_processed: 0,
            messages_forwarded: 0,
            errors_encountered: 0,
        }
    }
}

/// What the next line of input means
enum InputMode {
    Menu,
    IdentifyName,
    IdentifyAge {
        name: String,
    },
    IdentifyGender {
        name: String,
        age: String,
    },
    IdentifyLocation {
        name: String,
        age: String,
        gender: String,
    },
    JoinChannel,
    LeaveChannel,
    SendChannel,
    SendBody {
        channel: String,
    },
    AnonChannel,
    AnonBody {
        channel: String,
    },
    InspectUser,
    StockTicker,
    PatternInput,
    PatternWatch,
    Channel {
        name: String,
    },
    MimicPick {
        channel: String,
    },
    Mimic {
        channel: String,
        session: MimicSession,
    },
}

/// Main session manager for the interactive terminal
pub struct SessionManager {
    /// Application configuration
    config: Config,
    /// Pub/sub backend handle
    backend: Arc<dyn Backend>,
    /// Channel registry owning the listeners
    registry: ChannelRegistry,
    /// Event channel fed by listeners
    events: EventChannel,
    /// User identity store
    users: UserDirectory,
    /// Weather provider
    weather: WeatherService,
    /// Stock provider
    stocks: StockService,
    /// Tone-mimicking responder
    mimic: MimicResponder,
    /// Async stdin lines
    lines: Lines<BufReader<Stdin>>,
    /// Identified user, if any
    current_user: Option<String>,
    /// Input mode state machine
    mode: InputMode,
    /// Active pattern feed, foreground-driven
    pattern_feed: Option<Box<dyn Subscription>>,
    /// Listener poll timeout
    poll_timeout: Duration,
    /// Session state
    state: SessionState,
    /// Session statistics
    stats: SessionStats,
}

impl SessionManager {
    /// Create a new SessionManager
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        info!("Creating new SessionManager");

        let events = EventChannel::new();
        let poll_timeout = Duration::from_millis(config.backend.poll_timeout_ms);

        let registry = ChannelRegistry::new(backend.clone(), events.event_tx(), poll_timeout);
        let users = UserDirectory::new(backend.clone());
        let weather = WeatherService::new(backend.clone(), config.weather.clone());
        let stocks = StockService::new(backend.clone(), config.stocks.clone());
        let mimic = MimicResponder::new(config.mimic.clone());

        Self {
            config,
            backend,
            registry,
            events,
            users,
            weather,
            stocks,
            mimic,
            lines: BufReader::new(tokio::io::stdin()).lines(),
            current_user: None,
            mode: InputMode::Menu,
            pattern_feed: None,
            poll_timeout,
            state: SessionState::Starting,
            stats: SessionStats::default(),
        }
    }

    /// Initialize and run the interactive session
    pub async fn start(&mut self) -> Result<()> {
        self.initialize().await?;
        self.run().await
    }

    /// Initialize the session
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing interactive session");

        let fact = format!(
            "I'm {}. I relay messages through a pub/sub store and never sleep!",
            self.config.bot_name
        );
        self.backend.kv_set("fun_fact", &fact).await?;

        self.stocks.spawn_prefetch();

        ui::print_welcome(&self.config.bot_name);

        self.state = SessionState::Running;
        info!("Session initialized successfully");

        Ok(())
    }

    /// Run the main session loop
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting interactive session loop");
        ui::print_menu();

        while self.state != SessionState::Terminated {
            let poll_timeout = self.poll_timeout;
            tokio::select! {
                // Handle user input
                line = self.lines.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_line(line).await,
                        Ok(None) => {
                            info!("Input stream closed, shutting down");
                            self.shutdown().await;
                        }
                        Err(e) => {
                            error!("Failed to read input: {}", e);
                            self.shutdown().await;
                        }
                    }
                }

                // Handle events forwarded by channel listeners
                Some(event) = self.events.next_event() => {
                    self.handle_event(event);
                }

                // Drive the pattern feed while watching
                delivery = Self::poll_feed(&mut self.pattern_feed, poll_timeout),
                    if self.pattern_feed.is_some() =>
                {
                    self.handle_feed_result(delivery);
                }
            }
        }

        info!("Session loop terminated");
        Ok(())
    }

    async fn poll_feed(
        feed: &mut Option<Box<dyn Subscription>>,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BackendError> {
        match feed {
            Some(subscription) => subscription.next_message(timeout).await,
            // Branch is disabled by its precondition when no feed is active.
            None => std::future::pending().await,
        }
    }

    /// Handle a session event from a listener
    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ChannelMessage { channel, message } => {
                self.stats.messages_forwarded += 1;
                ui::print_channel_message(&channel, &message);
            }
            SessionEvent::ListenerStopped { channel, reason } => {
                self.stats.errors_encountered += 1;
                println!(
                    "{}",
                    format!("Stopped listening to {} ({})", channel, reason).yellow()
                );
            }
        }
    }

    /// Handle the outcome of one pattern feed poll
    fn handle_feed_result(&mut self, delivery: Result<Option<Delivery>, BackendError>) {
        match delivery {
            Ok(Some(delivery)) => {
                self.stats.messages_forwarded += 1;
                ui::print_pattern_message(&delivery);
            }
            Ok(None) => {}
            Err(e) => {
                error!("Pattern feed failed: {}", e);
                self.stats.errors_encountered += 1;
                println!("{}", format!("Pattern watch stopped: {}", e).yellow());
                self.pattern_feed = None;
                if matches!(self.mode, InputMode::PatternWatch) {
                    self.mode = InputMode::Menu;
                    ui::print_menu();
                }
            }
        }
    }

    /// Dispatch one line of input according to the current mode
    async fn handle_line(&mut self, line: String) {
        let mode = std::mem::replace(&mut self.mode, InputMode::Menu);

        match mode {
            InputMode::Menu => self.handle_menu(line.trim()).await,
            InputMode::IdentifyName => self.handle_identify_name(line),
            InputMode::IdentifyAge { name } => {
                ui::prompt("Enter your gender: ");
                self.mode = InputMode::IdentifyGender {
                    name,
                    age: line.trim().to_string(),
                };
            }
            InputMode::IdentifyGender { name, age } => {
                ui::prompt("Enter your location: ");
                self.mode = InputMode::IdentifyLocation {
                    name,
                    age,
                    gender: line.trim().to_string(),
                };
            }
            InputMode::IdentifyLocation { name, age, gender } => {
                self.finish_identify(name, age, gender, line.trim().to_string())
                    .await;
            }
            InputMode::JoinChannel => self.handle_join(line.trim()).await,
            InputMode::LeaveChannel => self.handle_leave(line.trim()).await,
            InputMode::SendChannel => {
                ui::prompt("Enter your message: ");
                self.mode = InputMode::SendBody {
                    channel: line.trim().to_string(),
                };
            }
            InputMode::SendBody { channel } => {
                let user = self.current_user.clone().unwrap_or_default();
                self.send_message(&channel, line.trim(), &user).await;
            }
            InputMode::AnonChannel => {
                ui::prompt("Enter your message: ");
                self.mode = InputMode::AnonBody {
                    channel: line.trim().to_string(),
                };
            }
            InputMode::AnonBody { channel } => {
                self.send_message(&channel, line.trim(), "Anonymous").await;
            }
            InputMode::InspectUser => self.handle_inspect(line.trim()).await,
            InputMode::StockTicker => self.handle_stock(line.trim()).await,
            InputMode::PatternInput => self.handle_pattern(line.trim()).await,
            InputMode::PatternWatch => self.handle_pattern_watch(line.trim()).await,
            InputMode::Channel { name } => self.handle_channel_input(name, line.trim()).await,
            InputMode::MimicPick { channel } => self.handle_mimic_pick(channel, line.trim()).await,
            InputMode::Mimic { channel, session } => {
                self.handle_mimic_input(channel, session, line.trim()).await;
            }
        }

        if matches!(self.mode, InputMode::Menu) && self.state == SessionState::Running {
            ui::print_menu();
        }
    }

    /// Handle a main-menu option or bang command
    async fn handle_menu(&mut self, input: &str) {
        if input.is_empty() {
            return;
        }
        self.stats.commands_processed += 1;

        if let Some(city) = input.strip_prefix("!weather ") {
            self.handle_weather(city.trim()).await;
            return;
        }

        match input {
            "1" => {
                ui::prompt("Enter your username: ");
                self.mode = InputMode::IdentifyName;
            }
            "2" => {
                if self.require_identity() {
                    ui::prompt("Enter the channel name to join: ");
                    self.mode = InputMode::JoinChannel;
                }
            }
            "3" => {
                if self.require_identity() {
                    ui::prompt("Enter the channel name to leave: ");
                    self.mode = InputMode::LeaveChannel;
                }
            }
            "4" => {
                if self.require_identity() {
                    ui::prompt("Enter the channel name: ");
                    self.mode = InputMode::SendChannel;
                }
            }
            "5" => {
                ui::prompt("Enter username to get info about: ");
                self.mode = InputMode::InspectUser;
            }
            "6" => {
                println!("Exiting...");
                self.shutdown().await;
            }
            "7" => {
                if self.require_identity() {
                    ui::prompt("Enter the pattern to join multiple channels: ");
                    self.mode = InputMode::PatternInput;
                }
            }
            "!help" => ui::print_help(),
            "!fact" => self.handle_fact().await,
            "!whoami" => self.handle_whoami().await,
            "!stock" => {
                ui::prompt("Enter the stock ticker: ");
                self.mode = InputMode::StockTicker;
            }
            "!4" => {
                ui::prompt("Enter the channel name: ");
                self.mode = InputMode::AnonChannel;
            }
            _ => println!("Invalid option. Please try again."),
        }
    }

    fn handle_identify_name(&mut self, line: String) {
        let name = line.trim();
        if name == "System" || name.is_empty() {
            println!("Invalid username. Please try again.");
            ui::prompt("Enter your username: ");
            self.mode = InputMode::IdentifyName;
            return;
        }

        ui::prompt("Enter your age: ");
        self.mode = InputMode::IdentifyAge {
            name: name.to_string(),
        };
    }

    async fn finish_identify(&mut self, name: String, age: String, gender: String, location: String) {
        if age.is_empty() || gender.is_empty() || location.is_empty() {
            println!("You haven't filled all the fields. Please try again.");
            return;
        }

        let profile = UserProfile {
            user_name: name.clone(),
            user_age: age,
            user_gender: gender,
            user_location: location,
        };

        match self.users.set_profile(&profile).await {
            Ok(()) => {
                info!("User identified as {}", name);
                println!("You are now identified as {}.", name.bold());
                self.current_user = Some(name);
            }
            Err(e) => {
                error!("Failed to store profile for {}: {}", name, e);
                println!("Failed to store your profile: {}", e);
            }
        }
    }

    async fn handle_join(&mut self, channel: &str) {
        if channel.is_empty() {
            println!("Channel name must not be empty.");
            return;
        }

        let user = self.current_user.clone().unwrap_or_default();
        match self.registry.join(channel, &user).await {
            Ok(()) => {
                println!(
                    "Listening to {}. Type '!history' to see chat history, '!leave' to leave \
                     the channel, '!mimic tone' to mimic the tone of a user.",
                    channel.cyan()
                );
                self.mode = InputMode::Channel {
                    name: channel.to_string(),
                };
            }
            Err(e @ SessionError::AlreadyJoined(_)) => {
                println!("{}", e);
            }
            Err(e) => {
                error!("Failed to join {}: {}", channel, e);
                self.stats.errors_encountered += 1;
                println!("Failed to join {}: {}", channel, e);
            }
        }
    }

    async fn handle_leave(&mut self, channel: &str) {
        let user = self.current_user.clone().unwrap_or_default();
        match self.registry.leave(channel, &user).await {
            Ok(()) => println!("Left channel {}", channel),
            Err(e @ SessionError::NotJoined(_)) => println!("{}", e),
            Err(e) => {
                error!("Failed to leave {}: {}", channel, e);
                self.stats.errors_encountered += 1;
                println!("Failed to leave {}: {}", channel, e);
            }
        }
    }

    /// Handle a line typed while inside a joined channel
    async fn handle_channel_input(&mut self, name: String, input: &str) {
        match input {
            "" => {
                self.mode = InputMode::Channel { name };
            }
            "!history" => {
                match self.backend.read_history(&name).await {
                    Ok(records) => ui::print_history(&name, &records),
                    Err(e) => println!("Failed to read history: {}", e),
                }
                self.mode = InputMode::Channel { name };
            }
            "!leave" => {
                let user = self.current_user.clone().unwrap_or_default();
                match self.registry.leave(&name, &user).await {
                    Ok(()) => {
                        println!("Left channel {}", name);
                        println!("Welcome back to the main menu!");
                    }
                    Err(e) => println!("{}", e),
                }
            }
            "!mimic tone" => {
                ui::prompt("Enter the username to mimic the tone: ");
                self.mode = InputMode::MimicPick { channel: name };
            }
            text => {
                let user = self.current_user.clone().unwrap_or_default();
                self.send_message(&name, text, &user).await;
                self.mode = InputMode::Channel { name };
            }
        }
    }

    async fn handle_mimic_pick(&mut self, channel: String, target: &str) {
        let profile = match self.users.get_profile(target).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                println!("User {} not found.", target);
                self.mode = InputMode::Channel { name: channel };
                return;
            }
            Err(e) => {
                println!("Failed to look up {}: {}", target, e);
                self.mode = InputMode::Channel { name: channel };
                return;
            }
        };

        let transcript = match self.backend.read_history(&channel).await {
            Ok(records) => records,
            Err(e) => {
                println!("Failed to read history: {}", e);
                self.mode = InputMode::Channel { name: channel };
                return;
            }
        };

        let session = self.mimic.start_session(target, &profile, &transcript);
        println!(
            "Started to mimic the tone of {}. Type '!leave' to stop.",
            target.bold()
        );
        ui::prompt("You: ");
        self.mode = InputMode::Mimic { channel, session };
    }

    async fn handle_mimic_input(&mut self, channel: String, mut session: MimicSession, input: &str) {
        if input == "!leave" {
            println!("Stopped mimicking the tone.");
            println!("Welcome back to the normal chat!");
            self.mode = InputMode::Channel { name: channel };
            return;
        }

        match self.mimic.reply(&mut session, input).await {
            Ok(reply) => {
                println!("Bot mimicking {}: {}", session.target.bold(), reply);
                ui::prompt("You: ");
                self.mode = InputMode::Mimic { channel, session };
            }
            Err(e) => {
                error!("Mimic turn failed: {}", e);
                println!("Error: {}", e);
                self.mode = InputMode::Channel { name: channel };
            }
        }
    }

    async fn handle_pattern(&mut self, pattern: &str) {
        if pattern.is_empty() {
            println!("Pattern must not be empty.");
            return;
        }

        let user = self.current_user.clone().unwrap_or_default();
        match self.registry.pattern_feed(pattern, &user).await {
            Ok(feed) => {
                println!(
                    "Watching channels matching '{}'. Type '!leave' to stop.",
                    pattern.cyan()
                );
                self.pattern_feed = Some(feed);
                self.mode = InputMode::PatternWatch;
            }
            Err(e) => {
                error!("Failed to watch pattern {}: {}", pattern, e);
                println!("Failed to watch pattern {}: {}", pattern, e);
            }
        }
    }

    async fn handle_pattern_watch(&mut self, input: &str) {
        if input == "!leave" {
            if let Some(mut feed) = self.pattern_feed.take() {
                if let Err(e) = feed.unsubscribe().await {
                    warn!("Error unsubscribing pattern feed: {}", e);
                }
            }
            println!("Stopped watching pattern.");
        } else {
            println!("Type '!leave' to stop watching.");
            self.mode = InputMode::PatternWatch;
        }
    }

    async fn handle_inspect(&mut self, name: &str) {
        match self.users.get_profile(name).await {
            Ok(Some(profile)) => ui::print_profile(&profile),
            Ok(None) => println!("User {} not found.", name),
            Err(e) => println!("Failed to look up {}: {}", name, e),
        }
    }

    async fn handle_stock(&mut self, ticker: &str) {
        match self.stocks.series(ticker).await {
            Ok(series) => print!("{}", ui::chart::render(&series)),
            Err(e) => {
                debug!("Stock lookup for {} failed: {}", ticker, e);
                println!("Stock data for {} not found.", ticker);
                println!("Available tickers: {}", self.stocks.tickers().join(", "));
            }
        }
    }

    async fn handle_weather(&mut self, city: &str) {
        if city.is_empty() {
            println!("Usage: !weather <city>");
            return;
        }

        match self.weather.lookup(city).await {
            Ok(report) => {
                if let Some(yesterday) = report.yesterday {
                    println!("Weather in {} yesterday: {}", city, yesterday);
                }
                println!("Weather in {} today: {}", city, report.today);
            }
            Err(e) => {
                debug!("Weather lookup for {} failed: {}", city, e);
                println!("Weather data for {} not found.", city);
                match self.weather.cached_cities().await {
                    Ok(cities) => ui::print_cities(&cities),
                    Err(e) => warn!("Failed to list cached cities: {}", e),
                }
            }
        }
    }

    async fn handle_fact(&mut self) {
        match self.backend.kv_get("fun_fact").await {
            Ok(Some(fact)) => println!("Some fun facts about me: {}", fact),
            Ok(None) => println!("No fun facts today."),
            Err(e) => println!("Failed to fetch fun fact: {}", e),
        }
    }

    async fn handle_whoami(&mut self) {
        match &self.current_user {
            Some(user) => {
                println!("Current User: {}", user.bold());
                match self.users.get_profile(user).await {
                    Ok(Some(profile)) => ui::print_profile(&profile),
                    Ok(None) => {}
                    Err(e) => println!("Failed to load your profile: {}", e),
                }
            }
            None => println!("Current User: not identified"),
        }
    }

    /// Publish a message, which also appends it to the channel history
    async fn send_message(&mut self, channel: &str, text: &str, username: &str) {
        if text.is_empty() {
            return;
        }

        let message = ChatMessage::new(username, text);
        if let Err(e) = self.backend.publish(channel, &message).await {
            error!("Failed to send message to {}: {}", channel, e);
            self.stats.errors_encountered += 1;
            println!("Failed to send message: {}", e);
        }
    }

    /// Channel actions require an identified user
    fn require_identity(&self) -> bool {
        if self.current_user.is_some() {
            return true;
        }
        println!(
            "{}",
            SessionError::IdentityRequired.to_string().bold()
        );
        false
    }

    /// Graceful shutdown: stop the pattern feed and leave every channel
    pub async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        self.state = SessionState::ShuttingDown;

        if let Some(mut feed) = self.pattern_feed.take() {
            if let Err(e) = feed.unsubscribe().await {
                warn!("Error unsubscribing pattern feed: {}", e);
            }
        }

        let user = self.current_user.clone().unwrap_or_default();
        self.registry.shutdown_all(&user).await;

        info!(
            "Session finished after {:?}: {} commands, {} messages forwarded, {} errors",
            self.stats.started_at.elapsed(),
            self.stats.commands_processed,
            self.stats.messages_forwarded,
            self.stats.errors_encountered
        );
        self.state = SessionState::Terminated;
    }

    /// Get session statistics
    pub fn get_stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Get session state
    pub fn get_state(&self) -> &SessionState {
        &self.state
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.state != SessionState::Terminated {
            warn!("SessionManager dropped without proper shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn test_manager() -> SessionManager {
        let mut config = Config::default();
        config.backend.mode = "memory".to_string();
        config.backend.poll_timeout_ms = 50;
        SessionManager::new(config, Arc::new(MemoryBackend::new()))
    }

    async fn identify(manager: &mut SessionManager, name: &str) {
        manager.handle_line("1".to_string()).await;
        manager.handle_line(name.to_string()).await;
        manager.handle_line("30".to_string()).await;
        manager.handle_line("f".to_string()).await;
        manager.handle_line("Nashville".to_string()).await;
    }

    #[tokio::test]
    async fn test_join_requires_identity() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;

        manager.handle_line("2".to_string()).await;

        assert!(matches!(manager.mode, InputMode::Menu));
        assert!(manager.registry.joined_channels().is_empty());
    }

    #[tokio::test]
    async fn test_identify_flow_stores_profile() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;

        identify(&mut manager, "alice").await;

        assert_eq!(manager.current_user.as_deref(), Some("alice"));
        let profile = manager.users.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.user_location, "Nashville");
    }

    #[tokio::test]
    async fn test_reserved_username_is_rejected() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;

        manager.handle_line("1".to_string()).await;
        manager.handle_line("System".to_string()).await;

        // Still waiting for a valid name
        assert!(matches!(manager.mode, InputMode::IdentifyName));
        assert!(manager.current_user.is_none());
    }

    #[tokio::test]
    async fn test_join_and_leave_through_channel_mode() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;
        identify(&mut manager, "alice").await;

        manager.handle_line("2".to_string()).await;
        manager.handle_line("general".to_string()).await;

        assert!(matches!(manager.mode, InputMode::Channel { .. }));
        assert!(manager.registry.joined("general"));

        manager.handle_line("!leave".to_string()).await;

        assert!(matches!(manager.mode, InputMode::Menu));
        assert!(!manager.registry.joined("general"));
    }

    #[tokio::test]
    async fn test_channel_input_is_published_to_history() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;
        identify(&mut manager, "alice").await;

        manager.handle_line("2".to_string()).await;
        manager.handle_line("general".to_string()).await;
        manager.handle_line("hello everyone".to_string()).await;

        let history = manager.backend.read_history("general").await.unwrap();
        assert!(history.contains(&ChatMessage::new("alice", "hello everyone")));
        // Join notice is published before the first chat line
        assert_eq!(history[0].username, "System");

        manager.handle_line("!leave".to_string()).await;
    }

    #[tokio::test]
    async fn test_menu_option_six_terminates() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;

        manager.handle_line("6".to_string()).await;

        assert_eq!(manager.state, SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_invalid_option_stays_in_menu() {
        let mut manager = test_manager();
        manager.state = SessionState::Running;

        manager.handle_line("99".to_string()).await;

        assert!(matches!(manager.mode, InputMode::Menu));
    }
}
