use chatrelay::{
    AppResult, backend, cli::Cli, config::Config, init_logging, session::SessionManager, ui,
};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let config = Config::load_or_default(&cli.config_file);

    // Initialize logging
    let _log_guard = init_logging(&cli.effective_log_level(), &config.log.file_path)?;

    tracing::info!("Chatrelay starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    if cli.is_dry_run_mode() {
        ui::print_welcome(&config.bot_name);
        config.display_summary()?;
        return Ok(());
    }

    // Connect to the pub/sub backend; a connection failure here is an
    // unrecoverable startup error.
    let backend = backend::connect(&config.backend).await?;

    // Create and run the interactive session
    let mut session = SessionManager::new(config, backend);
    session.start().await?;

    Ok(())
}
