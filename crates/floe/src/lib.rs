//! # Floe Game Server - Main Entry Point
//!
//! Bootstraps one server of a Floe deployment: parses the CLI, loads the
//! configuration, sets up logging, discovers the handler modules for the
//! server's role and runs the game server until a termination signal.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the login server with default configuration
//! floe
//!
//! # Run a world server from a custom configuration
//! floe --config production.toml --server Blizzard
//!
//! # Override specific settings
//! floe --bind 0.0.0.0:6112 --handlers /opt/floe/Handlers --log-level debug
//!
//! # Freeze the handler set for this run
//! floe --no-hot-reload
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `floe.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)
//!
//! A second signal during shutdown exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;

/// Main entry point for the Floe Game Server.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    let mut logging_settings = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging_settings.level = level.clone();
    }
    let log_files = config
        .servers
        .get(&args.server_name)
        .and_then(|server| server.logging.clone());

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&logging_settings, args.json_logs, log_files.as_ref()) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{
    AppConfig, DatabaseSettings, HandlerSettings, LoggingSettings, RedisSettings, ServerLogFiles, ServerRole,
    ServerSettings,
};
