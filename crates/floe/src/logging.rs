//! Logging system setup and configuration.
//!
//! The console layer honours `RUST_LOG` and can print human-readable or JSON
//! lines. A server that declares log files additionally gets a general log
//! at the configured level, rotated by size, and an error log that only
//! receives `ERROR`.

use crate::config::{LoggingSettings, ServerLogFiles};
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initializes the logging system with the specified configuration.
///
/// # Arguments
///
/// * `config` - Logging configuration from the config file
/// * `json_format` - Whether to force JSON output format (CLI override)
/// * `files` - Log files of the selected server, if any
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
    files: Option<&ServerLogFiles>,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let console_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (json_console, plain_console) = if json_format || config.json_format {
        // JSON formatting with thread info for structured logging
        let layer = fmt::layer()
            .json()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_filter(console_filter());
        (Some(layer), None)
    } else {
        // Human-readable formatting with thread info for development
        let layer = fmt::layer()
            .with_ansi(true)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_filter(console_filter());
        (None, Some(layer))
    };

    let (general_layer, errors_layer) = match files {
        Some(files) => {
            let general = open_rotating_log(&files.general, files.rotate_bytes, files.rotate_backups)?;
            let errors = open_log_file(&files.errors)?;
            (
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(general)
                        .with_filter(EnvFilter::new(log_level)),
                ),
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(errors)
                        .with_filter(LevelFilter::ERROR),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(json_console)
        .with(plain_console)
        .with(general_layer)
        .with(errors_layer)
        .try_init()?;

    info!("🔧 Logging initialized with level: {}", log_level);
    if let Some(files) = files {
        info!(
            "📝 Writing logs to {} (errors: {})",
            files.general.display(),
            files.errors.display()
        );
    }
    Ok(())
}

/// Opens `path` for appending, creating its parent directories.
pub fn open_log_file(path: &Path) -> std::io::Result<Arc<File>> {
    create_parent(path)?;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Opens a log that moves to `path.1` once it exceeds `max_bytes`, keeping
/// at most `backups` rotated files.
pub fn open_rotating_log(
    path: &Path,
    max_bytes: usize,
    backups: usize,
) -> std::io::Result<Mutex<FileRotate<AppendCount>>> {
    create_parent(path)?;
    let writer = FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::Bytes(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    Ok(Mutex::new(writer))
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Displays the startup banner using proper logging.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🐧 FLOE SERVER 🐧           ║");
    info!("║                  v{:<10}             ║", version);
    info!("║                                          ║");
    info!("║  🔌 Hot-Reloadable Handler Modules       ║");
    info!("║  🧭 Lock-Free Action Routing             ║");
    info!("║  🌐 WebSocket Transport                  ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}
