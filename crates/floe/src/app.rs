//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that wires the handler
//! system to the network layer: it discovers and loads the handler modules
//! for the selected server role, starts the game server on the resulting
//! dispatch registry, keeps the registry fresh while handler files change,
//! and shuts everything down in order on a termination signal.

use crate::{
    cli::CliArgs,
    config::{AppConfig, ServerRole, ServerSettings},
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use game_server::{GameServer, ShutdownState};
use handler_system::{
    spawn_handler_watcher, DispatchRegistry, DylibLoader, ListenerTable, ModuleLoader, ReloadCoordinator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Main application struct.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from files and CLI
/// * **Handler Bootstrap**: Builds the dispatch registry for the server's role
/// * **Hot Reload**: Optional watch task that rebuilds one module at a time
/// * **Graceful Shutdown**: Handles termination signals and cleanup procedures
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Name of the server entry being run
    server_name: String,
    /// Settings of that entry
    settings: ServerSettings,
    /// Owns the module tree, loader and registry writes
    coordinator: ReloadCoordinator,
    /// Game server instance
    server: GameServer,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Discover and load the handler modules in scope for the server's role
    /// 6. Initialize the game server on the resulting dispatch registry
    ///
    /// Any module failing to load aborts startup.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        Self::apply_overrides(&mut config, &args);

        // Validate configuration
        if let Err(e) = config.validate(&args.server_name) {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        // Display banner after logging is setup
        display_banner();

        let settings = config.server(&args.server_name)?.clone();
        let server_config = config.to_server_config(&args.server_name)?;

        let loader: Arc<dyn ModuleLoader> = Arc::new(DylibLoader::new(
            args.to_module_safety_config(),
            config.handlers.shadow_directory(),
        ));
        let coordinator = Self::bootstrap_handlers(&config, settings.role, loader)?;

        let server = GameServer::new(server_config, coordinator.registry().clone());

        info!("🐧 Floe Game Server v{}", env!("CARGO_PKG_VERSION"));
        info!("🧩 {}", handler_system::handler_system_build_info());
        info!(
            "📂 Config: {} | Handlers: {}",
            args.config_path.display(),
            config.handlers.directory
        );

        Ok(Self {
            config,
            server_name: args.server_name,
            settings,
            coordinator,
            server,
        })
    }

    /// Applies command-line overrides on top of the loaded file.
    fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
        if let Some(handlers_dir) = &args.handlers_dir {
            config.handlers.directory = handlers_dir.to_string_lossy().to_string();
        }

        if let Some(bind_address) = &args.bind_address {
            if let Some(server) = config.server_mut(&args.server_name) {
                server.bind_address = bind_address.clone();
            }
        }

        if let Some(log_level) = &args.log_level {
            config.logging.level = log_level.clone();
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if args.no_hot_reload {
            config.handlers.hot_reload = false;
        }
    }

    /// Builds the coordinator for `role` and runs its initial build.
    fn bootstrap_handlers(
        config: &AppConfig,
        role: ServerRole,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<ReloadCoordinator, Box<dyn std::error::Error>> {
        let scope = config.handlers.scope_for(role);
        let mut coordinator = ReloadCoordinator::new(
            config.handlers.tree(),
            scope,
            loader,
            Arc::new(ListenerTable::new()),
            Arc::new(DispatchRegistry::new()),
        );

        let routes = coordinator.bootstrap()?;
        match role {
            ServerRole::Login => info!("🔑 Running login server ({} action(s) routable)", routes),
            ServerRole::World => info!("🌍 Running world server ({} action(s) routable)", routes),
        }
        Ok(coordinator)
    }

    /// Runs the application until a termination signal.
    ///
    /// # Shutdown Order
    ///
    /// 1. Stop the handler watch task, so no reload races the shutdown
    /// 2. Stop the accept loop and close open connections
    /// 3. Log final registry statistics
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Floe server {}", self.server_name);
        self.log_configuration_summary();

        let Application {
            config,
            server_name,
            settings,
            coordinator,
            server,
        } = self;

        let registry = coordinator.registry().clone();
        let listeners = coordinator.listeners().clone();

        // Create shutdown state for coordinated shutdown
        let shutdown_state = ShutdownState::new();

        // Start server in background
        let server_handle = {
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move {
                match server.start_with_shutdown_state(shutdown_state).await {
                    Ok(()) => {
                        info!("✅ Server completed successfully");
                    }
                    Err(e) => {
                        error!("❌ Server error: {}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        let (watcher, idle_coordinator) = if config.handlers.hot_reload {
            match spawn_handler_watcher(coordinator, config.handlers.debounce()) {
                Ok(watcher) => (Some(watcher), None),
                Err(e) => {
                    shutdown_state.initiate_shutdown();
                    return Err(e.into());
                }
            }
        } else {
            info!("⏸️ Hot reload disabled");
            (None, Some(coordinator))
        };

        info!("✅ Floe server {} is now running!", server_name);
        info!("🎮 Ready to accept connections on {}", settings.bind_address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        setup_signal_handlers().await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        // Phase 1: no more reloads
        info!("👀 Phase 1: Stopping handler watcher...");
        let coordinator = match watcher {
            Some(watcher) => watcher.stop().await,
            None => idle_coordinator,
        };

        // Phase 2: stop accepting and close connections
        info!("📡 Phase 2: Stopping accept loop...");
        shutdown_state.initiate_shutdown();
        match timeout(Duration::from_secs(8), server_handle).await {
            Ok(Ok(())) => info!("✅ Server task completed gracefully"),
            Ok(Err(e)) => warn!("Server task ended abnormally: {}", e),
            Err(_) => warn!("⏰ Server task did not complete within timeout, proceeding with cleanup"),
        }
        shutdown_state.complete_shutdown();

        // Phase 3: final statistics
        info!("📊 Final Statistics:");
        info!("  - Routable actions: {}", registry.len());
        info!("  - Registered listeners: {}", listeners.len());
        if let Some(coordinator) = &coordinator {
            info!("  - Handler modules loaded: {}", coordinator.module_count());
        }

        info!("✅ Floe server {} shutdown complete", server_name);
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.settings.bind_address);
        info!("  🎭 Role: {:?}", self.settings.role);
        info!(
            "  🔌 Handler tree: {} (package {})",
            self.config.handlers.directory, self.config.handlers.package
        );
        if self.settings.role == ServerRole::Login {
            info!("  🔑 Login modules: {:?}", self.config.handlers.login_modules);
        }
        info!(
            "  ♻️ Hot reload: {} (debounce {}ms)",
            self.config.handlers.hot_reload, self.config.handlers.debounce_ms
        );
        info!("  👥 Max connections: {}", self.settings.max_connections);
        info!("  🗄️ Database: {}@{}/{}", self.config.database.username, self.config.database.address, self.config.database.name);
        info!("  🧠 Redis: {}", self.config.redis.url());
        info!("  📊 Routable actions: {}", self.coordinator.registry().len());
    }

    /// Routable action ids, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self
            .coordinator
            .registry()
            .actions()
            .into_iter()
            .map(|a| a.as_str().to_string())
            .collect();
        actions.sort();
        actions
    }

    /// Handler tree root in use.
    pub fn handler_directory(&self) -> PathBuf {
        self.coordinator.tree().root().to_path_buf()
    }
}
