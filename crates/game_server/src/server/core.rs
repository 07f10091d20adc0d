//! Core game server implementation.
//!
//! This module contains the main `GameServer` struct: it binds the listening
//! socket, runs the accept loop and spawns one task per connection, every one
//! of which routes through the same shared dispatch registry.

use crate::{
    config::ServerConfig,
    connection::ConnectionManager,
    error::ServerError,
    server::handlers::handle_connection,
    shutdown::ShutdownState,
};
use handler_system::DispatchRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// The core game server structure.
///
/// `GameServer` is infrastructure only: it knows nothing about individual
/// actions. Each inbound message is routed through the [`DispatchRegistry`]
/// it was built with, so whatever the reload coordinator publishes is what
/// the next message sees.
///
/// # Architecture
///
/// * **Dispatch Registry**: Live `action -> handler` routes, shared with the reload coordinator
/// * **Connection Management**: WebSocket connection lifecycle and the connection cap
/// * **Shutdown Coordination**: Accept loop stops on a [`ShutdownState`] or on [`GameServer::shutdown`]
pub struct GameServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Routes consulted for every inbound message
    registry: Arc<DispatchRegistry>,

    /// Manager for client connections and messaging
    connection_manager: Arc<ConnectionManager>,

    /// Channel for coordinating server shutdown
    shutdown_sender: watch::Sender<bool>,
}

impl GameServer {
    /// Creates a new game server with the specified configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration parameters for server behavior
    /// * `registry` - The dispatch registry every connection routes through
    pub fn new(config: ServerConfig, registry: Arc<DispatchRegistry>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new(config.max_connections));
        let (shutdown_sender, _) = watch::channel(false);

        Self {
            config,
            registry,
            connection_manager,
            shutdown_sender,
        }
    }

    /// Starts the game server and begins accepting connections with graceful shutdown support.
    ///
    /// Binds the configured address and runs the accept loop until the
    /// provided shutdown state is initiated or [`GameServer::shutdown`] is
    /// called.
    ///
    /// # Errors
    ///
    /// `ServerError::Network` when the address cannot be bound.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_state).await
    }

    /// Starts the game server with a private shutdown state.
    ///
    /// The server runs until [`GameServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown_state(ShutdownState::new()).await
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address)))
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        let local_addr: Option<SocketAddr> = listener.local_addr().ok();
        info!(
            "🚀 Game server listening on {}",
            local_addr.map_or_else(|| self.config.bind_address.to_string(), |a| a.to_string())
        );
        info!(
            "🧭 {} action(s) routable, up to {} connection(s)",
            self.registry.len(),
            self.config.max_connections
        );

        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_state.wait_for_shutdown() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
                _ = async { let _ = shutdown_receiver.wait_for(|stop| *stop).await; } => {
                    info!("Internal shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let connection_manager = self.connection_manager.clone();
                        let registry = self.registry.clone();
                        let max_message_size = self.config.max_message_size;

                        // Spawn individual connection handler
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(
                                stream,
                                addr,
                                connection_manager,
                                registry,
                                max_message_size,
                            ).await {
                                debug!("Connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; back off instead of spinning
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        // Server shutdown cleanup
        info!("🧹 Performing server cleanup...");
        drop(listener);
        let closing = self.connection_manager.close_all().await;
        if closing > 0 {
            warn!("🔌 Closing {} open connection(s)", closing);
        }

        info!("✅ Server shutdown complete");
        Ok(())
    }

    /// Initiates server shutdown.
    ///
    /// Stops the accept loop and asks every open connection to close.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        self.shutdown_sender.send_replace(true);
        Ok(())
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The dispatch registry connections route through.
    pub fn registry(&self) -> Arc<DispatchRegistry> {
        self.registry.clone()
    }

    /// Number of currently open connections.
    pub async fn connection_count(&self) -> usize {
        self.connection_manager.connection_count().await
    }
}
