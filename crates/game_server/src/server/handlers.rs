//! Connection handling logic for WebSocket clients.
//!
//! This module contains the per-connection task: WebSocket handshaking,
//! registration with the connection manager, the reader that routes every
//! inbound frame through the dispatch registry, and the writer that drains
//! the connection's outbound queue.

use crate::{
    connection::{ClientSession, ConnectionManager, Outbound},
    error::ServerError,
    messaging::route_client_message,
};
use futures::{SinkExt, StreamExt};
use handler_system::DispatchRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message};
use tracing::{debug, error, trace};

/// Handles a single client connection from establishment to cleanup.
///
/// # Connection Flow
///
/// 1. Perform WebSocket handshake
/// 2. Register with the connection manager (refused with a close frame when full)
/// 3. Run the reader and writer halves until either ends
/// 4. Deregister the connection
///
/// The registry is consulted per message, so a reload published while the
/// connection is open takes effect on its next frame.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_manager: Arc<ConnectionManager>,
    registry: Arc<DispatchRegistry>,
    max_message_size: usize,
) -> Result<(), ServerError> {
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(max_message_size))
        .max_frame_size(Some(max_message_size));

    // Perform WebSocket handshake
    let ws_stream = accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let connection_id = match connection_manager.add_connection(addr, outbound_tx.clone()).await {
        Ok(id) => id,
        Err(e) => {
            let refusal = Message::Close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: "Server full".into(),
            }));
            let _ = ws_sender.send(refusal).await;
            return Err(e);
        }
    };

    // Incoming message task - routes every text frame through the registry
    let incoming_task = {
        let registry = registry.clone();
        let mut session = ClientSession::new(connection_id, outbound_tx);

        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = route_client_message(text.as_str(), &mut session, &registry) {
                            trace!("❌ Message routing error: {}", e);
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        debug!("Ignoring binary frame from connection {}", connection_id);
                    }
                    Ok(Message::Close(_)) => {
                        debug!("🔌 Client {} requested close", connection_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error for connection {}: {}", connection_id, e);
                        break;
                    }
                    // Pings are answered by tungstenite itself
                    _ => {}
                }
            }
        }
    };

    // Outgoing message task
    let outgoing_task = async move {
        while let Some(item) = outbound_rx.recv().await {
            match item {
                Outbound::Message(message) => {
                    if let Err(e) = ws_sender.send(Message::Text(message.to_string().into())).await {
                        error!("Failed to send message: {}", e);
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    };

    // Run both tasks concurrently until one completes
    tokio::select! {
        _ = incoming_task => {},
        _ = outgoing_task => {},
    }

    connection_manager.remove_connection(connection_id).await;
    Ok(())
}
