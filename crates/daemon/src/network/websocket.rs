//! WebSocket transport for the terminal protocol.
//!
//! Each accepted connection gets its own [`Connection`] routing context.
//! Text frames carry JSON and binary frames carry MessagePack; replies and
//! session events are always sent as JSON text frames. When the socket
//! closes, every session the connection opened is closed with it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::router::{Connection, RouterError, SessionRouter};
use crate::session::EVENT_CHANNEL_CAPACITY;

/// Accepts WebSocket clients and serves the terminal protocol.
pub struct WebSocketServer {
    listener: TcpListener,
    router: Arc<SessionRouter>,
}

impl WebSocketServer {
    /// Binds the listener.
    pub async fn bind(addr: &str, router: Arc<SessionRouter>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", addr))?;
        Ok(Self { listener, router })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "WebSocket server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("WebSocket server stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let router = Arc::clone(&self.router);
                    let shutdown = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, peer, router, shutdown).await {
                            tracing::warn!(%peer, "connection ended with error: {:#}", e);
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

/// Serves one client until it disconnects or the server shuts down.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<SessionRouter>,
    shutdown: CancellationToken,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    tracing::info!(%peer, "Client connected");

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut conn = Connection::new(events_tx);

    let result: Result<()> = async {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws_sink.send(WsMessage::Close(None)).await;
                    break;
                }
                Some(event) = events_rx.recv() => {
                    let reply = conn.to_server_message(event);
                    ws_sink.send(encode(&reply)?).await?;
                }
                frame = ws_stream.next() => {
                    let message = match frame {
                        Some(Ok(WsMessage::Text(text))) => ClientMessage::from_json(&text),
                        Some(Ok(WsMessage::Binary(bytes))) => ClientMessage::from_msgpack(&bytes),
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!(%peer, "WebSocket read failed: {}", e);
                            break;
                        }
                    };

                    let reply = match message {
                        Ok(message) => router.handle(&mut conn, message).await,
                        Err(e) => {
                            tracing::warn!(%peer, "failed to decode client message: {}", e);
                            Some(ServerMessage::Error(
                                RouterError::from(e).to_error_message(None, None),
                            ))
                        }
                    };
                    if let Some(reply) = reply {
                        ws_sink.send(encode(&reply)?).await?;
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    router.disconnect(&mut conn).await;
    tracing::info!(%peer, "Client disconnected");
    result
}

fn encode(message: &ServerMessage) -> Result<WsMessage> {
    let json = message
        .to_json()
        .context("Failed to serialize server message")?;
    Ok(WsMessage::Text(json))
}
