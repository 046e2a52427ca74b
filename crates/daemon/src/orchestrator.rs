//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the [`Daemon`] that builds the path validator, both
//! terminal engines, the session router and the WebSocket server from a
//! [`Config`], and coordinates their startup and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentEngine;
use crate::config::Config;
use crate::files::{PathValidator, RootValidator};
use crate::network::WebSocketServer;
use crate::router::SessionRouter;
use crate::sandbox::SandboxEngine;

/// Daemon state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the daemon.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Daemon state changed.
    StateChanged(DaemonState),
    /// The listener is bound.
    Listening(SocketAddr),
}

/// Daemon that owns the engines, router and transport.
pub struct Daemon {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<DaemonState>>,
    /// Message router.
    router: Arc<SessionRouter>,
    /// Address the server is bound to, once started.
    local_addr: Option<SocketAddr>,
    /// Server accept loop.
    server_task: Option<JoinHandle<Result<()>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<DaemonEvent>,
}

impl Daemon {
    /// Creates a daemon from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let validator = RootValidator::new(config.workspace.allowed_roots.clone());
        if validator.roots().is_empty() {
            anyhow::bail!("None of the configured workspace roots exist");
        }
        info!(roots = ?validator.roots(), "Workspace roots");
        let validator: Arc<dyn PathValidator> = Arc::new(validator);

        let sandbox = Arc::new(SandboxEngine::from_config(
            &config.sandbox,
            Arc::clone(&validator),
        ));
        let agent = Arc::new(AgentEngine::new(config.agent.clone(), validator));
        let router = Arc::new(SessionRouter::new(sandbox, agent));

        let (event_tx, _) = broadcast::channel(16);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(DaemonState::Stopped)),
            router,
            local_addr: None,
            server_task: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> DaemonState {
        *self.state.read().await
    }

    /// Returns a receiver for daemon events.
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the WebSocket server.
    pub async fn start(&mut self) -> Result<()> {
        // Check current state
        {
            let mut state = self.state.write().await;
            if *state != DaemonState::Stopped {
                anyhow::bail!("Daemon is already running");
            }
            *state = DaemonState::Starting;
        }
        self.emit_event(DaemonEvent::StateChanged(DaemonState::Starting));

        info!("Starting daemon...");

        let bound = WebSocketServer::bind(&self.config.server.listen, Arc::clone(&self.router)).await;
        let server = match bound {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = DaemonState::Stopped;
                self.emit_event(DaemonEvent::StateChanged(DaemonState::Stopped));
                return Err(e);
            }
        };
        let addr = server.local_addr()?;
        self.local_addr = Some(addr);
        self.emit_event(DaemonEvent::Listening(addr));

        let shutdown_token = self.shutdown_token.clone();
        self.server_task = Some(tokio::spawn(server.run(shutdown_token)));

        // Update state to running
        *self.state.write().await = DaemonState::Running;
        self.emit_event(DaemonEvent::StateChanged(DaemonState::Running));

        info!(%addr, "Daemon started");
        Ok(())
    }

    /// Stops the daemon gracefully, closing every live session.
    pub async fn stop(&mut self) -> Result<()> {
        // Check current state
        {
            let mut state = self.state.write().await;
            if *state == DaemonState::Stopped {
                return Ok(());
            }
            if *state == DaemonState::ShuttingDown {
                anyhow::bail!("Daemon is already shutting down");
            }
            *state = DaemonState::ShuttingDown;
        }
        self.emit_event(DaemonEvent::StateChanged(DaemonState::ShuttingDown));

        info!("Stopping daemon...");

        // Signal shutdown to the accept loop and every connection
        self.shutdown_token.cancel();

        if let Some(task) = self.server_task.take() {
            match task.await {
                Ok(Ok(())) => debug!("Server task finished"),
                Ok(Err(e)) => warn!("Server task failed: {:#}", e),
                Err(e) => warn!("Server task panicked: {}", e),
            }
        }

        let closed = self.router.shutdown().await;
        debug!(closed, "Closed remaining sessions");

        *self.state.write().await = DaemonState::Stopped;
        self.emit_event(DaemonEvent::StateChanged(DaemonState::Stopped));

        info!("Daemon stopped");
        Ok(())
    }

    /// Emits a daemon event.
    fn emit_event(&self, event: DaemonEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the message router.
    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }

    /// Returns the bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
