//! # Termgate Daemon Library
//!
//! This crate provides the daemon (server) functionality for Termgate, a
//! terminal session multiplexer behind a web UI.
//!
//! ## Overview
//!
//! The daemon hosts two kinds of terminal session behind one protocol:
//!
//! - **Sandbox sessions**: a line-oriented interpreter that tokenizes each
//!   submitted line, runs it through a security filter and executes it
//!   directly (no shell) with a timeout and an output budget
//! - **Agent sessions**: a pseudo-terminal hosting one configured interactive
//!   program, with raw input and output streaming
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Daemon                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                   WebSocket Server                        │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                   Session Router                          │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │     Sandbox Engine       │  │       Agent Engine          │  │
//! │  │  filter, queue, exec     │  │  pty, env, resize, kill     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │         Session Registry  /  Path Validator               │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut daemon = Daemon::new(config)?;
//!     daemon.start().await?;
//!
//!     // The daemon is now accepting WebSocket connections
//!
//!     daemon.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Working directory validation against authorized roots
//! - [`session`]: Shared session types, registry and engine trait
//! - [`sandbox`]: Sandboxed command engine
//! - [`agent`]: Interactive agent engine
//! - [`router`]: Message routing to the engines
//! - [`network`]: WebSocket transport
//! - [`orchestrator`]: Main daemon coordinator

pub mod agent;
pub mod config;
pub mod files;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod sandbox;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    OpenRequest, SessionError, SessionEvent, SessionId, SessionInfo, SessionRegistry,
    TerminalEngine,
};

// Re-export engine types for convenience
pub use agent::AgentEngine;
pub use sandbox::{CommandPolicy, SandboxEngine};

// Re-export files types for convenience
pub use files::{PathValidator, RootValidator, ValidationError};

// Re-export router types for convenience
pub use router::{Connection, RouterError, RouterResult, SessionRouter};

// Re-export network types for convenience
pub use network::WebSocketServer;

// Re-export orchestrator types for convenience
pub use orchestrator::{Daemon, DaemonEvent, DaemonState};
