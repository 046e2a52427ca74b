//! # Termgate Protocol Library
//!
//! Wire message definitions shared by the Termgate daemon and its clients.
//!
//! ## Overview
//!
//! A client drives terminal sessions with four requests and receives two
//! kinds of session events:
//!
//! ```text
//!   client                                   daemon
//!     │ term.open   {engine, cwd, cols, rows}   │
//!     │ ──────────────────────────────────────▶ │
//!     │ term.opened {sessionId}                 │
//!     │ ◀────────────────────────────────────── │
//!     │ term.stdin  {sessionId, data}           │
//!     │ ──────────────────────────────────────▶ │
//!     │ term.data   {sessionId, data}           │
//!     │ ◀────────────────────────────────────── │
//!     │ term.exit   {sessionId, code}           │
//!     │ ◀────────────────────────────────────── │
//! ```
//!
//! Messages are JSON objects tagged by `type`; MessagePack is accepted as an
//! alternative binary encoding.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, EngineKind, ServerMessage};
//! use protocol::messages::OpenSession;
//!
//! let open = ClientMessage::Open(OpenSession::new(EngineKind::Sandbox, "/srv/project"));
//! let text = open.to_json().unwrap();
//! assert!(text.contains("\"type\":\"term.open\""));
//!
//! let reply = ServerMessage::from_json(r#"{"type":"term.exit","sessionId":"s","code":0}"#).unwrap();
//! assert_eq!(reply.session_id(), Some("s"));
//! ```

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{AgentMode, ClientMessage, EngineKind, ErrorCode, ErrorMessage, ServerMessage};
