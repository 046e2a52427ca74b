//! Wire message definitions for Termgate.
//!
//! Every message is a JSON object tagged by `type`. Clients send `term.open`,
//! `term.stdin`, `term.resize` and `term.close`; the daemon answers with
//! `term.opened`/`term.error` and streams `term.data`/`term.exit` events for
//! each live session.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default terminal columns when a client omits them.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal rows when a client omits them.
pub const DEFAULT_ROWS: u16 = 24;

/// Which backend hosts a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Line-oriented sandboxed command interpreter.
    #[default]
    Sandbox,
    /// Full-duplex pseudo-terminal hosting the interactive agent program.
    Agent,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Sandbox => write!(f, "sandbox"),
            EngineKind::Agent => write!(f, "agent"),
        }
    }
}

/// Launch mode for the interactive agent program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// No extra command-line switch.
    #[default]
    Default,
    /// Planning mode.
    Plan,
    /// Unattended mode.
    Auto,
}

// ============================================================================
// Client -> server
// ============================================================================

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Open a new session.
    #[serde(rename = "term.open")]
    Open(OpenSession),
    /// Feed input to a session.
    #[serde(rename = "term.stdin")]
    Stdin(SessionInput),
    /// Change a session's terminal dimensions.
    #[serde(rename = "term.resize")]
    Resize(SessionResize),
    /// Terminate and remove a session.
    #[serde(rename = "term.close")]
    Close(SessionClose),
}

/// Request to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSession {
    /// Client-chosen correlation id, echoed in `term.opened`/`term.error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Backend that should host the session.
    #[serde(default)]
    pub engine: EngineKind,
    /// Requested working directory.
    pub cwd: String,
    /// Terminal columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Terminal rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Agent launch mode. Ignored by the sandbox engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AgentMode>,
}

impl OpenSession {
    /// Create an open request with default dimensions.
    pub fn new(engine: EngineKind, cwd: impl Into<String>) -> Self {
        Self {
            request_id: None,
            engine,
            cwd: cwd.into(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            mode: None,
        }
    }
}

/// Input for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    /// Target session.
    pub session_id: String,
    /// Raw input text.
    pub data: String,
}

/// Terminal resize request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResize {
    /// Target session.
    pub session_id: String,
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

/// Request to close a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClose {
    /// Target session.
    pub session_id: String,
}

// ============================================================================
// Server -> client
// ============================================================================

/// Messages sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A session was created.
    #[serde(rename = "term.opened")]
    Opened(SessionOpened),
    /// Output produced by a session.
    #[serde(rename = "term.data")]
    Data(SessionOutput),
    /// A session's process ended; the session id is no longer valid.
    #[serde(rename = "term.exit")]
    Exit(SessionExit),
    /// A request failed.
    #[serde(rename = "term.error")]
    Error(ErrorMessage),
}

/// Confirmation of a created session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpened {
    /// Correlation id from the originating `term.open`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The new session id.
    pub session_id: String,
    /// Backend hosting the session.
    pub engine: EngineKind,
    /// Validated working directory.
    pub cwd: String,
}

/// Output chunk from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutput {
    /// Source session.
    pub session_id: String,
    /// Output text.
    pub data: String,
}

/// Process exit notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExit {
    /// Source session.
    pub session_id: String,
    /// Exit code.
    pub code: i32,
}

/// Error codes carried by `term.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The engine is at its session ceiling.
    Capacity,
    /// The requested directory is missing or outside the authorized roots.
    Validation,
    /// The session does not exist.
    NotFound,
    /// The session could not be started.
    OpenFailed,
    /// The message could not be parsed.
    InvalidRequest,
    /// Unexpected internal failure.
    Internal,
}

/// Error report for a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Error category.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Correlation id of the failed request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Session the failure relates to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ServerMessage {
    /// Build a `term.data` message.
    pub fn data(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        ServerMessage::Data(SessionOutput {
            session_id: session_id.into(),
            data: data.into(),
        })
    }

    /// Build a `term.exit` message.
    pub fn exit(session_id: impl Into<String>, code: i32) -> Self {
        ServerMessage::Exit(SessionExit {
            session_id: session_id.into(),
            code,
        })
    }

    /// Returns the session id this message refers to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Opened(m) => Some(&m.session_id),
            ServerMessage::Data(m) => Some(&m.session_id),
            ServerMessage::Exit(m) => Some(&m.session_id),
            ServerMessage::Error(m) => m.session_id.as_deref(),
        }
    }
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

// ============================================================================
// Encoding
// ============================================================================

impl ClientMessage {
    /// Parse a client message from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a client message from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to MessagePack bytes (field names preserved).
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a server message from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to MessagePack bytes (field names preserved).
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}
