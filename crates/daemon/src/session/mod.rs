//! Session types shared by both engines.
//!
//! A session is one logical terminal conversation owned by exactly one
//! engine: the sandboxed command interpreter or the interactive agent
//! pseudo-terminal. Both engines implement [`TerminalEngine`], so the router
//! drives them through the same open/stdin/resize/close surface and receives
//! the same [`SessionEvent`] stream back.

pub mod registry;
pub mod text;

use std::path::PathBuf;

use protocol::{AgentMode, EngineKind};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::files::ValidationError;

pub use registry::SessionRegistry;
pub use text::{CrlfNormalizer, Utf8Decoder};

/// Unique identifier for a session.
pub type SessionId = String;

/// Channel capacity for per-connection session events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The engine is at its session ceiling.
    #[error("session limit reached ({max} sessions)")]
    Capacity { max: usize },

    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The requested working directory was rejected.
    #[error("invalid working directory: {0}")]
    Validation(#[from] ValidationError),

    /// The interactive program could not be located.
    #[error("agent executable not found: {0}")]
    ExecutableNotFound(String),

    /// Failed to spawn the process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Failed to write to the session.
    #[error("failed to write to session: {0}")]
    WriteFailed(String),

    /// Failed to resize the terminal.
    #[error("failed to resize terminal: {0}")]
    ResizeFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event produced by a session, in the order it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Output text.
    Data { session_id: SessionId, data: String },
    /// The session's process ended with a code.
    Exit { session_id: SessionId, code: i32 },
}

impl SessionEvent {
    /// Returns the session this event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Data { session_id, .. } | SessionEvent::Exit { session_id, .. } => {
                session_id
            }
        }
    }
}

/// Where an engine delivers a session's events.
pub type EventSink = mpsc::Sender<SessionEvent>;

/// Sends one session's events to its sink, in call order.
#[derive(Debug, Clone)]
pub struct Emitter {
    session_id: SessionId,
    events: EventSink,
}

impl Emitter {
    /// Create an emitter for a session.
    pub fn new(session_id: SessionId, events: EventSink) -> Self {
        Self { session_id, events }
    }

    /// Returns the session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emits output text. Empty text is not sent.
    ///
    /// Returns false if the receiving side has gone away.
    pub async fn data(&self, data: impl Into<String>) -> bool {
        let data = data.into();
        if data.is_empty() {
            return !self.events.is_closed();
        }
        self.send(SessionEvent::Data {
            session_id: self.session_id.clone(),
            data,
        })
        .await
    }

    /// Emits an exit event.
    pub async fn exit(&self, code: i32) -> bool {
        self.send(SessionEvent::Exit {
            session_id: self.session_id.clone(),
            code,
        })
        .await
    }

    async fn send(&self, event: SessionEvent) -> bool {
        if self.events.send(event).await.is_err() {
            tracing::trace!(session_id = %self.session_id, "No receiver for session event");
            return false;
        }
        true
    }
}

/// Parameters for opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Requested working directory (validated by the engine).
    pub cwd: PathBuf,
    /// Terminal columns.
    pub cols: u16,
    /// Terminal rows.
    pub rows: u16,
    /// Agent launch mode. Ignored by the sandbox engine.
    pub mode: AgentMode,
}

impl OpenRequest {
    /// Create a request with default mode.
    pub fn new(cwd: impl Into<PathBuf>, cols: u16, rows: u16) -> Self {
        Self {
            cwd: cwd.into(),
            cols,
            rows,
            mode: AgentMode::Default,
        }
    }

    /// Set the agent launch mode.
    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Snapshot of a session's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Engine hosting the session.
    pub engine: EngineKind,
    /// Current working directory.
    pub cwd: PathBuf,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
}

/// Uniform call surface implemented by both engines.
#[allow(async_fn_in_trait)]
pub trait TerminalEngine: Send + Sync {
    /// Which engine this is.
    fn kind(&self) -> EngineKind;

    /// Creates a session. Fails without side effects at the session ceiling
    /// or when the working directory is rejected.
    async fn open(&self, request: OpenRequest, events: EventSink)
        -> Result<SessionInfo, SessionError>;

    /// Feeds client input to a session.
    async fn stdin(&self, session_id: &str, data: &str) -> Result<(), SessionError>;

    /// Updates a session's terminal dimensions.
    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Terminates and removes a session. Returns whether it existed; closing an
    /// unknown or already-exited session is a no-op.
    async fn close(&self, session_id: &str) -> bool;

    /// Checks whether a session exists.
    fn exists(&self, session_id: &str) -> bool;

    /// Returns the number of live sessions.
    fn count(&self) -> usize;

    /// Lists all live sessions.
    fn list(&self) -> Vec<SessionInfo>;

    /// Closes every live session.
    async fn close_all(&self) -> usize {
        let mut closed = 0;
        for info in self.list() {
            if self.close(&info.id).await {
                closed += 1;
            }
        }
        closed
    }
}
