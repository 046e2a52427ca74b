//! Message router for dispatching client messages to the terminal engines.
//!
//! The router receives `term.*` protocol messages from one connection and
//! routes them to the sandbox or agent engine. `term.open` picks the engine
//! from the message; later messages reach the engine that owns the session.
//! Engine events flow back through [`Connection::to_server_message`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use protocol::messages::{
    ClientMessage, EngineKind, ErrorCode, ErrorMessage, OpenSession, ServerMessage,
    SessionClose, SessionInput, SessionOpened, SessionResize,
};
use protocol::ProtocolError;
use tracing::{debug, info, warn};

use crate::agent::AgentEngine;
use crate::sandbox::SandboxEngine;
use crate::session::{
    EventSink, OpenRequest, SessionError, SessionEvent, SessionId, TerminalEngine,
};

/// Result type for router operations.
pub type RouterResult = Result<Option<ServerMessage>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Session-related error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The message could not be decoded.
    #[error("malformed message: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RouterError {
    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(
        &self,
        request_id: Option<String>,
        session_id: Option<String>,
    ) -> ErrorMessage {
        let code = match self {
            RouterError::Session(e) => match e {
                SessionError::Capacity { .. } => ErrorCode::Capacity,
                SessionError::Validation(_) => ErrorCode::Validation,
                SessionError::NotFound(_) => ErrorCode::NotFound,
                SessionError::ExecutableNotFound(_) | SessionError::SpawnFailed(_) => {
                    ErrorCode::OpenFailed
                }
                SessionError::WriteFailed(_)
                | SessionError::ResizeFailed(_)
                | SessionError::Io(_) => ErrorCode::Internal,
            },
            RouterError::Protocol(_) | RouterError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        };

        ErrorMessage {
            code,
            message: self.to_string(),
            request_id,
            session_id,
        }
    }
}

/// Per-connection routing state: where the connection's events go and which
/// sessions it opened.
pub struct Connection {
    events: EventSink,
    sessions: HashMap<SessionId, EngineKind>,
}

impl Connection {
    /// Create a connection whose sessions report to `events`.
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            sessions: HashMap::new(),
        }
    }

    /// Sessions opened by this connection that have not been closed.
    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    /// Returns the engine that owns `session_id`, if this connection opened it.
    pub fn engine_of(&self, session_id: &str) -> Option<EngineKind> {
        self.sessions.get(session_id).copied()
    }

    /// Converts an engine event to its wire message.
    ///
    /// An agent's exit ends the session, so it is forgotten here. A sandbox
    /// exit only ends one command.
    pub fn to_server_message(&mut self, event: SessionEvent) -> ServerMessage {
        match event {
            SessionEvent::Data { session_id, data } => ServerMessage::data(session_id, data),
            SessionEvent::Exit { session_id, code } => {
                if self.engine_of(&session_id) == Some(EngineKind::Agent) {
                    self.sessions.remove(&session_id);
                }
                ServerMessage::exit(session_id, code)
            }
        }
    }
}

/// Message router that dispatches messages to the engines.
pub struct SessionRouter {
    /// Sandboxed command engine.
    sandbox: Arc<SandboxEngine>,
    /// Interactive agent engine.
    agent: Arc<AgentEngine>,
}

impl SessionRouter {
    /// Create a new message router with the given engines.
    pub fn new(sandbox: Arc<SandboxEngine>, agent: Arc<AgentEngine>) -> Self {
        Self { sandbox, agent }
    }

    /// Returns the sandbox engine.
    pub fn sandbox(&self) -> &Arc<SandboxEngine> {
        &self.sandbox
    }

    /// Returns the agent engine.
    pub fn agent(&self) -> &Arc<AgentEngine> {
        &self.agent
    }

    /// Number of live sessions across both engines.
    pub fn session_count(&self) -> usize {
        self.sandbox.count() + self.agent.count()
    }

    /// Route a message and turn any failure into a `term.error` reply.
    pub async fn handle(
        &self,
        conn: &mut Connection,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        let (request_id, session_id) = correlation(&message);
        match self.route(conn, message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, session_id = ?session_id, "Request failed");
                Some(ServerMessage::Error(e.to_error_message(request_id, session_id)))
            }
        }
    }

    /// Route a message to the appropriate engine.
    ///
    /// Returns `Ok(Some(response))` if a response should be sent back,
    /// `Ok(None)` if no response is needed, or `Err(error)` if routing failed.
    /// Input and resize for a session that is gone are dropped silently.
    pub async fn route(&self, conn: &mut Connection, message: ClientMessage) -> RouterResult {
        debug!(?message, "Routing message");

        match message {
            ClientMessage::Open(req) => self.handle_open(conn, req).await,
            ClientMessage::Stdin(req) => self.handle_stdin(conn, req).await,
            ClientMessage::Resize(req) => self.handle_resize(conn, req).await,
            ClientMessage::Close(req) => self.handle_close(conn, req).await,
        }
    }

    /// Closes every session the connection opened.
    pub async fn disconnect(&self, conn: &mut Connection) -> usize {
        let mut closed = 0;
        for (session_id, engine) in conn.sessions.drain() {
            if self.close_on(engine, &session_id).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, "Closed sessions of disconnected client");
        }
        closed
    }

    /// Closes every live session on both engines.
    pub async fn shutdown(&self) -> usize {
        self.sandbox.close_all().await + self.agent.close_all().await
    }

    // =========================================================================
    // Session Handlers
    // =========================================================================

    async fn handle_open(&self, conn: &mut Connection, req: OpenSession) -> RouterResult {
        if req.cwd.trim().is_empty() {
            return Err(RouterError::InvalidRequest("cwd is required".to_string()));
        }
        if req.cols == 0 || req.rows == 0 {
            return Err(RouterError::InvalidRequest(
                "terminal size must be non-zero".to_string(),
            ));
        }

        let request = OpenRequest::new(PathBuf::from(&req.cwd), req.cols, req.rows)
            .with_mode(req.mode.unwrap_or_default());
        let events = conn.events.clone();

        info!(
            engine = %req.engine,
            cwd = %req.cwd,
            cols = req.cols,
            rows = req.rows,
            "Opening session"
        );

        let info = match req.engine {
            EngineKind::Sandbox => self.sandbox.open(request, events).await?,
            EngineKind::Agent => self.agent.open(request, events).await?,
        };
        conn.sessions.insert(info.id.clone(), info.engine);

        Ok(Some(ServerMessage::Opened(SessionOpened {
            request_id: req.request_id,
            session_id: info.id,
            engine: info.engine,
            cwd: info.cwd.display().to_string(),
        })))
    }

    async fn handle_stdin(&self, conn: &mut Connection, req: SessionInput) -> RouterResult {
        let Some(engine) = conn.engine_of(&req.session_id) else {
            debug!(session_id = %req.session_id, "Input for unknown session dropped");
            return Ok(None);
        };

        let result = match engine {
            EngineKind::Sandbox => self.sandbox.stdin(&req.session_id, &req.data).await,
            EngineKind::Agent => self.agent.stdin(&req.session_id, &req.data).await,
        };
        ignore_missing(result)
    }

    async fn handle_resize(&self, conn: &mut Connection, req: SessionResize) -> RouterResult {
        let Some(engine) = conn.engine_of(&req.session_id) else {
            debug!(session_id = %req.session_id, "Resize for unknown session dropped");
            return Ok(None);
        };
        if req.cols == 0 || req.rows == 0 {
            return Err(RouterError::InvalidRequest(
                "terminal size must be non-zero".to_string(),
            ));
        }

        let result = match engine {
            EngineKind::Sandbox => self.sandbox.resize(&req.session_id, req.cols, req.rows).await,
            EngineKind::Agent => self.agent.resize(&req.session_id, req.cols, req.rows).await,
        };
        ignore_missing(result)
    }

    async fn handle_close(&self, conn: &mut Connection, req: SessionClose) -> RouterResult {
        if let Some(engine) = conn.sessions.remove(&req.session_id) {
            self.close_on(engine, &req.session_id).await;
        } else {
            debug!(session_id = %req.session_id, "Close for unknown session ignored");
        }
        Ok(None)
    }

    async fn close_on(&self, engine: EngineKind, session_id: &str) -> bool {
        match engine {
            EngineKind::Sandbox => self.sandbox.close(session_id).await,
            EngineKind::Agent => self.agent.close(session_id).await,
        }
    }
}

/// Treats a session that vanished between lookup and call as a no-op.
fn ignore_missing(result: Result<(), SessionError>) -> RouterResult {
    match result {
        Ok(()) => Ok(None),
        Err(SessionError::NotFound(id)) => {
            debug!(session_id = %id, "Session ended before message arrived");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn correlation(message: &ClientMessage) -> (Option<String>, Option<String>) {
    match message {
        ClientMessage::Open(req) => (req.request_id.clone(), None),
        ClientMessage::Stdin(req) => (None, Some(req.session_id.clone())),
        ClientMessage::Resize(req) => (None, Some(req.session_id.clone())),
        ClientMessage::Close(req) => (None, Some(req.session_id.clone())),
    }
}
