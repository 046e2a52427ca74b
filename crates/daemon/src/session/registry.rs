//! Bounded session registry.
//!
//! Each engine owns one registry. The registry is the single source of truth
//! for session existence and enforces the engine's session ceiling.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use protocol::EngineKind;
use uuid::Uuid;

use super::{SessionError, SessionId};

/// Thread-safe map of session id to session state with a capacity ceiling.
pub struct SessionRegistry<S> {
    /// Engine that owns this registry, for logging.
    engine: EngineKind,
    /// Map of session ID to session.
    sessions: DashMap<SessionId, Arc<S>>,
    /// Serializes the capacity check with insertion.
    admission: Mutex<()>,
    /// Session ceiling.
    max_sessions: usize,
}

impl<S> SessionRegistry<S> {
    /// Creates an empty registry.
    pub fn new(engine: EngineKind, max_sessions: usize) -> Self {
        Self {
            engine,
            sessions: DashMap::new(),
            admission: Mutex::new(()),
            max_sessions,
        }
    }

    /// Admits a new session.
    ///
    /// The capacity check, the construction of the session and its insertion
    /// happen under one admission lock, so concurrent opens can never exceed
    /// the ceiling. If `build` fails nothing is inserted.
    pub fn admit<F>(&self, build: F) -> Result<Arc<S>, SessionError>
    where
        F: FnOnce(SessionId) -> Result<S, SessionError>,
    {
        let _guard = self
            .admission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.sessions.len() >= self.max_sessions {
            tracing::warn!(
                engine = %self.engine,
                max_sessions = self.max_sessions,
                "Session limit reached"
            );
            return Err(SessionError::Capacity {
                max: self.max_sessions,
            });
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(build(id.clone())?);
        self.sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Gets a session by id.
    pub fn get(&self, session_id: &str) -> Option<Arc<S>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes a session, returning it if it was present.
    pub fn remove(&self, session_id: &str) -> Option<Arc<S>> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    /// Checks if a session exists.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns a snapshot of all sessions.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
