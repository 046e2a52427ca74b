//! Interactive agent engine.

use std::sync::Arc;

use protocol::EngineKind;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::files::PathValidator;
use crate::session::{
    Emitter, EventSink, OpenRequest, SessionError, SessionInfo, SessionRegistry, TerminalEngine,
};

use super::launch::{build_env, mode_args, resolve_executable};
use super::pty::{AgentSession, LaunchSpec, PtyHandles};

/// Hosts one agent program per session, each on its own pseudo-terminal.
pub struct AgentEngine {
    config: AgentConfig,
    validator: Arc<dyn PathValidator>,
    registry: Arc<SessionRegistry<AgentSession>>,
}

impl AgentEngine {
    /// Create an agent engine.
    pub fn new(config: AgentConfig, validator: Arc<dyn PathValidator>) -> Self {
        let registry = Arc::new(SessionRegistry::new(EngineKind::Agent, config.max_sessions));
        Self {
            config,
            validator,
            registry,
        }
    }

    fn launch_spec(&self, request: &OpenRequest) -> Result<LaunchSpec, SessionError> {
        let cwd = self.validator.validate_dir(&request.cwd)?;
        let program = resolve_executable(&self.config)?;
        Ok(LaunchSpec {
            program,
            args: mode_args(request.mode, &self.config),
            env: build_env(inherited_env(), &self.config.strip_env_prefixes),
            cwd,
            cols: request.cols,
            rows: request.rows,
        })
    }

    /// Forwards output until the process ends, then reports the exit unless
    /// the session was closed first.
    fn watch(&self, session: Arc<AgentSession>, handles: PtyHandles, emitter: Emitter) {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let code = session.pump_output(handles, &emitter).await;

            if !session.finish() {
                debug!(session_id = %session.id(), code, "Agent ended after close");
                return;
            }

            registry.remove(session.id());
            info!(session_id = %session.id(), code, "Agent exited");
            emitter.exit(code).await;
        });
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<AgentSession>, SessionError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }
}

/// The daemon's environment, skipping entries that are not valid UTF-8.
fn inherited_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

impl TerminalEngine for AgentEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Agent
    }

    async fn open(
        &self,
        request: OpenRequest,
        events: EventSink,
    ) -> Result<SessionInfo, SessionError> {
        let mut handles = None;
        let session = self.registry.admit(|id| {
            let spec = self.launch_spec(&request)?;
            let (session, pty) = AgentSession::spawn(id, &spec)?;
            info!(
                session_id = %session.id(),
                program = %spec.program.display(),
                cwd = %spec.cwd.display(),
                pid = ?session.pid(),
                mode = ?request.mode,
                "Spawned agent"
            );
            handles = Some(pty);
            Ok(session)
        })?;

        let info = session.info();
        if let Some(handles) = handles {
            let emitter = Emitter::new(info.id.clone(), events);
            self.watch(session, handles, emitter);
        }
        Ok(info)
    }

    async fn stdin(&self, session_id: &str, data: &str) -> Result<(), SessionError> {
        self.lookup(session_id)?.write(data.as_bytes())
    }

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let session = self.lookup(session_id)?;
        if let Err(e) = session.resize(cols, rows) {
            warn!(session_id = %session_id, error = %e, "Ignoring failed resize");
        }
        Ok(())
    }

    async fn close(&self, session_id: &str) -> bool {
        let Some(session) = self.registry.remove(session_id) else {
            return false;
        };
        session.finish();
        session.kill();
        info!(session_id = %session_id, "Closed agent session");
        true
    }

    fn exists(&self, session_id: &str) -> bool {
        self.registry.contains(session_id)
    }

    fn count(&self) -> usize {
        self.registry.len()
    }

    fn list(&self) -> Vec<SessionInfo> {
        self.registry
            .snapshot()
            .iter()
            .map(|session| session.info())
            .collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::files::RootValidator;
    use crate::session::SessionEvent;
    use protocol::AgentMode;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        engine: AgentEngine,
    }

    /// Agent stand-in that echoes its arguments and then behaves like `cat`
    /// until stdin closes.
    const ECHO_AGENT: &str = "#!/bin/sh\necho \"args:[$*] term:$TERM\"\nwhile read line; do\n  [ \"$line\" = quit ] && exit 5\n  echo \"got:$line\"\ndone\n";

    /// Agent stand-in that never reads its input.
    const DEAF_AGENT: &str = "#!/bin/sh\nstty raw -echo\necho ready\nexec sleep 60\n";

    fn write_agent(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("fake-agent");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fixture(max_sessions: usize) -> Fixture {
        fixture_with_agent(max_sessions, ECHO_AGENT)
    }

    fn fixture_with_agent(max_sessions: usize, script: &str) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        let root = base.join("project");
        fs::create_dir_all(&root).unwrap();
        let bin = write_agent(&base, script);

        let config = AgentConfig {
            max_sessions,
            executable: Some(bin),
            install_path: base.join("missing"),
            ..AgentConfig::default()
        };
        let validator: Arc<dyn PathValidator> = Arc::new(RootValidator::new(vec![root.clone()]));
        Fixture {
            _tmp: tmp,
            root,
            engine: AgentEngine::new(config, validator),
        }
    }

    async fn read_until(rx: &mut mpsc::Receiver<SessionEvent>, needle: &str) -> String {
        let mut output = String::new();
        while !output.contains(needle) {
            match timeout(Duration::from_secs(10), rx.recv()).await {
                Ok(Some(SessionEvent::Data { data, .. })) => output.push_str(&data),
                other => panic!(
                    "expected data containing {:?}, got {:?} after {:?}",
                    needle, other, output
                ),
            }
        }
        output
    }

    #[tokio::test]
    async fn test_open_streams_output_and_exits_once() {
        let fx = fixture(2);
        let (tx, mut rx) = mpsc::channel(256);
        let info = fx
            .engine
            .open(OpenRequest::new(&fx.root, 100, 30), tx)
            .await
            .unwrap();
        assert_eq!(info.engine, EngineKind::Agent);
        assert_eq!(info.cwd, fx.root);
        assert!(fx.engine.exists(&info.id));

        read_until(&mut rx, "term:xterm-256color").await;

        fx.engine.stdin(&info.id, "hello\r").await.unwrap();
        read_until(&mut rx, "got:hello").await;

        fx.engine.stdin(&info.id, "quit\r").await.unwrap();
        let mut exits = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(10), rx.recv()).await {
            if let SessionEvent::Exit { code, .. } = event {
                exits.push(code);
            }
        }
        assert_eq!(exits, vec![5]);
        assert!(!fx.engine.exists(&info.id));

        // Calls on the exited session are no-ops or not-found.
        assert!(!fx.engine.close(&info.id).await);
        assert!(matches!(
            fx.engine.stdin(&info.id, "x").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mode_flag_is_appended() {
        let fx = fixture(1);
        let (tx, mut rx) = mpsc::channel(256);
        let info = fx
            .engine
            .open(
                OpenRequest::new(&fx.root, 80, 24).with_mode(AgentMode::Plan),
                tx,
            )
            .await
            .unwrap();

        read_until(&mut rx, "args:[--plan]").await;
        fx.engine.close(&info.id).await;
    }

    #[tokio::test]
    async fn test_close_kills_without_exit_event() {
        let fx = fixture(1);
        let (tx, mut rx) = mpsc::channel(256);
        let info = fx
            .engine
            .open(OpenRequest::new(&fx.root, 80, 24), tx)
            .await
            .unwrap();
        read_until(&mut rx, "args:").await;

        assert!(fx.engine.close(&info.id).await);
        assert!(!fx.engine.close(&info.id).await);
        assert_eq!(fx.engine.count(), 0);

        while let Ok(Some(event)) = timeout(Duration::from_secs(10), rx.recv()).await {
            assert!(!matches!(event, SessionEvent::Exit { .. }), "unexpected exit event");
        }
    }

    #[tokio::test]
    async fn test_stdin_returns_when_agent_never_reads() {
        let fx = fixture_with_agent(1, DEAF_AGENT);
        let (tx, mut rx) = mpsc::channel(256);
        let info = fx
            .engine
            .open(OpenRequest::new(&fx.root, 80, 24), tx)
            .await
            .unwrap();
        read_until(&mut rx, "ready").await;

        let big = "x".repeat(256 * 1024);
        let sent = timeout(Duration::from_secs(3), fx.engine.stdin(&info.id, &big)).await;
        assert!(matches!(sent, Ok(Ok(()))), "stdin did not return: {:?}", sent);

        // Later input is still accepted or refused without blocking.
        let again = timeout(Duration::from_secs(3), fx.engine.stdin(&info.id, "y")).await;
        assert!(again.is_ok());

        let closed = timeout(Duration::from_secs(3), fx.engine.close(&info.id)).await;
        assert_eq!(closed.ok(), Some(true));
        assert_eq!(fx.engine.count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_checked_before_spawn() {
        let fx = fixture(1);
        let (tx, _rx) = mpsc::channel(256);
        let first = fx
            .engine
            .open(OpenRequest::new(&fx.root, 80, 24), tx.clone())
            .await
            .unwrap();

        let result = fx.engine.open(OpenRequest::new(&fx.root, 80, 24), tx).await;
        assert!(matches!(result, Err(SessionError::Capacity { max: 1 })));
        assert_eq!(fx.engine.count(), 1);

        fx.engine.close(&first.id).await;
    }

    #[tokio::test]
    async fn test_unresolvable_executable_fails_open() {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let config = AgentConfig {
            executable: Some(root.join("nope")),
            install_path: root.join("also-nope"),
            ..AgentConfig::default()
        };
        let engine = AgentEngine::new(config, Arc::new(RootValidator::new(vec![root.clone()])));

        let (tx, _rx) = mpsc::channel(8);
        let result = engine.open(OpenRequest::new(&root, 80, 24), tx).await;
        assert!(matches!(result, Err(SessionError::ExecutableNotFound(_))));
        assert_eq!(engine.count(), 0);
    }

    #[tokio::test]
    async fn test_open_rejects_cwd_outside_roots() {
        let fx = fixture(1);
        let (tx, _rx) = mpsc::channel(8);
        let result = fx.engine.open(OpenRequest::new("/", 80, 24), tx).await;
        assert!(matches!(result, Err(SessionError::Validation(_))));
        assert_eq!(fx.engine.count(), 0);
    }

    #[tokio::test]
    async fn test_resize_updates_info_and_unknown_is_not_found() {
        let fx = fixture(1);
        let (tx, _rx) = mpsc::channel(256);
        let info = fx
            .engine
            .open(OpenRequest::new(&fx.root, 80, 24), tx)
            .await
            .unwrap();

        fx.engine.resize(&info.id, 200, 60).await.unwrap();
        let listed = fx.engine.list();
        assert_eq!((listed[0].cols, listed[0].rows), (200, 60));

        assert!(matches!(
            fx.engine.resize("missing", 1, 1).await,
            Err(SessionError::NotFound(_))
        ));
        fx.engine.close(&info.id).await;
    }
}
