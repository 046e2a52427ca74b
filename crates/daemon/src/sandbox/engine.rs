//! Sandboxed line-oriented command engine.
//!
//! Each session buffers typed characters until a newline, then queues the
//! completed line. A single drain task per session executes queued lines
//! strictly in submission order, so one command's output and exit event are
//! always delivered before the next command starts. Sessions are
//! independent: a slow command only delays its own session's queue.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use protocol::EngineKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::files::PathValidator;
use crate::session::{
    Emitter, EventSink, OpenRequest, SessionError, SessionId, SessionInfo, SessionRegistry,
    TerminalEngine,
};

use super::builtins::{self, Builtin, BuiltinOutput};
use super::exec::{run_command, ExecLimits, ExecOutcome};
use super::policy::{CommandPolicy, SecurityError, EXIT_MALFORMED, EXIT_NOT_ALLOWED};
use super::tokenizer::tokenize;

/// Exit code for execution failures (spawn error, timeout, truncation).
pub const EXIT_EXEC_FAILED: i32 = 1;

/// Mutable per-session state.
#[derive(Debug)]
struct SandboxState {
    cwd: PathBuf,
    cols: u16,
    rows: u16,
    /// Characters typed since the last submitted line.
    line: String,
    /// Submitted lines awaiting execution.
    queue: VecDeque<String>,
    /// Whether a drain task is executing lines.
    running: bool,
    /// Whether the previous input character was a carriage return.
    after_cr: bool,
}

/// A sandbox session.
pub struct SandboxSession {
    id: SessionId,
    /// Directory approved at open; `cd` with no argument returns here.
    home: PathBuf,
    emitter: Emitter,
    state: Mutex<SandboxState>,
    /// Cancelled when the session is closed.
    cancel: CancellationToken,
}

impl SandboxSession {
    fn new(id: SessionId, cwd: PathBuf, cols: u16, rows: u16, events: EventSink) -> Self {
        Self {
            emitter: Emitter::new(id.clone(), events),
            id,
            home: cwd.clone(),
            state: Mutex::new(SandboxState {
                cwd,
                cols,
                rows,
                line: String::new(),
                queue: VecDeque::new(),
                running: false,
                after_cr: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the current working directory.
    pub fn cwd(&self) -> PathBuf {
        self.lock().cwd.clone()
    }

    /// Returns a metadata snapshot.
    pub fn info(&self) -> SessionInfo {
        let state = self.lock();
        SessionInfo {
            id: self.id.clone(),
            engine: EngineKind::Sandbox,
            cwd: state.cwd.clone(),
            cols: state.cols,
            rows: state.rows,
        }
    }

    /// Applies typed input to the line buffer. Returns true if at least one
    /// line was queued.
    fn feed(&self, data: &str) -> bool {
        let mut state = self.lock();
        let mut queued = false;

        for c in data.chars() {
            let after_cr = std::mem::replace(&mut state.after_cr, c == '\r');
            match c {
                '\n' if after_cr => {}
                '\r' | '\n' => {
                    let line = std::mem::take(&mut state.line);
                    state.queue.push_back(line);
                    queued = true;
                }
                '\x7f' | '\x08' => {
                    state.line.pop();
                }
                '\x03' => state.line.clear(),
                c if c.is_control() && c != '\t' => {}
                c => state.line.push(c),
            }
        }

        queued
    }

    /// Marks the session running if there is queued work and no drain task.
    /// Returns true if the caller must start the drain task.
    fn claim_drain(&self) -> bool {
        let mut state = self.lock();
        if state.running || state.queue.is_empty() {
            return false;
        }
        state.running = true;
        true
    }

    /// Pops the next queued line, or clears the running flag when the queue
    /// is empty.
    fn next_line(&self) -> Option<String> {
        let mut state = self.lock();
        let line = state.queue.pop_front();
        if line.is_none() {
            state.running = false;
        }
        line
    }
}

/// Executes lines for sessions. Shared by all drain tasks.
struct LineRunner {
    validator: Arc<dyn PathValidator>,
    policy: CommandPolicy,
    limits: ExecLimits,
}

impl LineRunner {
    /// Drains a session's queue until it is empty or the session is closed.
    async fn drain(&self, session: Arc<SandboxSession>) {
        while let Some(line) = session.next_line() {
            tokio::select! {
                biased;
                _ = session.cancel.cancelled() => {
                    debug!(session_id = %session.id, "Drain stopped: session closed");
                    return;
                }
                _ = self.run_line(&session, &line) => {}
            }
        }
    }

    /// Runs one submitted line and emits its output and exit code.
    async fn run_line(&self, session: &SandboxSession, line: &str) {
        let emitter = &session.emitter;

        if line.trim().is_empty() {
            emitter.data("\r\n").await;
            emitter.exit(0).await;
            return;
        }

        if let Err(e) = self.policy.check_line(line) {
            self.blocked(session, &e.to_string(), e.exit_code()).await;
            return;
        }

        let argv = match tokenize(line) {
            Ok(argv) => argv,
            Err(e) => {
                self.blocked(session, &e.to_string(), EXIT_MALFORMED).await;
                return;
            }
        };

        let Some((name, args)) = argv.split_first() else {
            emitter.exit(0).await;
            return;
        };

        if let Some(builtin) = Builtin::parse(name) {
            let result = self.run_builtin(session, builtin, args).await;
            emitter.data(result.output).await;
            emitter.exit(result.code).await;
            return;
        }

        if name.is_empty() {
            self.blocked(session, "empty command name", EXIT_NOT_ALLOWED)
                .await;
            return;
        }

        if let Err(e) = self.policy.check_command(name) {
            self.blocked(session, &e.to_string(), e.exit_code()).await;
            return;
        }

        let cwd = session.cwd();
        info!(session_id = %session.id, command = %name, cwd = %cwd.display(), "Running command");

        let code = match run_command(&argv, &cwd, &self.limits, emitter).await {
            ExecOutcome::Exited(code) => code,
            ExecOutcome::Truncated { limit } => {
                emitter
                    .data(format!("\r\n[output truncated after {} bytes]\r\n", limit))
                    .await;
                EXIT_EXEC_FAILED
            }
            ExecOutcome::TimedOut(timeout) => {
                warn!(session_id = %session.id, command = %name, "Command timed out");
                emitter
                    .data(format!(
                        "\r\nerror: command timed out after {}s\r\n",
                        timeout.as_secs_f32()
                    ))
                    .await;
                EXIT_EXEC_FAILED
            }
            ExecOutcome::SpawnFailed(reason) => {
                emitter.data(format!("error: {}: {}\r\n", name, reason)).await;
                EXIT_EXEC_FAILED
            }
        };

        debug!(session_id = %session.id, command = %name, code, "Command finished");
        emitter.exit(code).await;
    }

    async fn run_builtin(
        &self,
        session: &SandboxSession,
        builtin: Builtin,
        args: &[String],
    ) -> BuiltinOutput {
        let cwd = session.cwd();
        match builtin {
            Builtin::Pwd => builtins::pwd(&cwd),
            Builtin::Cd => {
                let mut new_cwd = cwd;
                let result =
                    builtins::cd(&mut new_cwd, &session.home, args, self.validator.as_ref());
                if result.code == 0 {
                    debug!(session_id = %session.id, cwd = %new_cwd.display(), "Changed directory");
                    session.lock().cwd = new_cwd;
                }
                result
            }
            Builtin::Ls => builtins::ls(&cwd, args, self.validator.as_ref()).await,
            Builtin::Help => builtins::help(&self.policy),
        }
    }

    async fn blocked(&self, session: &SandboxSession, reason: &str, code: i32) {
        warn!(session_id = %session.id, reason = %reason, code, "Blocked command line");
        session
            .emitter
            .data(format!("blocked: {}\r\n", reason))
            .await;
        session.emitter.exit(code).await;
    }
}

/// Sandboxed command engine.
pub struct SandboxEngine {
    registry: SessionRegistry<SandboxSession>,
    runner: Arc<LineRunner>,
}

impl SandboxEngine {
    /// Create an engine with explicit policy and limits.
    pub fn new(
        validator: Arc<dyn PathValidator>,
        policy: CommandPolicy,
        limits: ExecLimits,
        max_sessions: usize,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(EngineKind::Sandbox, max_sessions),
            runner: Arc::new(LineRunner {
                validator,
                policy,
                limits,
            }),
        }
    }

    /// Create an engine from the sandbox configuration.
    pub fn from_config(config: &SandboxConfig, validator: Arc<dyn PathValidator>) -> Self {
        Self::new(
            validator,
            CommandPolicy::from_config(config),
            ExecLimits::from_config(config),
            config.max_sessions,
        )
    }

    /// Starts a drain task for the session if one is not already running.
    fn pump(&self, session: Arc<SandboxSession>) {
        if !session.claim_drain() {
            return;
        }
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move { runner.drain(session).await });
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<SandboxSession>, SessionError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Checks a line against the security filter without running it.
    pub fn check(&self, line: &str) -> Result<Vec<String>, CheckError> {
        self.runner.policy.check_line(line)?;
        let argv = tokenize(line)?;
        if let Some(name) = argv.first() {
            if Builtin::parse(name).is_none() {
                self.runner.policy.check_command(name)?;
            }
        }
        Ok(argv)
    }
}

/// Verdict of [`SandboxEngine::check`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CheckError {
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Parse(#[from] super::tokenizer::ParseError),
}

impl CheckError {
    /// Exit code the engine would report for this line.
    pub fn exit_code(&self) -> i32 {
        match self {
            CheckError::Security(e) => e.exit_code(),
            CheckError::Parse(_) => EXIT_MALFORMED,
        }
    }
}

impl TerminalEngine for SandboxEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sandbox
    }

    async fn open(
        &self,
        request: OpenRequest,
        events: EventSink,
    ) -> Result<SessionInfo, SessionError> {
        let session = self.registry.admit(|id| {
            let cwd = self.runner.validator.validate_dir(&request.cwd)?;
            Ok(SandboxSession::new(id, cwd, request.cols, request.rows, events))
        })?;

        let info = session.info();
        info!(
            session_id = %info.id,
            cwd = %info.cwd.display(),
            cols = info.cols,
            rows = info.rows,
            "Created sandbox session"
        );
        Ok(info)
    }

    async fn stdin(&self, session_id: &str, data: &str) -> Result<(), SessionError> {
        let session = self.lookup(session_id)?;
        if session.feed(data) {
            self.pump(session);
        }
        Ok(())
    }

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let session = self.lookup(session_id)?;
        let mut state = session.lock();
        state.cols = cols;
        state.rows = rows;
        Ok(())
    }

    async fn close(&self, session_id: &str) -> bool {
        match self.registry.remove(session_id) {
            Some(session) => {
                session.cancel.cancel();
                info!(session_id = %session_id, "Closed sandbox session");
                true
            }
            None => false,
        }
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
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        engine: SandboxEngine,
    }

    fn fixture_with(policy: CommandPolicy, limits: ExecLimits, max_sessions: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap().join("project");
        fs::create_dir_all(root.join("src")).unwrap();
        let validator: Arc<dyn PathValidator> = Arc::new(RootValidator::new(vec![root.clone()]));
        let engine = SandboxEngine::new(validator, policy, limits, max_sessions);
        Fixture {
            _tmp: tmp,
            root,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            CommandPolicy::new(BTreeMap::new(), vec!["rm".to_string()]),
            ExecLimits {
                timeout: Duration::from_secs(10),
                max_output_bytes: 64 * 1024,
            },
            4,
        )
    }

    async fn open(fx: &Fixture) -> (SessionId, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let info = fx
            .engine
            .open(OpenRequest::new(&fx.root, 80, 24), tx)
            .await
            .unwrap();
        (info.id, rx)
    }

    /// Collects events until `exits` exit events have been seen.
    async fn collect(rx: &mut mpsc::Receiver<SessionEvent>, exits: usize) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let mut seen = 0;
        while seen < exits {
            let event = timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("event channel closed");
            if matches!(event, SessionEvent::Exit { .. }) {
                seen += 1;
            }
            events.push(event);
        }
        events
    }

    fn data(id: &str, text: &str) -> SessionEvent {
        SessionEvent::Data {
            session_id: id.to_string(),
            data: text.to_string(),
        }
    }

    fn exit(id: &str, code: i32) -> SessionEvent {
        SessionEvent::Exit {
            session_id: id.to_string(),
            code,
        }
    }

    #[tokio::test]
    async fn test_pwd_reports_cwd() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "pwd\n").await.unwrap();
        let events = collect(&mut rx, 1).await;

        assert_eq!(
            events,
            vec![data(&id, &format!("{}\r\n", fx.root.display())), exit(&id, 0)]
        );
    }

    #[tokio::test]
    async fn test_input_is_buffered_until_newline() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "p").await.unwrap();
        fx.engine.stdin(&id, "wx\x7fd").await.unwrap();
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        fx.engine.stdin(&id, "\r\n").await.unwrap();
        let events = collect(&mut rx, 1).await;
        assert_eq!(events.last(), Some(&exit(&id, 0)));
        assert_eq!(events[0], data(&id, &format!("{}\r\n", fx.root.display())));

        // The "\n" of "\r\n" must not submit a second (blank) line.
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_ctrl_c_discards_buffer() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "rm -rf x\x03pwd\n").await.unwrap();
        let events = collect(&mut rx, 1).await;
        assert_eq!(events.last(), Some(&exit(&id, 0)));
    }

    #[tokio::test]
    async fn test_empty_line() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "   \n").await.unwrap();
        let events = collect(&mut rx, 1).await;
        assert_eq!(events, vec![data(&id, "\r\n"), exit(&id, 0)]);
    }

    #[tokio::test]
    async fn test_denylisted_command_blocked() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;
        fs::write(fx.root.join("keep.txt"), "x").unwrap();

        fx.engine.stdin(&id, "rm keep.txt\n").await.unwrap();
        let events = collect(&mut rx, 1).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::Data { data, .. } if data.starts_with("blocked:")));
        assert_eq!(events[1], exit(&id, 127));
        assert!(fx.root.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_metacharacters_blocked_with_exit_2() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "echo hi; rm keep\n").await.unwrap();
        fx.engine.stdin(&id, "echo `id`\n").await.unwrap();
        fx.engine.stdin(&id, "echo 'open\n").await.unwrap();
        let events = collect(&mut rx, 3).await;

        let codes: Vec<i32> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Exit { code, .. } => Some(*code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![2, 2, 2]);
    }

    #[tokio::test]
    async fn test_allowlist_blocks_unlisted_but_allows_builtins() {
        let mut allow = BTreeMap::new();
        allow.insert("echo".to_string(), "Echo".to_string());
        let fx = fixture_with(
            CommandPolicy::new(allow, Vec::new()),
            ExecLimits {
                timeout: Duration::from_secs(10),
                max_output_bytes: 1024,
            },
            2,
        );
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "cat /etc/hostname\npwd\necho ok\n").await.unwrap();
        let events = collect(&mut rx, 3).await;

        assert_eq!(events[1], exit(&id, 127));
        assert_eq!(events[3], exit(&id, 0));
        assert_eq!(events[4], data(&id, "ok\r\n"));
        assert_eq!(events[5], exit(&id, 0));
    }

    #[tokio::test]
    async fn test_cd_boundary_and_pwd() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "cd ..\npwd\n").await.unwrap();
        let events = collect(&mut rx, 2).await;

        assert!(matches!(&events[0], SessionEvent::Data { data, .. } if data.starts_with("cd: ..")));
        assert_eq!(events[1], exit(&id, 1));
        assert_eq!(events[2], data(&id, &format!("{}\r\n", fx.root.display())));
        assert_eq!(events[3], exit(&id, 0));
    }

    #[tokio::test]
    async fn test_cd_changes_cwd_for_later_commands() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "cd src\npwd\n").await.unwrap();
        let events = collect(&mut rx, 2).await;

        assert_eq!(events[0], exit(&id, 0));
        assert_eq!(
            events[1],
            data(&id, &format!("{}\r\n", fx.root.join("src").display()))
        );
        assert_eq!(fx.engine.list()[0].cwd, fx.root.join("src"));
    }

    #[tokio::test]
    async fn test_queued_commands_run_in_order() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine
            .stdin(&id, "sleep 0.3\necho second\necho third\n")
            .await
            .unwrap();
        let events = collect(&mut rx, 3).await;

        assert_eq!(
            events,
            vec![
                exit(&id, 0),
                data(&id, "second\r\n"),
                exit(&id, 0),
                data(&id, "third\r\n"),
                exit(&id, 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_slow_session_does_not_block_other_session() {
        let fx = fixture();
        let (slow, mut slow_rx) = open(&fx).await;
        let (fast, mut fast_rx) = open(&fx).await;

        fx.engine.stdin(&slow, "sleep 2\n").await.unwrap();
        fx.engine.stdin(&fast, "echo quick\n").await.unwrap();

        let events = timeout(Duration::from_millis(1500), collect(&mut fast_rx, 1))
            .await
            .expect("fast session was blocked");
        assert_eq!(events, vec![data(&fast, "quick\r\n"), exit(&fast, 0)]);

        let events = collect(&mut slow_rx, 1).await;
        assert_eq!(events, vec![exit(&slow, 0)]);
    }

    #[tokio::test]
    async fn test_truncation_emits_single_notice() {
        let fx = fixture_with(
            CommandPolicy::default(),
            ExecLimits {
                timeout: Duration::from_secs(10),
                max_output_bytes: 512,
            },
            1,
        );
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "yes\n").await.unwrap();
        let events = collect(&mut rx, 1).await;

        let notices = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Data { data, .. } if data.contains("[output truncated")))
            .count();
        assert_eq!(notices, 1);
        assert_eq!(events.last(), Some(&exit(&id, EXIT_EXEC_FAILED)));
        // The notice is the last data event.
        assert!(matches!(&events[events.len() - 2], SessionEvent::Data { data, .. } if data.contains("truncated")));

        // Nothing arrives after the exit event.
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_reports_error() {
        let fx = fixture_with(
            CommandPolicy::default(),
            ExecLimits {
                timeout: Duration::from_millis(200),
                max_output_bytes: 1024,
            },
            1,
        );
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "sleep 30\n").await.unwrap();
        let events = collect(&mut rx, 1).await;

        assert!(matches!(&events[0], SessionEvent::Data { data, .. } if data.contains("timed out")));
        assert_eq!(events[1], exit(&id, 1));
    }

    #[tokio::test]
    async fn test_unknown_program_reports_spawn_error() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "termgate-no-such-program\n").await.unwrap();
        let events = collect(&mut rx, 1).await;

        assert!(matches!(&events[0], SessionEvent::Data { data, .. } if data.starts_with("error:")));
        assert_eq!(events[1], exit(&id, 1));
    }

    #[tokio::test]
    async fn test_capacity_ceiling() {
        let fx = fixture();
        for _ in 0..4 {
            open(&fx).await;
        }
        assert_eq!(fx.engine.count(), 4);

        let (tx, _rx) = mpsc::channel(8);
        let result = fx.engine.open(OpenRequest::new(&fx.root, 80, 24), tx).await;
        assert!(matches!(result, Err(SessionError::Capacity { max: 4 })));
        assert_eq!(fx.engine.count(), 4);
    }

    #[tokio::test]
    async fn test_open_rejects_outside_cwd() {
        let fx = fixture();
        let (tx, _rx) = mpsc::channel(8);
        let result = fx.engine.open(OpenRequest::new("/", 80, 24), tx).await;
        assert!(matches!(result, Err(SessionError::Validation(_))));
        assert_eq!(fx.engine.count(), 0);
    }

    #[tokio::test]
    async fn test_resize_and_unknown_session() {
        let fx = fixture();
        let (id, _rx) = open(&fx).await;

        fx.engine.resize(&id, 132, 50).await.unwrap();
        let info = &fx.engine.list()[0];
        assert_eq!((info.cols, info.rows), (132, 50));

        assert!(matches!(
            fx.engine.stdin("missing", "pwd\n").await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            fx.engine.resize("missing", 1, 1).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_queue() {
        let fx = fixture();
        let (id, mut rx) = open(&fx).await;

        fx.engine.stdin(&id, "sleep 5\necho never\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(fx.engine.close(&id).await);
        assert!(!fx.engine.close(&id).await);
        assert!(!fx.engine.exists(&id));

        // No output for the queued line after close.
        let next = timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(!matches!(next, Ok(Some(SessionEvent::Data { .. }))));
    }

    #[test]
    fn test_check_verdicts() {
        let fx = fixture();
        assert_eq!(fx.engine.check("git status").unwrap(), vec!["git", "status"]);
        assert_eq!(fx.engine.check("rm -rf /").unwrap_err().exit_code(), 127);
        assert_eq!(fx.engine.check("ls; id").unwrap_err().exit_code(), 2);
        assert_eq!(fx.engine.check("echo 'x").unwrap_err().exit_code(), 2);
        assert!(fx.engine.check("cd ..").is_ok());
    }
}
