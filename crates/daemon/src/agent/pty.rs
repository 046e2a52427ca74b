//! Pseudo-terminal session hosting the agent program.
//!
//! A session owns the PTY master, an input queue and a killer handle for the
//! child. Input is written by a dedicated thread so an agent that stops
//! reading can never stall the async runtime. Output is pumped by
//! [`AgentSession::pump_output`], which reads until the PTY reports end of
//! file and then reaps the child.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use protocol::EngineKind;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::session::{Emitter, SessionError, SessionId, SessionInfo, Utf8Decoder};

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Input chunks queued per session before further input is refused.
const INPUT_QUEUE_CAPACITY: usize = 256;

/// What to launch inside the pseudo-terminal.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

/// Handles consumed by the output pump.
pub struct PtyHandles {
    reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
}

/// An agent program attached to a pseudo-terminal.
pub struct AgentSession {
    /// Unique session identifier.
    id: SessionId,

    /// Working directory the program was started in.
    cwd: PathBuf,

    /// Current terminal size as (cols, rows).
    size: StdMutex<(u16, u16)>,

    /// The PTY master handle.
    master: StdMutex<Box<dyn MasterPty + Send>>,

    /// Queue drained by the writer thread.
    input: mpsc::Sender<Vec<u8>>,

    /// Kills the child without holding the child itself.
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,

    /// Set once the session has ended, either by exit or by close.
    finished: AtomicBool,

    /// Process ID.
    pid: Option<u32>,
}

impl AgentSession {
    /// Spawns the program described by `spec` attached to a new PTY.
    pub fn spawn(id: SessionId, spec: &LaunchSpec) -> Result<(Self, PtyHandles), SessionError> {
        let pair = native_pty_system()
            .openpty(pty_size(spec.cols, spec.rows))
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let input = spawn_writer(&id, writer)?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env_clear();
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let session = AgentSession {
            id,
            cwd: spec.cwd.clone(),
            size: StdMutex::new((spec.cols, spec.rows)),
            master: StdMutex::new(pair.master),
            input,
            killer: StdMutex::new(killer),
            finished: AtomicBool::new(false),
            pid,
        };

        Ok((session, PtyHandles { reader, child }))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the agent, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current terminal size.
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns a metadata snapshot.
    pub fn info(&self) -> SessionInfo {
        let (cols, rows) = self.size();
        SessionInfo {
            id: self.id.clone(),
            engine: EngineKind::Agent,
            cwd: self.cwd.clone(),
            cols,
            rows,
        }
    }

    /// Queues raw input for the PTY without waiting for the agent to read it.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        self.input.try_send(data.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::WriteFailed("input queue is full".to_string()),
            TrySendError::Closed(_) => {
                SessionError::WriteFailed("agent input is closed".to_string())
            }
        })
    }

    /// Resizes the PTY. The recorded size only changes on success.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.master
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .resize(pty_size(cols, rows))
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        *self.size.lock().unwrap_or_else(|p| p.into_inner()) = (cols, rows);
        tracing::debug!(session_id = %self.id, cols, rows, "Resized PTY");
        Ok(())
    }

    /// Marks the session finished. Returns true for the first caller only.
    pub fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    /// Force-terminates the agent process.
    pub fn kill(&self) {
        let mut killer = self.killer.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = killer.kill() {
            // Already exited processes report an error here.
            tracing::debug!(session_id = %self.id, error = %e, "Kill failed");
        }
    }

    /// Forwards PTY output until end of file, then reaps the child and
    /// returns its exit code.
    pub async fn pump_output(&self, handles: PtyHandles, emitter: &Emitter) -> i32 {
        let PtyHandles { reader, child } = handles;
        let reader = Arc::new(StdMutex::new(reader));
        let mut decoder = Utf8Decoder::new();

        loop {
            let reader_clone = Arc::clone(&reader);

            // Use spawn_blocking to read from the PTY
            let result = tokio::task::spawn_blocking(move || {
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                let mut reader = reader_clone.lock().unwrap_or_else(|p| p.into_inner());
                reader.read(&mut buffer).map(|n| {
                    buffer.truncate(n);
                    buffer
                })
            })
            .await;

            match result {
                Ok(Ok(data)) if data.is_empty() => {
                    tracing::debug!(session_id = %self.id, "PTY EOF");
                    break;
                }
                Ok(Ok(data)) => {
                    emitter.data(decoder.decode(&data)).await;
                }
                Ok(Err(e)) => {
                    // Linux reports EIO once the slave side has closed.
                    tracing::debug!(session_id = %self.id, error = %e, "PTY read ended");
                    break;
                }
                Err(e) => {
                    tracing::error!(session_id = %self.id, error = %e, "Read task panicked");
                    break;
                }
            }
        }

        emitter.data(decoder.finish()).await;
        self.wait(child).await
    }

    async fn wait(&self, mut child: Box<dyn Child + Send + Sync>) -> i32 {
        match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => status.exit_code() as i32,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to reap agent");
                1
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "Wait task panicked");
                1
            }
        }
    }
}

/// Starts the thread that owns the PTY writer.
///
/// Writes block while the agent's input buffer is full, so they run on a
/// plain thread rather than the blocking pool. The thread ends when the
/// queue's sender is dropped or a write fails.
fn spawn_writer(
    id: &SessionId,
    mut writer: Box<dyn Write + Send>,
) -> Result<mpsc::Sender<Vec<u8>>, SessionError> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(INPUT_QUEUE_CAPACITY);
    let session_id = id.clone();

    std::thread::Builder::new()
        .name("pty-writer".to_string())
        .spawn(move || {
            while let Some(chunk) = rx.blocking_recv() {
                if let Err(e) = writer.write_all(&chunk).and_then(|()| writer.flush()) {
                    tracing::debug!(session_id = %session_id, error = %e, "PTY write ended");
                    break;
                }
            }
        })
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    Ok(tx)
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use serial_test::serial;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn sh_spec(args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            program: PathBuf::from("/bin/sh"),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: [("PATH".to_string(), "/usr/bin:/bin".to_string())]
                .into_iter()
                .collect(),
            cwd: std::env::temp_dir(),
            cols: 80,
            rows: 24,
        }
    }

    #[tokio::test]
    async fn test_spawn_and_pump_until_exit() {
        let (session, handles) =
            AgentSession::spawn("a".to_string(), &sh_spec(&["-c", "echo pty_marker; exit 7"]))
                .unwrap();
        assert!(session.pid().is_some());

        let (tx, mut rx) = mpsc::channel(64);
        let emitter = Emitter::new("a".to_string(), tx);
        let code = timeout(Duration::from_secs(10), session.pump_output(handles, &emitter))
            .await
            .unwrap();
        drop(emitter);

        let mut output = String::new();
        while let Some(SessionEvent::Data { data, .. }) = rx.recv().await {
            output.push_str(&data);
        }
        assert!(output.contains("pty_marker"));
        assert_eq!(code, 7);
    }

    #[tokio::test]
    #[serial]
    async fn test_environment_is_replaced() {
        let mut spec = sh_spec(&["-c", "echo \"[$TERMGATE_SECRET][$MARKER]\""]);
        spec.env.insert("MARKER".to_string(), "set".to_string());
        std::env::set_var("TERMGATE_SECRET", "leak");

        let (session, handles) = AgentSession::spawn("a".to_string(), &spec).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let emitter = Emitter::new("a".to_string(), tx);
        timeout(Duration::from_secs(10), session.pump_output(handles, &emitter))
            .await
            .unwrap();
        drop(emitter);
        std::env::remove_var("TERMGATE_SECRET");

        let mut output = String::new();
        while let Some(SessionEvent::Data { data, .. }) = rx.recv().await {
            output.push_str(&data);
        }
        assert!(output.contains("[][set]"), "output: {:?}", output);
    }

    #[tokio::test]
    async fn test_resize_updates_size() {
        let (session, _handles) = AgentSession::spawn("a".to_string(), &sh_spec(&[])).unwrap();
        session.resize(120, 40).unwrap();
        assert_eq!(session.size(), (120, 40));
        assert_eq!(session.info().cols, 120);
        session.kill();
    }

    #[tokio::test]
    async fn test_write_reaches_program() {
        let (session, handles) =
            AgentSession::spawn("a".to_string(), &sh_spec(&["-c", "read line; echo \"got:$line\""]))
                .unwrap();
        session.write(b"ping\r").unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let emitter = Emitter::new("a".to_string(), tx);
        let code = timeout(Duration::from_secs(10), session.pump_output(handles, &emitter))
            .await
            .unwrap();
        drop(emitter);

        let mut output = String::new();
        while let Some(SessionEvent::Data { data, .. }) = rx.recv().await {
            output.push_str(&data);
        }
        assert!(output.contains("got:ping"), "output: {:?}", output);
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_write_does_not_block_when_program_never_reads() {
        let (session, _handles) =
            AgentSession::spawn("a".to_string(), &sh_spec(&["-c", "exec sleep 60"])).unwrap();

        // Far more than the PTY input buffer holds.
        let chunk = vec![b'x'; 64 * 1024];
        let queued = timeout(Duration::from_secs(2), async {
            for _ in 0..4 {
                session.write(&chunk).unwrap();
            }
        })
        .await;
        assert!(queued.is_ok(), "write blocked the caller");

        // The runtime keeps serving timers while the writer thread is stuck.
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.kill();
    }

    #[tokio::test]
    async fn test_kill_ends_pump() {
        let (session, handles) = AgentSession::spawn("a".to_string(), &sh_spec(&[])).unwrap();
        let (tx, _rx) = mpsc::channel(64);
        let emitter = Emitter::new("a".to_string(), tx);

        session.kill();
        let code = timeout(Duration::from_secs(10), session.pump_output(handles, &emitter))
            .await
            .expect("pump did not finish after kill");
        assert_ne!(code, 0);
    }

    #[test]
    fn test_finish_is_once() {
        let (session, _handles) = AgentSession::spawn("a".to_string(), &sh_spec(&[])).unwrap();
        assert!(session.finish());
        assert!(!session.finish());
        session.kill();
    }
}
