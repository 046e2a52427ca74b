//! Bounded external process execution.
//!
//! A command runs directly (no shell) with stdin closed and stdout/stderr
//! captured. Output is streamed to the session as it arrives, up to a byte
//! budget; exceeding the budget or the wall-clock timeout kills the process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::config::SandboxConfig;
use crate::session::{CrlfNormalizer, Emitter, Utf8Decoder};

/// Buffer size for reading process output.
const READ_BUFFER_SIZE: usize = 4096;

/// Resource bounds for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    /// Wall-clock limit.
    pub timeout: Duration,
    /// Maximum number of output bytes forwarded.
    pub max_output_bytes: usize,
}

impl ExecLimits {
    /// Limits from the sandbox configuration.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.exec_timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Decoder state for one output stream.
#[derive(Debug, Default)]
struct StreamText {
    utf8: Utf8Decoder,
    crlf: CrlfNormalizer,
}

impl StreamText {
    fn decode(&mut self, chunk: &[u8]) -> String {
        let text = self.utf8.decode(chunk);
        self.crlf.normalize(&text)
    }

    fn finish(&mut self) -> String {
        let text = self.utf8.finish();
        self.crlf.normalize(&text)
    }
}

/// How a command run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The process exited on its own.
    Exited(i32),
    /// Output exceeded the budget; the process was killed.
    Truncated { limit: usize },
    /// The timeout elapsed; the process was killed.
    TimedOut(Duration),
    /// The process could not be started.
    SpawnFailed(String),
}

/// Runs `argv` in `cwd`, streaming combined stdout and stderr through `emitter`.
///
/// Returns once the process has been reaped. An empty `argv` is a no-op that
/// exits with 0.
pub async fn run_command(
    argv: &[String],
    cwd: &Path,
    limits: &ExecLimits,
    emitter: &Emitter,
) -> ExecOutcome {
    let Some((program, args)) = argv.split_first() else {
        return ExecOutcome::Exited(0);
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return ExecOutcome::SpawnFailed(e.to_string()),
    };

    tracing::debug!(
        session_id = %emitter.session_id(),
        program = %program,
        pid = ?child.id(),
        "Spawned command"
    );

    let streamed = tokio::time::timeout(
        limits.timeout,
        stream_output(&mut child, limits.max_output_bytes, emitter),
    )
    .await;

    match streamed {
        Ok(outcome) => outcome,
        Err(_) => {
            terminate(&mut child, emitter).await;
            ExecOutcome::TimedOut(limits.timeout)
        }
    }
}

/// Forwards output until both streams close or the budget is exceeded, then
/// reaps the process.
async fn stream_output(child: &mut Child, budget: usize, emitter: &Emitter) -> ExecOutcome {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut stdout_open = stdout.is_some();
    let mut stderr_open = stderr.is_some();

    let mut stdout_buf = [0u8; READ_BUFFER_SIZE];
    let mut stderr_buf = [0u8; READ_BUFFER_SIZE];
    let mut stdout_text = StreamText::default();
    let mut stderr_text = StreamText::default();
    let mut forwarded = 0usize;

    while stdout_open || stderr_open {
        let (read, from_stdout) = tokio::select! {
            r = read_chunk(&mut stdout, &mut stdout_buf), if stdout_open => (r, true),
            r = read_chunk(&mut stderr, &mut stderr_buf), if stderr_open => (r, false),
        };

        let n = match read {
            Ok(0) | Err(_) => {
                if from_stdout {
                    stdout_open = false;
                } else {
                    stderr_open = false;
                }
                continue;
            }
            Ok(n) => n,
        };

        let (chunk, decoder) = if from_stdout {
            (&stdout_buf[..n], &mut stdout_text)
        } else {
            (&stderr_buf[..n], &mut stderr_text)
        };

        let remaining = budget - forwarded;
        if n > remaining {
            emitter.data(decoder.decode(&chunk[..remaining])).await;
            tracing::info!(
                session_id = %emitter.session_id(),
                limit = budget,
                "Output budget exceeded, killing command"
            );
            terminate(child, emitter).await;
            return ExecOutcome::Truncated { limit: budget };
        }

        forwarded += n;
        emitter.data(decoder.decode(chunk)).await;
    }

    emitter.data(stdout_text.finish()).await;
    emitter.data(stderr_text.finish()).await;

    match child.wait().await {
        Ok(status) => ExecOutcome::Exited(exit_code(status)),
        Err(e) => ExecOutcome::SpawnFailed(e.to_string()),
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

/// Kills the process and waits for it to be reaped.
async fn terminate(child: &mut Child, emitter: &Emitter) {
    if let Err(e) = child.kill().await {
        tracing::warn!(
            session_id = %emitter.session_id(),
            error = %e,
            "Failed to kill command"
        );
    }
}

/// Maps an exit status to a shell-style code; signal deaths become 128 + signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
