#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Runs the agent executable for one work item.
//!
//! The child is spawned with piped output. Stdout is tokenized into lines as
//! it arrives and every JSON line is handed to [`SupervisorHooks::on_record`]
//! while the process is still running. Both streams are retained up to a byte
//! cap for the failure report. The wall-clock limit ends in SIGTERM, a grace
//! period, then SIGKILL.

mod capture;
mod stream_json;

#[cfg(all(test, unix))]
mod tests;

pub use capture::{capture_lines, capture_stream_limited, LineSplitter, StreamCapture};
pub use stream_json::{classify, parse_line, StreamRecord};

use crate::types::{AgentId, RunId, SessionId};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_EXECUTABLE: &str = "claude";
pub const DEFAULT_MAX_RUN_TIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 10 * 1024 * 1024;

const STDERR_EXCERPT_CHARS: usize = 4_096;
const LINE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Executable not found: {program}. Install it or set INBOX_EXECUTABLE")]
    ExecutableNotFound { program: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Process terminated by {signal}: {stderr}")]
    Signaled { signal: String, stderr: String },

    #[error("Process timed out after {}s", after.as_secs())]
    TimedOut { after: Duration },

    #[error("Process cancelled")]
    Cancelled,

    #[error("Process IO error: {0}")]
    Io(#[source] io::Error),
}

impl SupervisorError {
    /// Only a missing executable is structural; every other outcome may
    /// succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ExecutableNotFound { .. })
    }

    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub fn signal(&self) -> Option<&str> {
        match self {
            Self::Signaled { signal, .. } => Some(signal.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub executable: String,
    /// Arguments placed before the per-run arguments, e.g. a script path when
    /// `executable` is an interpreter.
    pub executable_args: Vec<String>,
    pub max_run_time: Duration,
    pub termination_grace: Duration,
    pub output_cap_bytes: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            executable_args: Vec::new(),
            max_run_time: DEFAULT_MAX_RUN_TIME,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub run_id: RunId,
    pub agent_id: AgentId,
    pub workspace: PathBuf,
    pub session_id: SessionId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub records: usize,
    pub stdout_truncated: bool,
}

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Callbacks fired while a child runs. Implementations own their error
/// handling; a failing hook never aborts the run.
pub trait SupervisorHooks: Send + Sync {
    fn on_spawned(&self, pid: u32) -> HookFuture<'_>;
    fn on_record(&self, record: StreamRecord) -> HookFuture<'_>;
}

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    #[must_use]
    pub const fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Arguments passed to the executable for `request`.
    #[must_use]
    pub fn arguments(&self, request: &ExecutionRequest) -> Vec<String> {
        self.config
            .executable_args
            .iter()
            .cloned()
            .chain([
                "--cwd".to_string(),
                request.workspace.display().to_string(),
                "--resume".to_string(),
                request.session_id.value().to_string(),
                "-p".to_string(),
                request.message.clone(),
                "--output-format".to_string(),
                "stream-json".to_string(),
            ])
            .collect()
    }

    /// Runs the executable to completion, timeout or cancellation.
    ///
    /// # Errors
    /// Returns a [`SupervisorError`] describing why the run did not exit 0.
    pub async fn execute<H>(
        &self,
        request: &ExecutionRequest,
        hooks: &H,
        cancel: &CancellationToken,
    ) -> std::result::Result<ExecutionOutcome, SupervisorError>
    where
        H: SupervisorHooks + ?Sized,
    {
        let program = self.config.executable.as_str();
        let mut child = Command::new(program)
            .args(self.arguments(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| spawn_error(program, source))?;

        let pid = child.id();
        info!(
            run_id = %request.run_id,
            agent_id = %request.agent_id,
            pid = ?pid,
            "Spawned agent process"
        );
        if let Some(pid) = pid {
            hooks.on_spawned(pid).await;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Io(io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::Io(io::Error::other("missing stderr pipe")))?;

        let cap = self.config.output_cap_bytes;
        let (line_tx, mut line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let stdout_task = tokio::spawn(capture_lines(stdout, cap, line_tx));
        let stderr_task = tokio::spawn(capture_stream_limited(stderr, cap));

        let deadline = tokio::time::sleep(self.config.max_run_time);
        tokio::pin!(deadline);
        let mut records = 0_usize;
        let mut lines_open = true;

        let ending = loop {
            tokio::select! {
                line = line_rx.recv(), if lines_open => match line {
                    Some(line) => records += forward_line(&line, hooks).await,
                    None => lines_open = false,
                },
                status = child.wait() => break Ending::Exited(status.map_err(SupervisorError::Io)?),
                () = &mut deadline => break Ending::TimedOut,
                () = cancel.cancelled() => break Ending::Cancelled,
            }
        };

        match &ending {
            Ending::TimedOut => {
                warn!(
                    run_id = %request.run_id,
                    after_secs = self.config.max_run_time.as_secs(),
                    "Agent process timed out"
                );
                terminate(&mut child, self.config.termination_grace)
                    .await
                    .map_err(SupervisorError::Io)?;
            }
            Ending::Cancelled => {
                info!(run_id = %request.run_id, "Cancelling agent process");
                child.kill().await.map_err(SupervisorError::Io)?;
            }
            Ending::Exited(_) => {}
        }

        // Late lines are still forwarded; readers that outlive the grace
        // period (pipes inherited by grandchildren) are abandoned.
        let drained = tokio::time::timeout(self.config.termination_grace, async {
            while let Some(line) = line_rx.recv().await {
                records += forward_line(&line, hooks).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(run_id = %request.run_id, "Output pipes still open after exit; abandoning readers");
            stdout_task.abort();
            stderr_task.abort();
        }

        let stdout_capture = collect(stdout_task).await?;
        let stderr_capture = collect(stderr_task).await?;

        match ending {
            Ending::TimedOut => Err(SupervisorError::TimedOut {
                after: self.config.max_run_time,
            }),
            Ending::Cancelled => Err(SupervisorError::Cancelled),
            Ending::Exited(status) if status.success() => Ok(ExecutionOutcome {
                exit_code: 0,
                records,
                stdout_truncated: stdout_capture.truncated,
            }),
            Ending::Exited(status) => Err(classify_exit(
                status,
                stderr_capture.excerpt(STDERR_EXCERPT_CHARS),
            )),
        }
    }
}

fn spawn_error(program: &str, source: io::Error) -> SupervisorError {
    if source.kind() == io::ErrorKind::NotFound {
        SupervisorError::ExecutableNotFound {
            program: program.to_string(),
        }
    } else {
        SupervisorError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

async fn forward_line<H>(line: &str, hooks: &H) -> usize
where
    H: SupervisorHooks + ?Sized,
{
    match parse_line(line) {
        Some(record) => {
            hooks.on_record(record).await;
            1
        }
        None => {
            debug!(line_len = line.len(), "Ignoring non-JSON output line");
            0
        }
    }
}

async fn collect(
    task: JoinHandle<std::result::Result<StreamCapture, SupervisorError>>,
) -> std::result::Result<StreamCapture, SupervisorError> {
    match task.await {
        Ok(result) => result,
        Err(join) if join.is_cancelled() => Ok(StreamCapture {
            bytes: Vec::new(),
            truncated: true,
        }),
        Err(join) => Err(SupervisorError::Io(io::Error::other(join))),
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        if send_sigterm(pid).await {
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status;
            }
            warn!(pid, "Agent process ignored SIGTERM; killing");
        }
    }
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
async fn send_sigterm(pid: u32) -> bool {
    Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

#[cfg(not(unix))]
async fn send_sigterm(_pid: u32) -> bool {
    false
}

fn classify_exit(status: ExitStatus, stderr: String) -> SupervisorError {
    if let Some(code) = status.code() {
        return SupervisorError::NonZeroExit { code, stderr };
    }
    match signal_name(status) {
        Some(signal) => SupervisorError::Signaled { signal, stderr },
        None => SupervisorError::NonZeroExit { code: -1, stderr },
    }
}

#[cfg(unix)]
fn signal_name(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|signo| {
        match signo {
            1 => "SIGHUP",
            2 => "SIGINT",
            3 => "SIGQUIT",
            6 => "SIGABRT",
            9 => "SIGKILL",
            11 => "SIGSEGV",
            13 => "SIGPIPE",
            15 => "SIGTERM",
            other => return format!("signal {other}"),
        }
        .to_string()
    })
}

#[cfg(not(unix))]
const fn signal_name(_status: ExitStatus) -> Option<String> {
    None
}
