//! Subprocess execution for `git` and `ssh`.
//!
//! Commands run through the [`CommandRunner`] trait so callers can be tested
//! against scripted output. Timed-out children are killed (`kill_on_drop`
//! sends SIGKILL) and reported as [`ExitKind::TimedOut`], which callers treat
//! differently from a command that failed on its own.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, mpsc};

/// Cooperative cancellation shared between a long-running task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancellationFlag::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the check so a concurrent cancel is not missed.
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({exit}): {stderr}")]
    Failed {
        program: String,
        exit: ExitKind,
        stderr: String,
    },

    #[error("{program} timed out after {timeout_secs}s")]
    TimedOut { program: String, timeout_secs: u64 },
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Code(i32),
    /// Terminated by a signal we did not send.
    Signal(i32),
    /// Killed by us after its timeout elapsed.
    TimedOut,
}

impl ExitKind {
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            return ExitKind::Success;
        }
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitKind::Signal(signal);
            }
        }
        ExitKind::Code(-1)
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == ExitKind::Success
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Success => write!(f, "success"),
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(signal) => write!(f, "signal {signal}"),
            ExitKind::TimedOut => write!(f, "timed out"),
        }
    }
}

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    #[must_use]
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `program arg1 arg2`, for logs.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitKind,
}

impl CommandOutput {
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit: ExitKind::Success,
        }
    }

    /// Stdout on success, otherwise a [`CommandError`].
    pub fn into_stdout(self, spec: &CommandSpec) -> Result<String, CommandError> {
        match self.exit {
            ExitKind::Success => Ok(self.stdout),
            ExitKind::TimedOut => Err(CommandError::TimedOut {
                program: spec.program.clone(),
                timeout_secs: spec.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
            exit => Err(CommandError::Failed {
                program: spec.program.clone(),
                exit,
                stderr: self.stderr.trim().to_string(),
            }),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A timeout is not an error here;
    /// it is reported as [`ExitKind::TimedOut`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run and forward stdout line by line until the process exits or the
    /// receiver is dropped.
    async fn stream_lines(
        &self,
        spec: &CommandSpec,
        lines: mpsc::Sender<String>,
    ) -> Result<ExitKind, CommandError>;
}

/// Runs real processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl TokioRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        command
    }

    fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> CommandError {
        CommandError::Spawn {
            program: spec.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %spec.display(), "running command");
        let child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let output = match spec.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    tracing::debug!(command = %spec.display(), ?timeout, "command timed out, killed");
                    return Ok(CommandOutput {
                        stdout: String::new(),
                        stderr: String::new(),
                        exit: ExitKind::TimedOut,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| Self::spawn_error(spec, e))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit: ExitKind::from_status(output.status),
        };
        if !result.exit.is_success() {
            tracing::debug!(
                command = %spec.display(),
                exit = %result.exit,
                stderr = %result.stderr.trim(),
                "command failed"
            );
        }
        Ok(result)
    }

    async fn stream_lines(
        &self,
        spec: &CommandSpec,
        lines: mpsc::Sender<String>,
    ) -> Result<ExitKind, CommandError> {
        tracing::debug!(command = %spec.display(), "streaming command output");
        let mut child = Self::command(spec)
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;
        let Some(stdout) = child.stdout.take() else {
            return Ok(ExitKind::Code(-1));
        };

        let mut reader = BufReader::new(stdout).lines();
        loop {
            let next = tokio::select! {
                next = reader.next_line() => next,
                () = lines.closed() => {
                    let _ = child.start_kill();
                    break;
                }
            };
            match next {
                Ok(Some(line)) => {
                    if lines.send(line).await.is_err() {
                        // Receiver gone: stop the process.
                        let _ = child.start_kill();
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(command = %spec.display(), error = %err, "reading output failed");
                    let _ = child.start_kill();
                    break;
                }
            }
        }

        let status = child.wait().await.map_err(|e| Self::spawn_error(spec, e))?;
        Ok(ExitKind::from_status(status))
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedRunner;

#[cfg(any(test, feature = "test-util"))]
mod scripted {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// Replays canned outputs keyed by the full command line.
    ///
    /// Unscripted commands succeed with empty output. Streamed commands send
    /// the scripted stdout line by line.
    #[derive(Clone, Default)]
    pub struct ScriptedRunner {
        inner: Arc<Mutex<ScriptedInner>>,
    }

    #[derive(Default)]
    struct ScriptedInner {
        outputs: HashMap<String, VecDeque<CommandOutput>>,
        invocations: Vec<String>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue an output for `command` (`program arg1 arg2`).
        pub fn push(&self, command: &str, output: CommandOutput) {
            self.inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .outputs
                .entry(command.to_string())
                .or_default()
                .push_back(output);
        }

        #[must_use]
        pub fn invocations(&self) -> Vec<String> {
            self.inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .invocations
                .clone()
        }

        fn next(&self, spec: &CommandSpec) -> CommandOutput {
            let command = spec.display();
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            inner.invocations.push(command.clone());
            inner
                .outputs
                .get_mut(&command)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| CommandOutput::success(""))
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            tokio::task::yield_now().await;
            Ok(self.next(spec))
        }

        async fn stream_lines(
            &self,
            spec: &CommandSpec,
            lines: mpsc::Sender<String>,
        ) -> Result<ExitKind, CommandError> {
            let output = self.next(spec);
            for line in output.stdout.lines() {
                if lines.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Ok(output.exit)
        }
    }
}
