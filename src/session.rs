//! Process sessions.
//!
//! A [`ProcessSession`] owns one child program attached over its standard
//! streams. Commands go to the child's stdin; stdout and stderr are drained
//! by two capture tasks into per-channel [`ResponseQueue`]s, from which the
//! caller pulls responses with a bounded wait.
//!
//! The transport does not pair commands with responses: a caller issues one
//! `recv` per line it expects.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::capture::spawn_capture;
use crate::codec::LineCodec;
use crate::command_log::{CommandLog, FileCommandLog};
use crate::config::SessionConfig;
use crate::queue::{Channel, Pop, ResponseQueue, StreamEnd};
use crate::{AppError, Result};

/// Upper bound on waiting for an aborted capture task to unwind.
const CAPTURE_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on reaping the child after it has been killed.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum SessionState {
    Open,
    Closed(Option<ExitStatus>),
}

/// A running child program and the queues capturing its output.
pub struct ProcessSession {
    config: SessionConfig,
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    encoder: LineCodec,
    stdout: Arc<ResponseQueue>,
    stderr: Arc<ResponseQueue>,
    captures: Vec<JoinHandle<StreamEnd>>,
    cancel: CancellationToken,
    command_log: Option<Arc<dyn CommandLog>>,
    state: SessionState,
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("program", &self.config.program)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("pending", &self.stdout.len())
            .field("pending_err", &self.stderr.len())
            .finish_non_exhaustive()
    }
}

impl ProcessSession {
    /// Launch the configured program and start capturing its output.
    ///
    /// Both capture tasks are running when this returns. Anything the child
    /// writes earlier waits in the pipe buffers, so no output is lost.
    /// Opens the command log named by [`SessionConfig::command_log`], if any.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` if the configuration is invalid.
    /// - `AppError::Spawn` if the program cannot be launched or a pipe
    ///   cannot be captured.
    /// - `AppError::Log` if the command log file cannot be created.
    pub fn spawn(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let command_log = match &config.command_log {
            Some(path) => Some(Arc::new(FileCommandLog::create(path)?) as Arc<dyn CommandLog>),
            None => None,
        };

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);
        if !config.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&config.env);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", config.program))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
        let stdout_raw = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
        let stderr_raw = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

        let pid = child.id();
        let (stdout, stderr) = match config.queue {
            Some(q) => (
                ResponseQueue::bounded(Channel::Primary, q.capacity, q.overflow),
                ResponseQueue::bounded(Channel::Diagnostic, q.capacity, q.overflow),
            ),
            None => (
                ResponseQueue::new(Channel::Primary),
                ResponseQueue::new(Channel::Diagnostic),
            ),
        };
        let stdout = Arc::new(stdout);
        let stderr = Arc::new(stderr);

        let cancel = CancellationToken::new();
        let captures = vec![
            spawn_capture(
                stdout_raw,
                LineCodec::with_max_length(config.max_line_bytes),
                Arc::clone(&stdout),
                cancel.clone(),
            ),
            spawn_capture(
                stderr_raw,
                LineCodec::with_max_length(config.max_line_bytes),
                Arc::clone(&stderr),
                cancel.clone(),
            ),
        ];

        info!(
            pid = pid.unwrap_or(0),
            program = config.program,
            args = ?config.args,
            "child process spawned"
        );

        Ok(Self {
            encoder: LineCodec::with_max_length(config.max_line_bytes),
            config,
            child,
            pid,
            stdin: Some(stdin),
            stdout,
            stderr,
            captures,
            cancel,
            command_log,
            state: SessionState::Open,
        })
    }

    /// Replace the command log.
    #[must_use]
    pub fn with_command_log(mut self, log: Arc<dyn CommandLog>) -> Self {
        self.command_log = Some(log);
        self
    }

    /// Configuration the session was spawned with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// OS process id of the child, if it was known at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed(_))
    }

    /// Whether the child is still running. Never blocks.
    pub fn is_alive(&mut self) -> bool {
        !self.is_closed() && matches!(self.child.try_wait(), Ok(None))
    }

    /// Send one command line to the child.
    ///
    /// The line is recorded in the command log first (a log failure is
    /// reported and otherwise ignored), then written with a `\n` terminator
    /// and flushed.
    ///
    /// # Errors
    ///
    /// - `AppError::Closed` after [`close`](Self::close).
    /// - `AppError::Write` if the child has exited or the write fails.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Closed);
        }

        if let Some(log) = &self.command_log {
            if let Err(err) = log.record(line) {
                warn!(%err, "failed to record command");
            }
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(AppError::Write(format!("child has exited ({status})")));
        }

        let mut buf = BytesMut::with_capacity(line.len() + 1);
        self.encoder
            .encode(line.to_owned(), &mut buf)
            .map_err(|err| AppError::Write(format!("failed to encode command: {err}")))?;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Write("stdin is closed".into()))?;
        stdin
            .write_all(&buf)
            .await
            .map_err(|err| AppError::Write(format!("write failed: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::Write(format!("flush failed: {err}")))?;

        debug!(pid = self.pid.unwrap_or(0), line, "command sent");
        Ok(())
    }

    /// Next line from the child's stdout, waiting up to the configured
    /// receive timeout.
    ///
    /// # Errors
    ///
    /// - `AppError::ReceiveTimeout` if nothing arrives in time.
    /// - `AppError::StreamClosed` if stdout has ended and nothing is queued.
    /// - `AppError::ReadFailure` if reading stdout failed.
    pub async fn recv(&self) -> Result<String> {
        self.recv_within(self.config.recv_timeout()).await
    }

    /// Next line from the child's stderr, waiting up to the configured
    /// receive timeout.
    ///
    /// # Errors
    ///
    /// Same as [`recv`](Self::recv), for the diagnostic channel.
    pub async fn recv_err(&self) -> Result<String> {
        self.recv_err_within(self.config.recv_timeout()).await
    }

    /// [`recv`](Self::recv) with an explicit window.
    ///
    /// # Errors
    ///
    /// Same as [`recv`](Self::recv).
    pub async fn recv_within(&self, window: Duration) -> Result<String> {
        receive(&self.stdout, window).await
    }

    /// [`recv_err`](Self::recv_err) with an explicit window.
    ///
    /// # Errors
    ///
    /// Same as [`recv_err`](Self::recv_err).
    pub async fn recv_err_within(&self, window: Duration) -> Result<String> {
        receive(&self.stderr, window).await
    }

    /// Unread stdout lines.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.stdout.len()
    }

    /// Unread stderr lines.
    #[must_use]
    pub fn pending_err_count(&self) -> usize {
        self.stderr.len()
    }

    /// Remove and return every queued stdout line, oldest first.
    pub fn drain_all(&self) -> Vec<String> {
        self.stdout.drain()
    }

    /// Remove and return every queued stderr line, oldest first.
    pub fn drain_all_err(&self) -> Vec<String> {
        self.stderr.drain()
    }

    /// How a channel's stream ended, or `None` while it is still open.
    #[must_use]
    pub fn stream_end(&self, channel: Channel) -> Option<StreamEnd> {
        self.queue(channel).end()
    }

    /// Lines discarded by a bounded queue's overflow policy.
    #[must_use]
    pub fn dropped_count(&self, channel: Channel) -> u64 {
        self.queue(channel).dropped()
    }

    /// Output lines discarded for exceeding [`SessionConfig::max_line_bytes`].
    #[must_use]
    pub fn skipped_count(&self, channel: Channel) -> u64 {
        self.queue(channel).skipped()
    }

    /// Shut the session down and return the child's exit status.
    ///
    /// Stops both capture tasks, sends SIGHUP, closes stdin, gives the child
    /// [`SessionConfig::shutdown_grace`] to exit and kills it otherwise.
    /// Every step is best-effort and failures are only logged. Calling it
    /// again returns the first result. `None` means the child could not be
    /// reaped.
    pub async fn close(&mut self) -> Option<ExitStatus> {
        if let SessionState::Closed(status) = self.state {
            return status;
        }

        let span = info_span!("close", pid = self.pid.unwrap_or(0));
        let status = self.shutdown().instrument(span).await;
        self.state = SessionState::Closed(status);
        status
    }

    async fn shutdown(&mut self) -> Option<ExitStatus> {
        self.cancel.cancel();

        for handle in std::mem::take(&mut self.captures) {
            handle.abort();
            match tokio::time::timeout(CAPTURE_JOIN_TIMEOUT, handle).await {
                Ok(Ok(end)) => debug!(?end, "capture task finished"),
                Ok(Err(err)) if err.is_cancelled() => debug!("capture task aborted"),
                Ok(Err(err)) => warn!(%err, "capture task failed"),
                Err(_elapsed) => warn!("capture task did not stop in time, detaching"),
            }
        }
        self.stdout.finish(StreamEnd::Stopped);
        self.stderr.finish(StreamEnd::Stopped);

        self.hang_up();

        drop(self.stdin.take());

        let status = match tokio::time::timeout(self.config.shutdown_grace(), self.child.wait())
            .await
        {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(%err, "error waiting for child process");
                None
            }
            Err(_elapsed) => {
                warn!("child did not exit within grace period, killing");
                if let Err(err) = self.child.start_kill() {
                    warn!(%err, "failed to kill child process");
                }
                match tokio::time::timeout(KILL_WAIT_TIMEOUT, self.child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(err)) => {
                        warn!(%err, "error reaping killed child process");
                        None
                    }
                    Err(_elapsed) => {
                        warn!("child could not be reaped");
                        None
                    }
                }
            }
        };

        match status {
            Some(status) => info!(%status, "session closed"),
            None => info!("session closed, exit status unknown"),
        }
        status
    }

    #[cfg(unix)]
    fn hang_up(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if !matches!(self.child.try_wait(), Ok(None)) {
            return;
        }
        let Some(raw) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        match kill(Pid::from_raw(raw), Signal::SIGHUP) {
            Ok(()) => debug!("SIGHUP delivered"),
            Err(err) => warn!(%err, "failed to deliver SIGHUP"),
        }
    }

    #[cfg(not(unix))]
    fn hang_up(&mut self) {}

    fn queue(&self, channel: Channel) -> &ResponseQueue {
        match channel {
            Channel::Primary => &self.stdout,
            Channel::Diagnostic => &self.stderr,
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        // The child itself is reaped by `kill_on_drop`.
        self.cancel.cancel();
        for handle in &self.captures {
            handle.abort();
        }
    }
}

async fn receive(queue: &ResponseQueue, window: Duration) -> Result<String> {
    let channel = queue.channel();
    match queue.pop_timeout(window).await {
        Pop::Line(line) => Ok(line),
        Pop::TimedOut => Err(AppError::ReceiveTimeout(channel)),
        Pop::Ended(StreamEnd::Failed(reason)) => Err(AppError::ReadFailure { channel, reason }),
        Pop::Ended(StreamEnd::Eof | StreamEnd::Stopped) => Err(AppError::StreamClosed(channel)),
    }
}
