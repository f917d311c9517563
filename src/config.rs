//! Session configuration: TOML parsing, environment overrides, validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::codec::MAX_LINE_BYTES;
use crate::queue::OverflowPolicy;
use crate::{AppError, Result};

/// Environment variable naming the program to drive.
pub const ENV_PROGRAM: &str = "SCPI_STDIO_PROGRAM";
/// Environment variable holding whitespace-separated program arguments.
pub const ENV_ARGS: &str = "SCPI_STDIO_ARGS";
/// Environment variable naming the command log file.
pub const ENV_COMMAND_LOG: &str = "SCPI_STDIO_CMDLOG";
/// Environment variable holding the receive timeout in milliseconds.
pub const ENV_RECV_TIMEOUT_MS: &str = "SCPI_STDIO_RECV_TIMEOUT_MS";

fn default_true() -> bool {
    true
}

fn default_recv_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

/// Optional bound on each response queue.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Maximum unread lines per channel.
    pub capacity: usize,
    /// What to discard once `capacity` is reached.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// How to launch and talk to one child program.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to `program`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Whether the child inherits this process's environment.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    /// Working directory for the child; inherited when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// How long `recv`/`recv_err` wait for a line.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// How long `close` waits for the child after SIGHUP before killing it.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Longest accepted output line, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Bound on the response queues; unbounded when absent.
    #[serde(default)]
    pub queue: Option<QueueConfig>,
    /// File receiving every command sent.
    #[serde(default)]
    pub command_log: Option<PathBuf>,
    /// Line a script runner sends before closing the session.
    #[serde(default)]
    pub quit_command: Option<String>,
}

impl SessionConfig {
    /// Configuration for `program` with every other setting at its default.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            inherit_env: true,
            working_dir: None,
            recv_timeout_ms: default_recv_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_line_bytes: default_max_line_bytes(),
            queue: None,
            command_log: None,
            quit_command: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the receive timeout.
    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Bound both response queues.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize, overflow: OverflowPolicy) -> Self {
        self.queue = Some(QueueConfig { capacity, overflow });
        self
    }

    /// Log every sent command to `path`.
    #[must_use]
    pub fn with_command_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.command_log = Some(path.into());
        self
    }

    /// Line to send before closing.
    #[must_use]
    pub fn with_quit_command(mut self, line: impl Into<String>) -> Self {
        self.quit_command = Some(line.into());
        self
    }

    /// Receive timeout as a [`Duration`].
    #[must_use]
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, is not valid
    /// TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SCPI_STDIO_*` environment variables.
    ///
    /// Unset or empty variables leave the field untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `SCPI_STDIO_RECV_TIMEOUT_MS` is not a
    /// number.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(program) = non_empty_var(ENV_PROGRAM) {
            debug!(program, "program overridden from environment");
            self.program = program;
        }
        if let Some(args) = non_empty_var(ENV_ARGS) {
            self.args = args.split_whitespace().map(str::to_owned).collect();
        }
        if let Some(path) = non_empty_var(ENV_COMMAND_LOG) {
            self.command_log = Some(PathBuf::from(path));
        }
        if let Some(raw) = non_empty_var(ENV_RECV_TIMEOUT_MS) {
            self.recv_timeout_ms = raw.trim().parse().map_err(|err| {
                AppError::Config(format!("{ENV_RECV_TIMEOUT_MS} must be an integer: {err}"))
            })?;
        }
        Ok(())
    }

    /// Check invariants the session relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(AppError::Config("program must not be empty".into()));
        }
        if self.recv_timeout_ms == 0 {
            return Err(AppError::Config(
                "recv_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }
        if self.queue.is_some_and(|q| q.capacity == 0) {
            return Err(AppError::Config(
                "queue capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
