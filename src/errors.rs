//! Error types shared across the transport.

use std::fmt::{Display, Formatter};

use crate::queue::Channel;

/// Shared transport result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Transport error enumeration covering every failure a caller can observe.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The child program could not be launched or its pipes captured.
    Spawn(String),
    /// Writing a command to the child's stdin failed.
    Write(String),
    /// No line arrived on the channel within the receive window.
    ReceiveTimeout(Channel),
    /// The channel's queue is empty and its stream has ended.
    StreamClosed(Channel),
    /// The capture loop for the channel stopped on a read error.
    ReadFailure {
        /// Channel whose stream failed.
        channel: Channel,
        /// Reason reported by the reader.
        reason: String,
    },
    /// The session has already been closed.
    Closed,
    /// The command log could not be opened or written.
    Log(String),
    /// Any other file-system or I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::ReceiveTimeout(channel) => write!(f, "receive timeout: {channel}"),
            Self::StreamClosed(channel) => write!(f, "stream closed: {channel}"),
            Self::ReadFailure { channel, reason } => {
                write!(f, "read failure: {channel}: {reason}")
            }
            Self::Closed => write!(f, "session closed"),
            Self::Log(msg) => write!(f, "command log: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether the error only means "nothing arrived yet".
    ///
    /// Callers polling for optional output use this to tell an idle child
    /// apart from one whose stream is gone.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReceiveTimeout(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
