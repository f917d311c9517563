//! Command log sinks.
//!
//! A session hands every outgoing command line to its [`CommandLog`]
//! before writing it to the child, so the log always reflects what the
//! child was asked to do, in order.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::{AppError, Result};

/// Records command lines sent to a child program.
///
/// Implementations must be [`Send`] and [`Sync`] so a session can be moved
/// across tasks.
pub trait CommandLog: Send + Sync {
    /// Record a single command line, exactly as sent (without terminator).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn record(&self, line: &str) -> Result<()>;
}

/// Writes one command per line to a file, flushing after every record.
#[derive(Debug)]
pub struct FileCommandLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileCommandLog {
    /// Create (or truncate) the log file at `path`.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Log`] if the directory or file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Log(format!(
                    "failed to create command log directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                AppError::Log(format!("failed to open command log {}: {e}", path.display()))
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommandLog for FileCommandLog {
    fn record(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}").map_err(|e| AppError::Log(format!("write failed: {e}")))?;
        writer
            .flush()
            .map_err(|e| AppError::Log(format!("flush failed: {e}")))
    }
}

/// Keeps recorded commands in memory.
#[derive(Debug, Default)]
pub struct MemoryCommandLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryCommandLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded line, in record order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandLog for MemoryCommandLog {
    fn record(&self, line: &str) -> Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
        Ok(())
    }
}
