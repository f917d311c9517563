#![forbid(unsafe_code)]

//! Line-oriented command/response transport for programs driven over stdio.
//!
//! [`ProcessSession`] launches an instrument-control program (for example an
//! SCPI emulator), writes command lines to its stdin, and captures stdout and
//! stderr into two independent queues that callers read with a bounded wait.

pub mod capture;
pub mod codec;
pub mod command_log;
pub mod config;
pub mod errors;
pub mod queue;
pub mod script;
pub mod session;

pub use command_log::{CommandLog, FileCommandLog, MemoryCommandLog};
pub use config::SessionConfig;
pub use errors::{AppError, Result};
pub use queue::{Channel, StreamEnd};
pub use session::ProcessSession;
