//! Unit tests for `AppError` display format and classification.

use scpi_stdio::{AppError, Channel};

#[test]
fn receive_timeout_names_the_channel() {
    let err = AppError::ReceiveTimeout(Channel::Primary);
    assert_eq!(err.to_string(), "receive timeout: stdout");
}

#[test]
fn stream_closed_names_the_channel() {
    let err = AppError::StreamClosed(Channel::Diagnostic);
    assert_eq!(err.to_string(), "stream closed: stderr");
}

#[test]
fn read_failure_includes_reason() {
    let err = AppError::ReadFailure {
        channel: Channel::Primary,
        reason: "stream did not contain valid UTF-8".into(),
    };
    assert_eq!(
        err.to_string(),
        "read failure: stdout: stream did not contain valid UTF-8"
    );
}

#[test]
fn prefixes_are_distinct() {
    let spawn = AppError::Spawn("no such file".into());
    let write = AppError::Write("broken pipe".into());
    let config = AppError::Config("program must not be empty".into());

    assert!(spawn.to_string().starts_with("spawn:"));
    assert!(write.to_string().starts_with("write:"));
    assert!(config.to_string().starts_with("config:"));
    assert_eq!(AppError::Closed.to_string(), "session closed");
}

#[test]
fn only_receive_timeout_is_a_timeout() {
    assert!(AppError::ReceiveTimeout(Channel::Diagnostic).is_timeout());
    assert!(!AppError::StreamClosed(Channel::Primary).is_timeout());
    assert!(!AppError::Write("x".into()).is_timeout());
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("missing")));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Closed);
}
