//! Scripted command exchanges.
//!
//! Runs a list of command lines against a [`ProcessSession`] and collects
//! whatever each command produced. Because the transport does not know
//! which commands reply, responses are gathered until the child stays quiet
//! for a settle window.

use std::time::Duration;

use tracing::debug;

use crate::session::ProcessSession;
use crate::{AppError, Result};

/// One command and the output observed after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    /// Command line as sent.
    pub command: String,
    /// Lines read from stdout, in order.
    pub responses: Vec<String>,
    /// Lines read from stderr, in order.
    pub diagnostics: Vec<String>,
}

/// Command lines of a script: blank lines and `#` comments are skipped,
/// trailing whitespace is trimmed.
#[must_use]
pub fn script_commands(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect()
}

/// Send each command in turn and collect its output.
///
/// After each send, stdout lines are read until none arrives within
/// `settle`, then queued stderr lines are drained. Stops early, without
/// error, once stdout has ended.
///
/// # Errors
///
/// Propagates `send` failures and stdout read failures.
pub async fn run_script<'a, I>(
    session: &mut ProcessSession,
    commands: I,
    settle: Duration,
) -> Result<Vec<Exchange>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut exchanges = Vec::new();

    for command in commands {
        session.send(command).await?;

        let mut exchange = Exchange {
            command: command.to_owned(),
            ..Exchange::default()
        };
        let mut ended = false;
        loop {
            match session.recv_within(settle).await {
                Ok(line) => exchange.responses.push(line),
                Err(err) if err.is_timeout() => break,
                Err(AppError::StreamClosed(channel)) => {
                    debug!(%channel, command, "stream ended during script");
                    ended = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        exchange.diagnostics = session.drain_all_err();
        exchanges.push(exchange);

        if ended {
            break;
        }
    }

    Ok(exchanges)
}
