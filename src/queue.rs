//! Per-channel response queues.
//!
//! Each child output stream feeds exactly one [`ResponseQueue`]. The capture
//! loop is the only producer and the owning session the only consumer.
//! Besides the FIFO of decoded lines the queue records how its stream ended
//! ([`StreamEnd`]), so a consumer can tell "no data yet" from "child gone"
//! without waiting out a timeout.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Notify;
use tracing::warn;

/// Which child output stream a queue is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The child's standard output: normal responses.
    Primary,
    /// The child's standard error: diagnostics and error reports.
    Diagnostic,
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.write_str("stdout"),
            Self::Diagnostic => f.write_str("stderr"),
        }
    }
}

/// How a channel's stream stopped producing lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The child closed the stream.
    Eof,
    /// Reading the stream failed.
    Failed(String),
    /// The session stopped the capture loop.
    Stopped,
}

/// What to do with a new line when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest unread line to make room.
    #[default]
    DropOldest,
    /// Discard the incoming line.
    DropNewest,
}

/// Result of a blocking pop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    /// The oldest unread line.
    Line(String),
    /// The queue is empty and will stay empty.
    Ended(StreamEnd),
    /// Nothing arrived within the window.
    TimedOut,
}

#[derive(Debug, Default)]
struct QueueState {
    lines: VecDeque<String>,
    end: Option<StreamEnd>,
    dropped: u64,
    skipped: u64,
}

/// FIFO of decoded lines with blocking, time-bounded pop.
#[derive(Debug)]
pub struct ResponseQueue {
    channel: Channel,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ResponseQueue {
    /// Create an unbounded queue.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            capacity: None,
            overflow: OverflowPolicy::default(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Create a queue holding at most `capacity` unread lines.
    ///
    /// A zero capacity is treated as one.
    #[must_use]
    pub fn bounded(channel: Channel, capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            overflow,
            ..Self::new(channel)
        }
    }

    /// Channel this queue is attached to.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Append a line. Lines pushed after the stream has ended are ignored.
    pub fn push(&self, line: String) {
        {
            let mut state = self.lock();
            if state.end.is_some() {
                return;
            }
            if let Some(capacity) = self.capacity {
                if state.lines.len() >= capacity {
                    state.dropped += 1;
                    warn!(
                        channel = %self.channel,
                        capacity,
                        policy = ?self.overflow,
                        "response queue full, dropping a line"
                    );
                    match self.overflow {
                        OverflowPolicy::DropOldest => {
                            state.lines.pop_front();
                        }
                        OverflowPolicy::DropNewest => return,
                    }
                }
            }
            state.lines.push_back(line);
        }
        self.notify.notify_one();
    }

    /// Record that no further lines will arrive.
    ///
    /// Only the first call has an effect; later ends are ignored so the
    /// original cause is preserved. Every waiting pop is woken.
    pub fn finish(&self, end: StreamEnd) {
        {
            let mut state = self.lock();
            if state.end.is_some() {
                return;
            }
            state.end = Some(end);
        }
        self.notify.notify_waiters();
    }

    /// Record the running total of over-long lines the decoder discarded.
    ///
    /// Totals only grow; a smaller value is ignored.
    pub fn record_skipped(&self, total: u64) {
        let mut state = self.lock();
        state.skipped = state.skipped.max(total);
    }

    /// How the stream ended, if it has.
    #[must_use]
    pub fn end(&self) -> Option<StreamEnd> {
        self.lock().end.clone()
    }

    /// Number of unread lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    /// Whether there are no unread lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    /// Lines discarded by the overflow policy so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Over-long lines discarded before reaching the queue.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.lock().skipped
    }

    /// Remove and return every unread line, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.lock().lines.drain(..).collect()
    }

    /// Pop the oldest line without waiting.
    pub fn try_pop(&self) -> Option<String> {
        self.lock().lines.pop_front()
    }

    /// Pop the oldest line, waiting up to `window` for one to arrive.
    ///
    /// Queued lines are always returned before the end of the stream is
    /// reported.
    pub async fn pop_timeout(&self, window: Duration) -> Pop {
        tokio::time::timeout(window, self.pop())
            .await
            .unwrap_or(Pop::TimedOut)
    }

    async fn pop(&self) -> Pop {
        loop {
            // Registered before the check so neither a `notify_one` permit
            // nor a `notify_waiters` from `finish` can slip past.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(line) = state.lines.pop_front() {
                    return Pop::Line(line);
                }
                if let Some(end) = &state.end {
                    return Pop::Ended(end.clone());
                }
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
