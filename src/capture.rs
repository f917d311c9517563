//! Capture loops.
//!
//! A capture loop drains one child output stream into one
//! [`ResponseQueue`]. It is driven by [`FramedRead`] over the stream with a
//! [`LineCodec`], and stops when the session cancels it, when the stream
//! reaches EOF, or when a read fails. The outcome is recorded on the queue
//! with [`ResponseQueue::finish`].
//!
//! # Outcomes
//!
//! | Event                    | Recorded as                    |
//! |--------------------------|--------------------------------|
//! | cancellation token fired | [`StreamEnd::Stopped`]         |
//! | child closed the stream  | [`StreamEnd::Eof`]             |
//! | read or UTF-8 error      | [`StreamEnd::Failed`]          |
//! | line over the limit      | skipped; counted on the queue  |

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::codec::LineCodec;
use crate::queue::{ResponseQueue, StreamEnd};

// ── Public API ────────────────────────────────────────────────────────────────

/// Run a capture loop to completion on the current task.
///
/// Each decoded line is pushed to `queue` in arrival order. Over-long lines
/// are discarded by the codec and do not stop the loop; the running total is
/// published with [`ResponseQueue::record_skipped`].
///
/// # Cancellation
///
/// Cancellation is checked first on every iteration, so a loop parked in a
/// read stops as soon as `cancel` fires and records [`StreamEnd::Stopped`].
///
/// # Return value
///
/// How the stream ended. The same value has already been recorded on
/// `queue`, unless the queue had been finished earlier.
///
/// # Examples
///
/// ```rust,ignore
/// let queue = Arc::new(ResponseQueue::new(Channel::Primary));
/// let end = run_capture(child_stdout, LineCodec::new(), queue, cancel).await;
/// ```
pub async fn run_capture<R>(
    stream: R,
    codec: LineCodec,
    queue: Arc<ResponseQueue>,
    cancel: CancellationToken,
) -> StreamEnd
where
    R: AsyncRead + Unpin + Send,
{
    let channel = queue.channel();
    let mut framed = FramedRead::new(stream, codec);

    let end = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%channel, "capture: cancellation received, stopping");
                break StreamEnd::Stopped;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(%channel, "capture: EOF");
                        break StreamEnd::Eof;
                    }
                    Some(Ok(line)) => {
                        debug!(%channel, line = line.as_str(), "capture: line");
                        // Skips surface with the next decoded line.
                        queue.record_skipped(framed.decoder().skipped());
                        queue.push(line);
                    }
                    Some(Err(err)) => {
                        warn!(%channel, error = %err, "capture: read failed, stopping");
                        break StreamEnd::Failed(err.to_string());
                    }
                }
            }
        }
    };

    queue.record_skipped(framed.decoder().skipped());
    queue.finish(end.clone());
    end
}

/// Spawn [`run_capture`] as a background task inside a `capture` span.
///
/// The returned handle resolves to the [`StreamEnd`]. Aborting it drops the
/// stream without recording an end; the session marks the queue itself.
#[must_use]
pub fn spawn_capture<R>(
    stream: R,
    codec: LineCodec,
    queue: Arc<ResponseQueue>,
    cancel: CancellationToken,
) -> JoinHandle<StreamEnd>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let span = info_span!("capture", channel = %queue.channel());
    tokio::spawn(run_capture(stream, codec, queue, cancel).instrument(span))
}
