//! Line codec for child process streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! child that never emits a newline cannot make a capture loop allocate
//! without bound.
//!
//! Both directions use `\n` framing. On decode the trailing `\n` (and a
//! preceding `\r`, if any) is stripped; a final unterminated line is
//! yielded when the stream reaches EOF.
//!
//! # Usage
//!
//! Use [`LineCodec`] as the codec of a [`tokio_util::codec::FramedRead`]
//! over a child's stdout or stderr, and as a plain [`Encoder`] for lines
//! written to its stdin.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

/// Default maximum line length accepted on decode: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 codec with a bounded line length.
///
/// A line longer than the limit is discarded up to its terminator and
/// counted in [`LineCodec::skipped`]; decoding then resumes with the next
/// line. Only I/O failures (including invalid UTF-8) are returned as errors,
/// since [`tokio_util::codec::FramedRead`] ends the stream after any error.
///
/// # Decoder
///
/// Yields one `String` per line with the terminator removed. Invalid UTF-8
/// and reader failures are returned as [`io::Error`].
///
/// # Encoder
///
/// Writes `item\n`. The length limit is a decoder-side concern.
///
/// # Examples
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use scpi_stdio::codec::LineCodec;
///
/// let lines = FramedRead::new(child_stdout, LineCodec::with_max_length(4096));
/// ```
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
    skipped: u64,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that discards lines longer than `max_line_bytes`.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
            skipped: 0,
        }
    }

    /// Configured line limit.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// Number of over-long lines discarded so far.
    ///
    /// Capture loops copy this onto their queue, where a session reads it
    /// back as a per-channel count.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn note_skipped(&mut self) {
        self.skipped += 1;
        warn!(
            limit = self.max_line_bytes,
            "line exceeded maximum length, discarding"
        );
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ── Decoder / Encoder ─────────────────────────────────────────────────────────

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line. Over-long lines
    /// are consumed and counted, and decoding continues with what follows.
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::InvalidData`] for a line that is not valid UTF-8.
    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.note_skipped(),
                other => return other.map_err(into_io),
            }
        }
    }

    /// Decode the final line when the stream reaches EOF, including one
    /// without a terminator.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](Self::decode).
    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.note_skipped(),
                other => return other.map_err(into_io),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    /// Encode `item` as a `\n`-terminated line into `dst`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature follows [`LinesCodec`].
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> io::Result<()> {
        self.inner.encode(item, dst).map_err(into_io)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`io::Error`].
fn into_io(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(io_err) => io_err,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

