//! Line codec for the assistant's stdout stream.
//!
//! Frames the child's output into `\n`-delimited lines with two deviations
//! from [`tokio_util::codec::LinesCodec`] that the wire contract requires:
//!
//! - Invalid UTF-8 byte sequences are substituted (`U+FFFD`) instead of
//!   failing the stream — the assistant CLI may interleave binary garbage
//!   on stdout and a single bad byte must not kill the session.
//! - A trailing `\r` before the delimiter is stripped so CRLF output
//!   parses identically to LF output.
//!
//! A maximum line length bounds buffering for unterminated or oversized
//! lines; exceeding it is a decoder error, not a panic or an allocation.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Maximum line length accepted from the child's stdout: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Lossy, newline-delimited line decoder for assistant output.
#[derive(Debug)]
pub struct EventCodec {
    max_length: usize,
}

impl EventCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_length: MAX_LINE_BYTES,
        }
    }

    /// Create a codec with a custom maximum line length.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Convert a raw line (delimiter already removed) into a `String`,
    /// substituting invalid UTF-8 and stripping a trailing `\r`.
    fn finish_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(pos) = src.iter().position(|&b| b == b'\n') {
            if pos > self.max_length {
                // Drop the offending line so the stream can resume at the
                // next delimiter.
                src.advance(pos + 1);
                return Err(AppError::Session(format!(
                    "line too long: exceeded {} bytes",
                    self.max_length
                )));
            }
            let line = src.split_to(pos + 1);
            return Ok(Some(Self::finish_line(&line[..pos])));
        }

        if src.len() > self.max_length {
            src.clear();
            return Err(AppError::Session(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )));
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                // Final line without a trailing delimiter.
                let line = src.split_to(src.len());
                Ok(Some(Self::finish_line(&line)))
            }
        }
    }
}
