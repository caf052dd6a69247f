//! Line framing over a byte stream.
//!
//! TCP delivers bytes, not messages: one read may contain several lines, and
//! a line may be split across reads. [`LineDecoder`] accumulates bytes and
//! yields only complete lines, keeping any unterminated tail for the next read.

use super::{ProtocolError, ProtocolResult, DEFAULT_MAX_LINE_LENGTH, TERMINATOR};
use bytes::{Buf, BytesMut};

/// Streaming newline decoder with a bounded buffer.
#[derive(Debug)]
pub struct LineDecoder {
    /// Bytes received but not yet consumed as a full line
    buffer: BytesMut,

    /// Longest unterminated tail kept before it is discarded
    max_line_length: usize,

    /// Offset up to which the buffer has been searched for a terminator
    scanned: usize,

    /// Inside an oversized line; bytes are dropped through the next terminator
    discarding: bool,

    /// Statistics for monitoring
    stats: DecoderStats,
}

/// Decoder statistics for monitoring and debugging.
#[derive(Debug, Default, Clone)]
pub struct DecoderStats {
    /// Complete lines returned
    pub lines_decoded: u64,

    /// Total bytes fed into the decoder
    pub bytes_processed: u64,

    /// Lines dropped for length or encoding
    pub lines_discarded: u64,

    /// Peak buffer size observed
    pub peak_buffer_size: usize,
}

impl LineDecoder {
    /// Create a decoder with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a decoder with a specific line limit.
    #[must_use]
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_line_length,
            scanned: 0,
            discarding: false,
            stats: DecoderStats::default(),
        }
    }

    /// Buffer to read into directly, e.g. with `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Record that `n` bytes were appended through [`Self::buffer_mut`].
    pub fn note_read(&mut self, n: usize) {
        self.stats.bytes_processed += n as u64;
        self.stats.peak_buffer_size = self.stats.peak_buffer_size.max(self.buffer.len());
    }

    /// Pop the next complete line, without its terminator.
    ///
    /// Returns `Ok(None)` when only a partial line remains.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidUtf8`] drops just that line;
    /// [`ProtocolError::LineTooLong`] drops the whole line, including bytes
    /// of it that arrive in later reads.
    pub fn next_line(&mut self) -> ProtocolResult<Option<String>> {
        if self.discarding && !self.skip_discarded() {
            return Ok(None);
        }

        let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == TERMINATOR as u8) else {
            self.scanned = self.buffer.len();
            if self.buffer.len() > self.max_line_length {
                let actual = self.buffer.len();
                self.discard_tail();
                return Err(ProtocolError::LineTooLong { actual, max: self.max_line_length });
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        let mut line = self.buffer.split_to(end);
        self.buffer.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        if line.len() > self.max_line_length {
            self.stats.lines_discarded += 1;
            return Err(ProtocolError::LineTooLong { actual: line.len(), max: self.max_line_length });
        }

        match String::from_utf8(line.to_vec()) {
            Ok(text) => {
                self.stats.lines_decoded += 1;
                Ok(Some(text))
            },
            Err(_) => {
                self.stats.lines_discarded += 1;
                Err(ProtocolError::InvalidUtf8)
            },
        }
    }

    /// Decode every complete line from `data`, skipping invalid ones.
    pub fn decode(&mut self, data: &[u8]) -> Vec<ProtocolResult<String>> {
        self.extend(data);
        self.note_read(data.len());
        let mut lines = Vec::new();
        loop {
            match self.next_line() {
                Ok(Some(line)) => lines.push(Ok(line)),
                Ok(None) => break,
                Err(e) => lines.push(Err(e)),
            }
        }
        lines
    }

    /// Bytes of an incomplete line waiting for more input.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decoder statistics.
    #[must_use]
    pub const fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    fn discard_tail(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = true;
        self.stats.lines_discarded += 1;
    }

    /// Drop the rest of an oversized line. Returns false while its
    /// terminator has not arrived yet.
    fn skip_discarded(&mut self) -> bool {
        match self.buffer.iter().position(|b| *b == TERMINATOR as u8) {
            Some(end) => {
                self.buffer.advance(end + 1);
                self.discarding = false;
                true
            },
            None => {
                self.buffer.clear();
                false
            },
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}
