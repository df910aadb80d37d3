//! Newline framing shared by every line-oriented input.
//!
//! Bytes are decoded lossily, so invalid UTF-8 becomes `U+FFFD` instead of
//! ending the stream. A line longer than [`MAX_LINE_BYTES`] is cut at the
//! limit and the rest of it, up to the next newline, is discarded.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Longest line kept; anything beyond is dropped.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Accumulates bytes and yields complete, non-empty lines without their
/// `\n` / `\r\n` terminators.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    /// Inside an over-long line whose prefix was already yielded.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();

        let mut start = 0;
        while let Some(len) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + len;
            if self.discarding {
                self.discarding = false;
            } else {
                self.take_line(start, end, &mut lines);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.max_line {
            if !self.discarding {
                self.take_line(0, self.pending.len(), &mut lines);
                self.discarding = true;
            }
            self.pending.clear();
        }
        lines
    }

    /// The unterminated tail, for inputs that end without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        if !self.discarding {
            self.take_line(0, self.pending.len(), &mut lines);
        }
        self.clear();
        lines.pop()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    fn take_line(&self, start: usize, end: usize, lines: &mut Vec<String>) {
        let mut raw = &self.pending[start..end];
        if raw.len() > self.max_line {
            warn!(bytes = raw.len(), limit = self.max_line, "line too long; truncated");
            raw = &raw[..self.max_line];
        }
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
}

/// Reads lines from any byte stream through a [`LineBuffer`].
///
/// [`LineReader::next_line`] is cancel-safe: state only changes after a read
/// completes, so it can sit in a `select!` next to a stop token.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    chunk: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, LineBuffer::default())
    }

    pub fn with_buffer(reader: R, buffer: LineBuffer) -> Self {
        Self {
            reader,
            buffer,
            ready: VecDeque::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            eof: false,
        }
    }

    /// The next non-empty line, or `None` at end of input. A final line
    /// without a newline is still returned.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
                self.ready.extend(self.buffer.finish());
            } else {
                self.ready.extend(self.buffer.push(&self.chunk[..n]));
            }
        }
    }
}
