//! Line buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` so that a line split across several socket reads
//! is assembled without re-copying what was already buffered.
//!
//! Servers of this protocol terminate lines with `\n\r`, `\r\n` or a bare
//! `\n`. The buffer splits on `\n`, trims surrounding `\r` characters and
//! drops lines that end up empty.
//!
//! # Example
//!
//! ```
//! use serverquery_client::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! let lines = buffer.push(b"TS3\n\rWelcome").unwrap();
//! assert_eq!(lines, vec!["TS3".to_string()]);
//!
//! let lines = buffer.push(b" to ServerQuery\n\r").unwrap();
//! assert_eq!(lines, vec!["Welcome to ServerQuery".to_string()]);
//! ```

use bytes::BytesMut;

use crate::error::Result;

/// Default maximum length of a single line (16 MiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete lines.
pub struct LineBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Bytes already scanned for a newline without finding one.
    scanned: usize,
    /// Maximum allowed length of an unterminated line.
    max_line_length: usize,
}

impl LineBuffer {
    /// Create a new line buffer with default settings.
    ///
    /// Default capacity: 64KB, max line: 16MB.
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a new line buffer with a custom line limit.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scanned: 0,
            max_line_length,
        }
    }

    /// Push data into the buffer and extract all complete lines.
    ///
    /// Partial trailing data is kept for the next push. Invalid UTF-8 is
    /// replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns error if an unterminated line grows past the limit.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(line) = self.try_extract_one() {
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.buffer.len() > self.max_line_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "line exceeds maximum length of {} bytes",
                    self.max_line_length
                ),
            )
            .into());
        }

        Ok(lines)
    }

    /// Extract the next line, trimmed, if a newline is buffered.
    fn try_extract_one(&mut self) -> Option<String> {
        let offset = self.buffer[self.scanned..]
            .iter()
            .position(|b| *b == b'\n');

        let Some(offset) = offset else {
            self.scanned = self.buffer.len();
            return None;
        };

        let raw = self.buffer.split_to(self.scanned + offset + 1);
        self.scanned = 0;

        let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        Some(text.trim_matches('\r').to_string())
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
