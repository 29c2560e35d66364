//! CRLF line framing
//!
//! Devices emit one ASCII line per message, terminated by `\r\n`. The serial
//! driver hands us whatever bytes happen to be available, so a single read may
//! carry half a line, several lines, or a delimiter split between two reads.
//!
//! [`LineFramer`] buffers raw bytes and only decodes text once a full line has
//! been isolated, which keeps multi-byte characters intact across reads.

use std::collections::VecDeque;

use tracing::warn;

/// Line delimiter used by all devices
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Default cap for a single pending (unterminated) line
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Streaming CRLF line framer
#[derive(Debug, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_len: Option<usize>,
    /// Lines removed from the buffer so far, dropped ones included
    lines_taken: u64,
    /// Indexes of lines that are the tail of an oversized line, ascending
    drop_lines: VecDeque<u64>,
}

impl LineFramer {
    /// Create a framer with the default line length cap
    pub fn new() -> Self {
        Self::with_max_line_len(Some(DEFAULT_MAX_LINE_LEN))
    }

    /// Create a framer with a custom cap; `None` lets a pending line grow
    /// without bound
    pub fn with_max_line_len(max_line_len: Option<usize>) -> Self {
        Self {
            buffer: Vec::with_capacity(128),
            max_line_len,
            lines_taken: 0,
            drop_lines: VecDeque::new(),
        }
    }

    /// Append raw bytes received from the port
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.enforce_limit();
    }

    /// Remove and return the earliest complete line, without its delimiter
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = find_delimiter(&self.buffer)?;
            let line_bytes: Vec<u8> = self.buffer.drain(..pos + LINE_DELIMITER.len()).collect();
            let index = self.lines_taken;
            self.lines_taken += 1;

            if self.drop_lines.front() == Some(&index) {
                self.drop_lines.pop_front();
                warn!(
                    "Dropping remainder of oversized line ({} bytes)",
                    line_bytes.len()
                );
                continue;
            }

            let line = &line_bytes[..line_bytes.len() - LINE_DELIMITER.len()];
            return Some(String::from_utf8_lossy(line).into_owned());
        }
    }

    /// Number of bytes currently buffered (complete and partial lines)
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.drop_lines.clear();
    }

    fn enforce_limit(&mut self) {
        let Some(max) = self.max_line_len else {
            return;
        };

        let (complete_end, complete_lines) = complete_prefix(&self.buffer);
        let pending = self.buffer.len() - complete_end;
        // A trailing '\r' may be the first half of the next delimiter
        let keep = if self.buffer.last() == Some(&b'\r') && pending > 0 {
            self.buffer.len() - 1
        } else {
            self.buffer.len()
        };
        if pending <= max {
            return;
        }

        warn!(
            "Discarding {} bytes of unterminated input (limit {} bytes)",
            keep - complete_end,
            max
        );
        let tail: Vec<u8> = self.buffer[keep..].to_vec();
        self.buffer.truncate(complete_end);
        self.buffer.extend_from_slice(&tail);
        // The pending line may already be marked if it overflowed before
        let index = self.lines_taken + complete_lines as u64;
        if self.drop_lines.back() != Some(&index) {
            self.drop_lines.push_back(index);
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_DELIMITER.len())
        .position(|w| w == LINE_DELIMITER)
}

/// Length of the buffer prefix made of complete lines, and how many there are
fn complete_prefix(buf: &[u8]) -> (usize, usize) {
    let mut end = 0;
    let mut count = 0;
    while let Some(pos) = find_delimiter(&buf[end..]) {
        end += pos + LINE_DELIMITER.len();
        count += 1;
    }
    (end, count)
}
