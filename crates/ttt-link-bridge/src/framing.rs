//! Line framing for the inbound byte stream
//!
//! Serial reads return arbitrary chunks; a frame may arrive split across
//! several reads or several frames may arrive in one read.

use crate::protocol::DELIMITER;
use tracing::warn;

/// Longest frame accepted before the line is cut
pub const MAX_FRAME_LEN: usize = 4096;

/// Accumulates bytes and yields complete lines without their delimiter
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    /// Set after an overlong line was cut; bytes are dropped until the next delimiter
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            discarding: false,
        }
    }

    /// Append a chunk read from the device
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete line, if any
    ///
    /// A trailing `\r` is stripped. A line that grows past [`MAX_FRAME_LEN`]
    /// without a delimiter is returned cut to that length and the remainder
    /// of it is discarded.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.buffer.iter().position(|b| *b == DELIMITER) {
                Some(pos) => {
                    let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                    line.pop();
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Some(line);
                }
                None if self.discarding => {
                    self.buffer.clear();
                    return None;
                }
                None if self.buffer.len() > MAX_FRAME_LEN => {
                    warn!(
                        "Inbound line exceeds {} bytes without a delimiter, cutting it",
                        MAX_FRAME_LEN
                    );
                    let line: Vec<u8> = self.buffer.drain(..MAX_FRAME_LEN).collect();
                    self.buffer.clear();
                    self.discarding = true;
                    return Some(line);
                }
                None => return None,
            }
        }
    }

    /// Bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}
