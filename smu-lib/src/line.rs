//! Line framing shared by every transport.
//!
//! Outbound lines are cut into chunks no larger than the channel's maximum
//! write size. Inbound bytes arrive in arbitrary pieces (a BLE notification
//! can end in the middle of a line or between `\r` and `\n`) and are
//! reassembled here into complete lines.

use bytes::{Buf, BytesMut};
use std::slice::Chunks;

use crate::error::{Result, SmuError};

/// Default bound on a received line: 256 KiB. The longest valid reply is a
/// flash dump of 65535 bytes padded to whole words, three characters each.
pub const DEFAULT_MAX_LINE: usize = 256 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Split `payload` into consecutive writes of at most `max_write` bytes.
///
/// With no limit the payload is written in one piece.
pub fn chunks(payload: &[u8], max_write: Option<usize>) -> Chunks<'_, u8> {
    let size = match max_write {
        Some(max) => max.max(1),
        None => payload.len().max(1),
    };
    payload.chunks(size)
}

/// Accumulates received bytes and hands out complete lines.
///
/// A line ends at the first `\r`; when that `\r` is followed by `\n` both are
/// consumed. A `\n` that arrives at the start of the next chunk, after a line
/// was already cut at a trailing `\r`, is dropped as the tail of that
/// terminator.
///
/// Once a frame overflows `max_len`, everything up to and including its
/// terminator is dropped, so the tail never surfaces as a line of its own.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_len: usize,
    after_cr: bool,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_len,
            after_cr: false,
            discarding: false,
        }
    }

    /// Append a received chunk. Lines are extracted with [`Self::next_line`].
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete line, if the buffer holds one.
    ///
    /// Fails with [`SmuError::FrameTooLong`] once more than `max_len` bytes
    /// are pending without a terminator, or when a terminated line is longer
    /// than that. The rest of an overflowing frame is skipped up to its
    /// terminator and the next line is returned normally.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.after_cr && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
                self.after_cr = false;
            }

            let Some(pos) = self.buf.iter().position(|&b| b == b'\r') else {
                if self.discarding {
                    self.buf.clear();
                } else if self.buf.len() > self.max_len {
                    let len = self.buf.len();
                    self.buf.clear();
                    self.discarding = true;
                    return Err(SmuError::FrameTooLong {
                        len,
                        max: self.max_len,
                    });
                }
                return Ok(None);
            };

            let line = self.buf.split_to(pos);
            let terminator = match self.buf.get(1) {
                Some(b'\n') => 2,
                Some(_) => 1,
                None => {
                    self.after_cr = true;
                    1
                }
            };
            self.buf.advance(terminator);

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_len {
                return Err(SmuError::FrameTooLong {
                    len: line.len(),
                    max: self.max_len,
                });
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }

    /// Append `chunk` and collect every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.extend(chunk);
        let mut lines = Vec::new();
        while let Some(line) = self.next_line()? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Drop any partial line, returning how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let len = self.buf.len();
        self.buf.clear();
        self.after_cr = false;
        self.discarding = false;
        len
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
