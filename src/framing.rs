//! Newline framing for the device's text stream.
//!
//! Serial reads hand over bytes in whatever chunks the driver produced, so a single
//! reply can arrive as `"@BLI"`, `"NK_LED,FIN"`, `"ISH\n"`. [`LineFramer`] keeps the
//! unterminated tail (the *carry*) between calls and yields each line once its `\n`
//! has been seen.
//!
//! Lines are trimmed and empty lines are dropped, so `\r\n` endings and blank keep-alive
//! lines never reach consumers. The carry is held as raw bytes: `\n` never occurs inside
//! a multi-byte UTF-8 sequence, so splitting on the byte is exact and a character cut in
//! half by a chunk boundary is reassembled before decoding.

use tracing::warn;

/// Longest line, in bytes before its newline, the framer will emit.
///
/// A longer line is dropped whole whether it arrives in one chunk or many: once the
/// carry grows past this size it is cleared and the rest of the line, up to and
/// including its newline, is skipped.
pub const MAX_CARRY_BYTES: usize = 64 * 1024;

/// Stateful decoder from raw byte chunks to complete text lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
    /// Set after an oversized fragment was dropped; bytes are skipped up to and
    /// including the next newline so the rest of that line is never emitted.
    discarding: bool,
}

impl LineFramer {
    /// Create a framer with an empty carry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest the next chunk and return the lines it completes.
    ///
    /// The carry is updated before this returns; the returned iterator owns the
    /// completed bytes and decodes one line per `next()`.
    pub fn push(&mut self, mut chunk: &[u8]) -> Lines {
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    self.discarding = false;
                    chunk = &chunk[newline + 1..];
                }
                None => return Lines::default(),
            }
        }

        let mut buffer = std::mem::take(&mut self.carry);
        buffer.extend_from_slice(chunk);

        let complete = match buffer.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => {
                self.carry = buffer.split_off(last_newline + 1);
                buffer
            }
            None => {
                self.carry = buffer;
                Vec::new()
            }
        };

        if self.carry.len() > MAX_CARRY_BYTES {
            warn!(
                bytes = self.carry.len(),
                "discarding unterminated serial fragment"
            );
            self.carry.clear();
            self.discarding = true;
        }

        Lines {
            buffer: complete,
            pos: 0,
        }
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn carry(&self) -> &[u8] {
        &self.carry
    }

    /// Drop any buffered fragment.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.discarding = false;
    }
}

/// Lines completed by one [`LineFramer::push`] call, in arrival order.
#[derive(Debug, Default)]
pub struct Lines {
    buffer: Vec<u8>,
    pos: usize,
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.pos < self.buffer.len() {
            let rest = &self.buffer[self.pos..];
            let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
            self.pos += end + 1;
            if end > MAX_CARRY_BYTES {
                warn!(bytes = end, "discarding oversized serial line");
                continue;
            }
            let text = String::from_utf8_lossy(&rest[..end]);

            let line = text.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }
}
