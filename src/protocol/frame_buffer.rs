//! Frame scanner for accumulating partial reads from a byte stream.
//!
//! Serial lines deliver bytes with no alignment guarantee, so the scanner
//! hunts for the `AA AA` preamble, then waits for the length byte and the
//! body, and finally verifies the CRC. Frames failing validation are
//! dropped and scanning resumes right after the bad preamble, so a single
//! corrupted frame never poisons the stream.
//!
//! State machine:
//! - `Seeking`: discarding bytes until a sync preamble is visible
//! - `WaitingForLength`: preamble seen, need the length byte
//! - `WaitingForBody`: length known, need `length` more bytes

use bytes::{Buf, BytesMut};

use super::frame::RawFrame;
use super::wire_format::{crc16, CRC_SIZE, MIN_FRAME_LENGTH, SYNC};

#[derive(Debug, Clone, Copy)]
enum State {
    /// Looking for the `AA AA` preamble.
    Seeking,
    /// Preamble found, waiting for the length byte.
    WaitingForLength,
    /// Length byte read, waiting for `length` body bytes (CRC included).
    WaitingForBody { length: usize },
}

/// Buffer for accumulating incoming bytes and extracting validated frames.
pub struct FrameScanner {
    buffer: BytesMut,
    state: State,
}

impl FrameScanner {
    /// Create an empty scanner.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::Seeking,
        }
    }

    /// Push data into the scanner and extract all complete, valid frames.
    ///
    /// Invalid frames (bad length byte, CRC mismatch) are logged at debug
    /// and skipped; the scanner resynchronizes on the next preamble.
    pub fn push(&mut self, data: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one() {
            frames.push(frame);
        }
        frames
    }

    fn try_extract_one(&mut self) -> Option<RawFrame> {
        loop {
            match self.state {
                State::Seeking => {
                    if !self.seek_preamble() {
                        return None;
                    }
                    self.state = State::WaitingForLength;
                }
                State::WaitingForLength => {
                    if self.buffer.len() < SYNC.len() + 1 {
                        return None;
                    }
                    let length = self.buffer[2] as usize;
                    if length < MIN_FRAME_LENGTH {
                        tracing::debug!(length, "dropping frame with impossible length byte");
                        self.resync();
                        continue;
                    }
                    self.state = State::WaitingForBody { length };
                }
                State::WaitingForBody { length } => {
                    let total = SYNC.len() + 1 + length;
                    if self.buffer.len() < total {
                        return None;
                    }
                    let checked = &self.buffer[2..total - CRC_SIZE];
                    let stored =
                        u16::from_be_bytes([self.buffer[total - 2], self.buffer[total - 1]]);
                    if crc16(checked) != stored {
                        tracing::debug!(length, "dropping frame with CRC mismatch");
                        self.resync();
                        continue;
                    }
                    let bytes = self.buffer.split_to(total).freeze();
                    self.state = State::Seeking;
                    return Some(RawFrame::from_verified(bytes));
                }
            }
        }
    }

    /// Discard bytes until the buffer starts with the sync preamble.
    /// Returns false when more input is needed.
    fn seek_preamble(&mut self) -> bool {
        while self.buffer.len() >= SYNC.len() {
            if self.buffer[..2] == SYNC {
                return true;
            }
            self.buffer.advance(1);
        }
        // A lone 0xAA at the end may be the start of a preamble; keep it.
        if self.buffer.len() == 1 && self.buffer[0] != SYNC[0] {
            self.buffer.advance(1);
        }
        false
    }

    /// Skip the bad preamble and rescan the remainder of the buffer.
    fn resync(&mut self) {
        self.buffer.advance(SYNC.len());
        self.state = State::Seeking;
    }

    /// Number of buffered bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
