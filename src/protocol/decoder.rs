//! Incremental frame decoder for chunked input.
//!
//! The read pump owns a blocking reader and uses [`read_frame`](super::read_frame).
//! Code that only sees bytes in arbitrary chunks (a client driving its own
//! socket, a test reading what the write pump produced) pushes them here
//! instead.
//!
//! Implements a two-state machine:
//! - `WaitingForLength`: need at least 4 bytes
//! - `WaitingForPayload`: length parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{encode_frame, FrameDecoder};
//!
//! let wire = encode_frame(b"hello").unwrap();
//! let mut decoder = FrameDecoder::new();
//!
//! assert!(decoder.push(&wire[..3]).unwrap().is_empty());
//! let frames = decoder.push(&wire[3..]).unwrap();
//! assert_eq!(&frames[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{check_length, decode_length, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForLength,
    WaitingForPayload { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete payloads.
pub struct FrameDecoder {
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
}

impl FrameDecoder {
    /// Create a new decoder with default settings.
    ///
    /// Default capacity: 64KB, max payload: 1GB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new decoder with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// Partial data is kept for the next push. Zero-length frames come out
    /// as empty `Bytes`.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a declared length exceeds the maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let Some(len) = decode_length(&self.buffer) else {
                        return Ok(None);
                    };
                    check_length(len, self.max_payload_size)?;

                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);

                    if len == 0 {
                        return Ok(Some(Bytes::new()));
                    }
                    self.state = State::WaitingForPayload { remaining: len };
                }

                State::WaitingForPayload { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when a length prefix was consumed and its payload is still incomplete.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, State::WaitingForPayload { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
