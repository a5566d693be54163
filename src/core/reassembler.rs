//! # Stream Reassembly
//!
//! Turns an arbitrary sequence of read chunks into complete [`RawFrame`]s.
//!
//! Three cursors track progress through the current frame: the meta bytes, the
//! length digits and the payload. A chunk may end anywhere, including in the middle
//! of the meta bytes, and may carry several frames plus the head of the next one.
//! Partial state is kept until the next chunk arrives.
//!
//! The reassembler is owned by a single read loop and needs no locking.
//!
//! ## Security
//! - A zero length or a sentinel id reaching the payload stage is a framing error
//! - Lengths above the configured maximum are refused before any allocation
//! - Payload buffers grow with received data instead of trusting the advertised length

use crate::core::frame::{
    decode_length, FrameHeader, RawFrame, LENGTH_LEN, MAX_FRAME_LENGTH, META_LEN,
};
use crate::error::{constants, ProtocolError, Result};
use std::collections::VecDeque;
use tracing::{debug, error};

/// Upper bound on the up-front payload reservation
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
pub struct StreamReassembler {
    meta: [u8; META_LEN],
    meta_cursor: usize,
    length: [u8; LENGTH_LEN],
    length_cursor: usize,
    header: Option<FrameHeader>,
    expected: usize,
    payload: Vec<u8>,
    max_frame_length: usize,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

impl StreamReassembler {
    /// Create a reassembler that refuses frames longer than `max_frame_length`.
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            meta: [0; META_LEN],
            meta_cursor: 0,
            length: [0; LENGTH_LEN],
            length_cursor: 0,
            header: None,
            expected: 0,
            payload: Vec::new(),
            max_frame_length: max_frame_length.min(MAX_FRAME_LENGTH),
        }
    }

    /// Consume one chunk, pushing every frame it completes onto `out` in arrival order.
    ///
    /// Frames completed before an error are still pushed. After an error the partial
    /// state is dropped; the stream is unusable and the caller should retire it.
    ///
    /// # Errors
    /// Returns `ProtocolError::Framing` or `ProtocolError::UnknownTransform` on corrupt headers.
    pub fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<RawFrame>) -> Result<()> {
        let mut rest = chunk;

        while !rest.is_empty() {
            if self.meta_cursor < META_LEN {
                let n = (META_LEN - self.meta_cursor).min(rest.len());
                self.meta[self.meta_cursor..self.meta_cursor + n].copy_from_slice(&rest[..n]);
                self.meta_cursor += n;
                rest = &rest[n..];
                continue;
            }

            if self.length_cursor < LENGTH_LEN {
                let n = (LENGTH_LEN - self.length_cursor).min(rest.len());
                self.length[self.length_cursor..self.length_cursor + n]
                    .copy_from_slice(&rest[..n]);
                self.length_cursor += n;
                rest = &rest[n..];

                if self.length_cursor == LENGTH_LEN {
                    if let Err(e) = self.begin_payload() {
                        error!(error = %e, "Critical reading error");
                        self.reset();
                        return Err(e);
                    }
                }
                continue;
            }

            let n = (self.expected - self.payload.len()).min(rest.len());
            self.payload.extend_from_slice(&rest[..n]);
            rest = &rest[n..];

            if self.payload.len() == self.expected {
                out.push_back(self.take_frame()?);
            }
        }

        Ok(())
    }

    /// Whether no partial frame is buffered
    pub fn is_idle(&self) -> bool {
        self.meta_cursor == 0
    }

    /// Bytes of the current frame received so far
    pub fn buffered(&self) -> usize {
        self.meta_cursor + self.length_cursor + self.payload.len()
    }

    fn begin_payload(&mut self) -> Result<()> {
        let header = FrameHeader::from_bytes(self.meta)?;
        let expected = decode_length(self.length);

        if expected == 0 {
            return Err(ProtocolError::Framing(constants::ERR_ZERO_LENGTH.into()));
        }
        if expected > self.max_frame_length {
            return Err(ProtocolError::Framing(format!(
                "{}: advertised length {expected} exceeds {}",
                constants::ERR_CRITICAL_READ,
                self.max_frame_length
            )));
        }

        self.header = Some(header);
        self.expected = expected;
        self.payload = Vec::with_capacity(expected.min(INITIAL_PAYLOAD_CAPACITY));
        Ok(())
    }

    fn take_frame(&mut self) -> Result<RawFrame> {
        let header = self
            .header
            .take()
            .ok_or_else(|| ProtocolError::Framing(constants::ERR_CRITICAL_READ.into()))?;
        let payload = std::mem::take(&mut self.payload);
        debug!(
            length = payload.len(),
            serialization = header.serialization.name(),
            "Frame reassembled"
        );
        self.reset();
        Ok(RawFrame::new(header, payload))
    }

    fn reset(&mut self) {
        self.meta = [0; META_LEN];
        self.meta_cursor = 0;
        self.length = [0; LENGTH_LEN];
        self.length_cursor = 0;
        self.header = None;
        self.expected = 0;
        self.payload = Vec::new();
    }
}
