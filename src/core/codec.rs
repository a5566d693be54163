//! Tokio codec adapter for framed I/O.
//!
//! Decoding hands every read chunk to a [`StreamReassembler`] and yields the frames
//! it completes one at a time. Encoding writes a whole frame into the output buffer
//! in one step so that concurrent senders can never interleave on the wire.

use crate::core::frame::RawFrame;
use crate::core::reassembler::StreamReassembler;
use crate::error::ProtocolError;
use bytes::BytesMut;
use std::collections::VecDeque;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default)]
pub struct FrameCodec {
    reassembler: StreamReassembler,
    ready: VecDeque<RawFrame>,
    pending_error: Option<ProtocolError>,
}

impl FrameCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            reassembler: StreamReassembler::new(max_frame_length),
            ready: VecDeque::new(),
            pending_error: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.ready.pop_front() {
            return Ok(Some(frame));
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let chunk = src.split();
        if let Err(e) = self.reassembler.feed(&chunk, &mut self.ready) {
            if self.ready.is_empty() {
                return Err(e);
            }
            self.pending_error = Some(e);
        }

        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A partial frame at EOF is dropped with the connection.
        self.decode(src)
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode_into(dst)
    }
}
