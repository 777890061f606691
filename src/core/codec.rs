use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::frame::{Frame, LENGTH_SIZE, OPCODE_SIZE};
use crate::error::{constants, ServerError};

/// Length-prefixed frame codec for `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with a tighter size limit than the protocol maximum.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ServerError> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_size {
            return Err(ServerError::OversizedFrame(len));
        }
        if len < OPCODE_SIZE {
            return Err(ServerError::InvalidFrame(constants::ERR_FRAME_TOO_SHORT));
        }

        if src.len() < LENGTH_SIZE + len {
            src.reserve(LENGTH_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let opcode = src.get_u16();
        let body = src.split_to(len - OPCODE_SIZE).freeze();
        Ok(Some(Frame { opcode, body }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ServerError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ServerError> {
        if item.wire_len() > self.max_frame_size {
            return Err(ServerError::OversizedFrame(item.wire_len()));
        }
        item.write_to(dst)
    }
}
