use bytes::{BufMut, Bytes, BytesMut};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{constants, Result, ServerError};

/// Size of the length prefix
pub const LENGTH_SIZE: usize = 4;

/// Size of the opcode field
pub const OPCODE_SIZE: usize = 2;

/// One request or response on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub body: Bytes,
}

impl Frame {
    pub fn new(opcode: u16, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }

    /// Value of the length prefix for this frame.
    pub fn wire_len(&self) -> usize {
        OPCODE_SIZE + self.body.len()
    }

    /// Encode length, opcode and body into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<()> {
        let len = self.wire_len();
        if len > MAX_FRAME_SIZE {
            return Err(ServerError::OversizedFrame(len));
        }
        dst.reserve(LENGTH_SIZE + len);
        dst.put_u32(len as u32);
        dst.put_u16(self.opcode);
        dst.extend_from_slice(&self.body);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(LENGTH_SIZE + self.wire_len());
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse a complete frame from a contiguous buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LENGTH_SIZE {
            return Err(ServerError::InvalidFrame(constants::ERR_FRAME_TOO_SHORT));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ServerError::OversizedFrame(len));
        }
        if len < OPCODE_SIZE || data.len() < LENGTH_SIZE + len {
            return Err(ServerError::InvalidFrame(constants::ERR_FRAME_TOO_SHORT));
        }
        let opcode = u16::from_be_bytes([data[4], data[5]]);
        let body = Bytes::copy_from_slice(&data[LENGTH_SIZE + OPCODE_SIZE..LENGTH_SIZE + len]);
        Ok(Self { opcode, body })
    }
}
