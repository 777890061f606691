//! Primitive body encoding shared by requests, responses and the launcher
//! config blob.
//!
//! All integers are big-endian. Strings carry a `u16` length prefix and are
//! checked against a per-field maximum; byte arrays carry a `u32` prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{constants, Result, ServerError};

/// Reads primitives from a request body.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(ServerError::InvalidFrame(constants::ERR_TRUNCATED_BODY));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    /// Read a `u16`-prefixed UTF-8 string of at most `max_len` bytes.
    pub fn read_string(&mut self, max_len: usize) -> Result<String> {
        let len = self.read_u16()? as usize;
        if len > max_len {
            return Err(ServerError::InvalidFrame(constants::ERR_STRING_TOO_LONG));
        }
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| ServerError::InvalidFrame(constants::ERR_INVALID_UTF8))
    }

    /// Read a `u32`-prefixed byte array of at most `max_len` bytes.
    pub fn read_bytes(&mut self, max_len: usize) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        if len > max_len {
            return Err(ServerError::OversizedFrame(len));
        }
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Read exactly `len` unprefixed bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes> {
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_bytes(self.read_fixed::<16>()?))
    }

    /// Fail if anything is left unread.
    pub fn finish(&self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(ServerError::InvalidFrame(constants::ERR_TRAILING_BYTES));
        }
        Ok(())
    }
}

/// Writes primitives into a response body.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_string(&mut self, s: &str, max_len: usize) -> Result<()> {
        if s.len() > max_len || s.len() > u16::MAX as usize {
            return Err(ServerError::InvalidFrame(constants::ERR_STRING_TOO_LONG));
        }
        self.buf.put_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        let len = u32::try_from(b.len()).map_err(|_| ServerError::OversizedFrame(b.len()))?;
        self.buf.put_u32(len);
        self.buf.extend_from_slice(b);
        Ok(())
    }

    pub fn write_raw(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn write_uuid(&mut self, id: &Uuid) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_mixed_fields() {
        let id = Uuid::new_v4();
        let mut w = WireWriter::new();
        w.write_bool(true);
        w.write_string("Steve", 16).unwrap();
        w.write_uuid(&id);
        w.write_bytes(&[1, 2, 3]).unwrap();

        let mut r = WireReader::new(w.into_bytes());
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_string(16).unwrap(), "Steve");
        assert_eq!(r.read_uuid().unwrap(), id);
        assert_eq!(&r.read_bytes(16).unwrap()[..], &[1, 2, 3]);
        r.finish().unwrap();
    }

    #[test]
    fn test_string_limit_on_read() {
        let mut w = WireWriter::new();
        w.write_string("a-very-long-username", 64).unwrap();
        let mut r = WireReader::new(w.into_bytes());
        assert!(matches!(
            r.read_string(16),
            Err(ServerError::InvalidFrame(constants::ERR_STRING_TOO_LONG))
        ));
    }

    #[test]
    fn test_truncated_body() {
        let mut r = WireReader::new(Bytes::from_static(&[0, 5, b'a']));
        assert!(matches!(
            r.read_string(16),
            Err(ServerError::InvalidFrame(constants::ERR_TRUNCATED_BODY))
        ));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let mut r = WireReader::new(Bytes::from_static(&[1, 2]));
        r.read_u8().unwrap();
        assert!(r.finish().is_err());
    }
}
