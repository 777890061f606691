//! Response bodies: a status byte, then either the handler payload or a
//! rejection reason.

use bytes::{Bytes, BytesMut, BufMut};

use crate::core::wire::WireReader;
use crate::error::{constants, Result, ServerError};

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_REJECTED: u8 = 0x01;

/// Longest reason string sent to clients.
pub const MAX_REASON_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Bytes),
    Rejected(String),
}

impl Response {
    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        Response::Rejected(reason.into())
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Response::Ok(payload) => {
                let mut out = BytesMut::with_capacity(1 + payload.len());
                out.put_u8(STATUS_OK);
                out.extend_from_slice(payload);
                out.freeze()
            }
            Response::Rejected(reason) => {
                let mut end = reason.len().min(MAX_REASON_LEN);
                while !reason.is_char_boundary(end) {
                    end -= 1;
                }
                let reason = &reason[..end];
                let mut out = BytesMut::with_capacity(3 + reason.len());
                out.put_u8(STATUS_REJECTED);
                out.put_u16(reason.len() as u16);
                out.extend_from_slice(reason.as_bytes());
                out.freeze()
            }
        }
    }

    pub fn decode(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Err(ServerError::InvalidFrame(constants::ERR_TRUNCATED_BODY));
        }
        let status = body.split_to(1)[0];
        match status {
            STATUS_OK => Ok(Response::Ok(body)),
            STATUS_REJECTED => {
                let mut reader = WireReader::new(body);
                let reason = reader.read_string(MAX_REASON_LEN)?;
                reader.finish()?;
                Ok(Response::Rejected(reason))
            }
            _ => Err(ServerError::InvalidFrame(constants::ERR_BAD_STATUS)),
        }
    }

    /// Payload of an OK response; a rejection becomes `AuthRejected`.
    pub fn into_payload(self) -> Result<Bytes> {
        match self {
            Response::Ok(payload) => Ok(payload),
            Response::Rejected(reason) => Err(ServerError::AuthRejected(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_rejection_reason_preserved() {
        let encoded = Response::rejected("Too many attempts").encode();
        assert_eq!(encoded[0], STATUS_REJECTED);
        assert_eq!(
            Response::decode(encoded).unwrap(),
            Response::rejected("Too many attempts")
        );
    }

    #[test]
    fn test_long_reason_truncated_on_char_boundary() {
        let reason = "é".repeat(MAX_REASON_LEN);
        let decoded = Response::decode(Response::rejected(reason).encode()).unwrap();
        match decoded {
            Response::Rejected(r) => assert!(r.len() <= MAX_REASON_LEN && r.chars().all(|c| c == 'é')),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_status() {
        assert!(Response::decode(Bytes::from_static(&[7, 0])).is_err());
        assert!(Response::decode(Bytes::new()).is_err());
    }
}
