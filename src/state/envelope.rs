//! # Signed Envelopes
//!
//! A serialized value plus an Ed25519 signature over exactly those bytes.
//!
//! The server creates envelopes with its private key; clients check them with
//! the public key embedded in their launcher artifact before trusting the
//! payload. Envelopes are immutable once created.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{Result, ServerError};

/// Signature scheme used for every envelope
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Signature width in bytes
pub const SIGNATURE_LEN: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Upper bound for envelope payloads read off the wire
pub const MAX_PAYLOAD_LEN: usize = 8 * 1024 * 1024;

/// Payload bytes of a `T` and the signature covering them.
pub struct SignedEnvelope<T> {
    payload: Bytes,
    signature: [u8; SIGNATURE_LEN],
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SignedEnvelope<T> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            signature: self.signature,
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for SignedEnvelope<T> {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload && self.signature == other.signature
    }
}

impl<T> Eq for SignedEnvelope<T> {}

impl<T> fmt::Debug for SignedEnvelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedEnvelope")
            .field("payload_len", &self.payload.len())
            .field("signature", &hex::encode(&self.signature[..8]))
            .finish()
    }
}

impl<T: Serialize> SignedEnvelope<T> {
    /// Serialize `value` and sign the result.
    pub fn create(value: &T, key: &SigningKey) -> Result<Self> {
        let payload = bincode::serialize(value)?;
        Ok(Self::sign_bytes(payload, key))
    }
}

impl<T> SignedEnvelope<T> {
    /// Sign already-serialized payload bytes.
    pub fn sign_bytes(payload: impl Into<Bytes>, key: &SigningKey) -> Self {
        let payload = payload.into();
        let signature = key.sign(&payload).to_bytes();
        Self {
            payload,
            signature,
            _marker: PhantomData,
        }
    }

    /// Rebuild an envelope received from an untrusted source.
    pub fn from_parts(payload: impl Into<Bytes>, signature: [u8; SIGNATURE_LEN]) -> Self {
        Self {
            payload: payload.into(),
            signature,
            _marker: PhantomData,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// Check the signature; never fails, only answers.
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let signature = Signature::from_bytes(&self.signature);
        key.verify(&self.payload, &signature).is_ok()
    }

    /// Encode as `bytes(payload) ‖ signature`.
    pub fn write_to(&self, out: &mut WireWriter) -> Result<()> {
        out.write_bytes(&self.payload)?;
        out.write_raw(&self.signature);
        Ok(())
    }

    pub fn read_from(input: &mut WireReader) -> Result<Self> {
        let payload = input.read_bytes(MAX_PAYLOAD_LEN)?;
        let signature = input.read_fixed::<SIGNATURE_LEN>()?;
        Ok(Self::from_parts(payload, signature))
    }
}

impl<T: DeserializeOwned> SignedEnvelope<T> {
    /// Verify, then deserialize. The payload is never decoded when the
    /// signature does not check out.
    pub fn open(&self, key: &VerifyingKey) -> Result<T> {
        if !self.verify(key) {
            return Err(ServerError::VerificationFailure);
        }
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Decode without checking the signature. Only for data the caller
    /// produced itself.
    pub fn decode_unverified(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}
