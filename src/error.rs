//! # Error Types
//!
//! Error handling for the launch server.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is [`ServerError`]. The variants follow the failure classes the server has
//! to tell apart at runtime:
//!
//! ## Error Categories
//! - **I/O Errors**: filesystem or socket failures. They abort the current
//!   resync, build or request but never touch published state.
//! - **Verification Errors**: a signed envelope did not verify against the
//!   embedded public key (client side only).
//! - **Rejections**: bad credentials, allowlist misses, rate limiting. These
//!   are reported to the client as a reason string and keep the connection.
//! - **Configuration Errors**: malformed key material or profile files.
//! - **Protocol Errors**: malformed frames, unexpected opcodes, closed peers.
//!
//! ## Example Usage
//! ```rust
//! use launch_server::error::{Result, ServerError};
//!
//! fn check_port(port: u16) -> Result<u16> {
//!     if port == 0 {
//!         return Err(ServerError::ConfigError("port must be non-zero".into()));
//!     }
//!     Ok(port)
//! }
//!
//! assert!(check_port(7240).is_ok());
//! assert!(check_port(0).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock and registry errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Frame validation errors
    pub const ERR_FRAME_TOO_SHORT: &str = "Frame shorter than opcode header";
    pub const ERR_TRUNCATED_BODY: &str = "Request body truncated";
    pub const ERR_STRING_TOO_LONG: &str = "String field exceeds maximum length";
    pub const ERR_INVALID_UTF8: &str = "String field is not valid UTF-8";
    pub const ERR_TRAILING_BYTES: &str = "Unexpected trailing bytes in request body";
    pub const ERR_BAD_STATUS: &str = "Unknown response status byte";

    /// Handshake errors
    pub const ERR_BAD_MAGIC: &str = "Protocol magic mismatch";
    pub const ERR_UNSUPPORTED_VERSION: &str = "Unsupported protocol version";
    pub const ERR_HANDSHAKE_REQUIRED: &str = "Handshake required before any other request";

    /// Rejection reasons sent to clients
    pub const REJECT_KEY_MISMATCH: &str = "Launcher key mismatch, rebuild the launcher";
    pub const REJECT_NOT_AUTHENTICATED: &str = "Not authenticated";
    pub const REJECT_UNKNOWN_OPCODE: &str = "Unknown request type";
    pub const REJECT_BAD_CREDENTIALS: &str = "Invalid login or password";
    pub const REJECT_ALREADY_GREETED: &str = "Handshake already completed";
    pub const REJECT_BATCH_TOO_LARGE: &str = "Too many usernames in one request";

    /// Key material errors
    pub const ERR_KEY_MISMATCH: &str = "Private and public key mismatch";
    pub const ERR_KEY_PAIR_INCOMPLETE: &str = "Only one half of the key pair exists on disk";
    pub const ERR_KEY_LENGTH: &str = "Key file has an unexpected length";
}

/// ServerError is the primary error type for all launch server operations
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Signature verification failed")]
    VerificationFailure,

    #[error("{0}")]
    AuthRejected(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Unexpected opcode: {0:#06x}")]
    UnexpectedOpcode(u16),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("A resync is already in progress")]
    ResyncInProgress,

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ServerError {
    /// True for per-request rejections that leave the connection open.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ServerError::AuthRejected(_))
    }

    /// Build a rejection carrying a human-readable reason.
    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        ServerError::AuthRejected(reason.into())
    }
}

/// Type alias for Results using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;
