//! # Core Protocol Components
//!
//! Frame handling, the tokio codec and the primitive wire encoding.
//!
//! ## Components
//! - **Frame**: one opcode plus its opaque body
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Wire**: big-endian reader/writer for request and response bodies
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [Opcode(2)] [Body(N)]
//! ```
//! `Length` counts the opcode and the body.
//!
//! ## Security
//! - Maximum frame size: 16MB (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod frame;
pub mod wire;
