//! # Request Protocol
//!
//! Opcode routing and the built-in request handlers.
//!
//! ## Components
//! - **Dispatcher**: opcode to handler table, session state checks
//! - **Handler**: the contract every request type implements
//! - **Handlers**: HELLO, AUTH, player profiles, updates and profiles
//! - **Response**: status byte plus payload or rejection reason
//!
//! ## Connection states
//! Until HELLO succeeds the only accepted opcode is HELLO; anything else
//! closes the connection. Handlers that require authentication answer with a
//! rejection until AUTH succeeds.

pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod response;

pub use context::{RequestContext, ServerContext};
pub use dispatcher::Dispatcher;
pub use handler::{FnHandler, Handler};
pub use response::Response;

/// Built-in opcodes.
pub mod opcode {
    pub const HELLO: u16 = 0x0001;
    pub const PING: u16 = 0x0002;
    pub const LAUNCHER: u16 = 0x0003;
    pub const AUTH: u16 = 0x0010;
    pub const PROFILE_BY_UUID: u16 = 0x0020;
    pub const PROFILE_BY_USERNAME: u16 = 0x0021;
    pub const BATCH_PROFILE_BY_USERNAME: u16 = 0x0022;
    pub const UPDATE_LIST: u16 = 0x0030;
    pub const UPDATE: u16 = 0x0031;
    pub const PROFILES: u16 = 0x0032;
}

#[cfg(test)]
mod tests;
