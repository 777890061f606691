//! # Service Layer
//!
//! Running the server and talking to it.
//!
//! ## Components
//! - **Server**: TCP accept loop, connection limit and per-connection request loop
//! - **Maintenance**: periodic expiry sweeps for sessions and rate-limit windows
//! - **Launch server**: startup sequence, control task and shutdown
//! - **Client**: launcher-side requests with signature verification

pub mod client;
pub mod launch_server;
pub mod maintenance;
pub mod server;

pub use client::{AuthResult, LauncherClient};
pub use launch_server::LaunchServer;
pub use maintenance::{spawn_sweep, Sweepable};
pub use server::{ConnectionDispatcher, ShutdownHandle};
