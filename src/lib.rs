//! # Launch Server
//!
//! Backend for a game launcher: distributes signed digest trees of client
//! update sets and signed client profiles, authenticates players, and builds
//! the launcher artifact that carries the server's public key.
//!
//! ## Modules
//! - [`core`]: frame format, codec and body encoding
//! - [`state`]: digest trees, signed envelopes, keys and the snapshot store
//! - [`auth`]: sessions, rate limiting and account backends
//! - [`protocol`]: opcodes, handlers and the dispatcher
//! - [`bootstrap`]: launcher artifact build and embedded trust data
//! - [`service`]: TCP server, maintenance tasks, orchestration and client
//!
//! ## Example
//! ```no_run
//! use launch_server::{LaunchServer, LaunchServerConfig};
//!
//! # async fn run() -> launch_server::Result<()> {
//! let dir = std::path::Path::new("/srv/launch");
//! let server = LaunchServer::start(dir, LaunchServerConfig::default()).await?;
//! tokio::signal::ctrl_c().await?;
//! server.close().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod state;
pub mod utils;

pub use config::LaunchServerConfig;
pub use error::{Result, ServerError};
pub use service::{LaunchServer, LauncherClient};
