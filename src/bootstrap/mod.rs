//! # Trust Bootstrap
//!
//! Builds the distributable launcher: the base client archive followed by
//! the bundled runtime files, a config blob carrying the server address and
//! public key, and a fixed-size footer locating both.
//!
//! The embedded public key is the client's root of trust. Every signed
//! envelope it later receives is verified against it.

pub mod artifact;
pub mod builder;

pub use artifact::{read_artifact_config, read_artifact_runtime, ArtifactConfig, RuntimeEntry};
pub use builder::{BuildReport, LauncherBuilder, LauncherDigest};
