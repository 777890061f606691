//! # Published State
//!
//! Everything the server signs and hands out.
//!
//! ## Components
//! - **Digest tree**: content hash trees over update directories
//! - **Envelope**: payload bytes plus an Ed25519 signature
//! - **Keys**: persisted server key pair
//! - **Profile**: client launch profiles
//! - **Snapshot**: atomically swapped view of signed updates and profiles

pub mod digest_tree;
pub mod envelope;
pub mod keys;
pub mod profile;
pub mod snapshot;

pub use digest_tree::{DigestAlgorithm, DigestNode, TreeDiff};
pub use envelope::SignedEnvelope;
pub use keys::ServerKeyPair;
pub use profile::Profile;
pub use snapshot::{ResyncReport, Snapshot, SnapshotStore};
