//! Pluggable account backends.
//!
//! The AUTH and profile handlers never talk to a database directly; they go
//! through these traits so the surrounding application can plug in whatever
//! account store it has. Two in-memory backends ship with the crate:
//! [`AcceptAuthenticator`] lets any well-formed username in (offline mode)
//! and [`MemoryAccounts`] holds a fixed set of accounts with hashed
//! passwords.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::auth::verify_username;
use crate::error::{constants, Result, ServerError};

/// Checks a login/password pair and returns the canonical username.
///
/// Implementations return [`ServerError::AuthRejected`] for bad credentials;
/// any other error is treated as a backend fault.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, login: &str, password: &str) -> Result<String>;
}

/// Bidirectional username/UUID lookup.
pub trait PlayerDirectory: Send + Sync {
    fn uuid_of(&self, username: &str) -> Result<Option<Uuid>>;
    fn username_of(&self, uuid: &Uuid) -> Result<Option<String>>;
}

/// Where a player's skin and cloak live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub url: String,
    pub digest: [u8; 32],
}

pub trait TextureProvider: Send + Sync {
    fn skin(&self, uuid: &Uuid, username: &str) -> Result<Option<Texture>>;
    fn cloak(&self, uuid: &Uuid, username: &str) -> Result<Option<Texture>>;
}

/// What the profile opcodes return for one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    pub uuid: Uuid,
    pub username: String,
    pub skin: Option<Texture>,
    pub cloak: Option<Texture>,
}

/// Name-based UUID used when no real account store exists.
pub fn offline_uuid(username: &str) -> Uuid {
    let digest = Sha256::digest(format!("OfflinePlayer:{username}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Accepts every well-formed username with any password.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAuthenticator;

impl Authenticator for AcceptAuthenticator {
    fn authenticate(&self, login: &str, _password: &str) -> Result<String> {
        verify_username(login)?;
        Ok(login.to_string())
    }
}

impl PlayerDirectory for AcceptAuthenticator {
    fn uuid_of(&self, username: &str) -> Result<Option<Uuid>> {
        verify_username(username)?;
        Ok(Some(offline_uuid(username)))
    }

    /// Offline UUIDs are one-way, so reverse lookups never resolve.
    fn username_of(&self, _uuid: &Uuid) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct Account {
    username: String,
    uuid: Uuid,
    password_digest: [u8; 32],
}

/// Fixed in-memory account table. Logins are case-insensitive.
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    by_login: RwLock<HashMap<String, Account>>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account; returns its UUID.
    pub fn insert(&self, username: &str, password: &str) -> Result<Uuid> {
        verify_username(username)?;
        let account = Account {
            username: username.to_string(),
            uuid: Uuid::new_v4(),
            password_digest: Sha256::digest(password.as_bytes()).into(),
        };
        let uuid = account.uuid;
        self.by_login
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_ascii_lowercase(), account);
        debug!(username, %uuid, "Account registered");
        Ok(uuid)
    }

    pub fn len(&self) -> usize {
        self.by_login
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Authenticator for MemoryAccounts {
    fn authenticate(&self, login: &str, password: &str) -> Result<String> {
        let accounts = self.by_login.read().unwrap_or_else(PoisonError::into_inner);
        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        match accounts.get(&login.to_ascii_lowercase()) {
            Some(account) if account.password_digest == digest => Ok(account.username.clone()),
            _ => Err(ServerError::rejected(constants::REJECT_BAD_CREDENTIALS)),
        }
    }
}

impl PlayerDirectory for MemoryAccounts {
    fn uuid_of(&self, username: &str) -> Result<Option<Uuid>> {
        Ok(self
            .by_login
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&username.to_ascii_lowercase())
            .map(|a| a.uuid))
    }

    fn username_of(&self, uuid: &Uuid) -> Result<Option<String>> {
        Ok(self
            .by_login
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|a| a.uuid == *uuid)
            .map(|a| a.username.clone()))
    }
}

/// Texture provider for servers without skins.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTextures;

impl TextureProvider for NoTextures {
    fn skin(&self, _uuid: &Uuid, _username: &str) -> Result<Option<Texture>> {
        Ok(None)
    }

    fn cloak(&self, _uuid: &Uuid, _username: &str) -> Result<Option<Texture>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_accept_any_valid_username() {
        let auth = AcceptAuthenticator;
        assert_eq!(auth.authenticate("Steve", "").unwrap(), "Steve");
        assert!(auth.authenticate("bad name!", "").is_err());
        assert_eq!(
            auth.uuid_of("Steve").unwrap(),
            Some(offline_uuid("Steve"))
        );
    }

    #[test]
    fn test_offline_uuid_stable_and_distinct() {
        assert_eq!(offline_uuid("Alex"), offline_uuid("Alex"));
        assert_ne!(offline_uuid("Alex"), offline_uuid("alex"));
    }

    #[test]
    fn test_memory_accounts() {
        let accounts = MemoryAccounts::new();
        let uuid = accounts.insert("Notch", "hunter2").unwrap();

        assert_eq!(accounts.authenticate("notch", "hunter2").unwrap(), "Notch");
        let err = accounts.authenticate("Notch", "wrong").unwrap_err();
        assert!(err.is_rejection());
        assert!(accounts.authenticate("nobody", "hunter2").is_err());

        assert_eq!(accounts.uuid_of("NOTCH").unwrap(), Some(uuid));
        assert_eq!(accounts.username_of(&uuid).unwrap().as_deref(), Some("Notch"));
        assert_eq!(accounts.username_of(&Uuid::nil()).unwrap(), None);
    }
}
