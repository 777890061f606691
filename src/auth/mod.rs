//! Authentication: rate limiting, session tracking and account backends.

pub mod provider;
pub mod rate_limiter;
pub mod session;

pub use provider::{
    AcceptAuthenticator, Authenticator, MemoryAccounts, NoTextures, PlayerDirectory,
    PlayerProfile, Texture, TextureProvider,
};
pub use rate_limiter::RateLimiter;
pub use session::{Principal, Session, SessionRegistry, SessionState};

use crate::error::{Result, ServerError};

/// Longest username accepted anywhere in the protocol.
pub const MAX_USERNAME_LEN: usize = 16;

/// Usernames are 1 to 16 characters of `[A-Za-z0-9_.-]`.
pub fn verify_username(username: &str) -> Result<&str> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(username)
    } else {
        Err(ServerError::rejected(format!(
            "Illegal username: '{username}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        for ok in ["Steve", "a", "x_y.z-1", "ABCDEFGHIJKLMNOP"] {
            assert!(verify_username(ok).is_ok(), "{ok}");
        }
        for bad in ["", "ABCDEFGHIJKLMNOPQ", "with space", "ümlaut", "semi;colon"] {
            assert!(verify_username(bad).is_err(), "{bad}");
        }
    }
}
