//! Server key pair persistence.
//!
//! The public file holds the 32-byte Ed25519 verifying key, the private file
//! the 32-byte seed. Both present: they must belong together. Neither
//! present: a fresh pair is generated and written. One without the other is
//! a configuration error.

use std::fs;
use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use zeroize::Zeroize;

use crate::error::{constants, Result, ServerError};

pub struct ServerKeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl ServerKeyPair {
    /// Fresh pair seeded from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        getrandom::fill(&mut seed)
            .map_err(|e| ServerError::Custom(format!("OS RNG unavailable: {e}")))?;
        let pair = Self::from_seed(&seed);
        seed.zeroize();
        Ok(pair)
    }

    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    /// Read the pair from disk, or generate and persist one when neither file exists.
    #[instrument(skip_all, fields(public = %public_path.as_ref().display()))]
    pub fn load_or_generate<P: AsRef<Path>, Q: AsRef<Path>>(
        public_path: P,
        private_path: Q,
    ) -> Result<Self> {
        let (public_path, private_path) = (public_path.as_ref(), private_path.as_ref());
        match (public_path.is_file(), private_path.is_file()) {
            (true, true) => {
                info!("Reading server key pair");
                Self::load(public_path, private_path)
            }
            (false, false) => {
                info!("Generating server key pair");
                let pair = Self::generate()?;
                pair.save(public_path, private_path)?;
                Ok(pair)
            }
            _ => Err(ServerError::ConfigError(
                constants::ERR_KEY_PAIR_INCOMPLETE.to_string(),
            )),
        }
    }

    pub fn load(public_path: &Path, private_path: &Path) -> Result<Self> {
        let public: [u8; PUBLIC_KEY_LENGTH] = fs::read(public_path)?
            .try_into()
            .map_err(|_| ServerError::ConfigError(constants::ERR_KEY_LENGTH.to_string()))?;
        let mut raw_private = fs::read(private_path)?;
        let seed: Option<[u8; SECRET_KEY_LENGTH]> = raw_private.as_slice().try_into().ok();
        raw_private.zeroize();
        let mut seed =
            seed.ok_or_else(|| ServerError::ConfigError(constants::ERR_KEY_LENGTH.to_string()))?;

        let pair = Self::from_seed(&seed);
        seed.zeroize();

        if pair.verifying.to_bytes() != public {
            return Err(ServerError::ConfigError(
                constants::ERR_KEY_MISMATCH.to_string(),
            ));
        }
        Ok(pair)
    }

    pub fn save(&self, public_path: &Path, private_path: &Path) -> Result<()> {
        info!("Writing server key pair files");
        fs::write(public_path, self.verifying.to_bytes())?;
        let mut seed = self.signing.to_bytes();
        let written = fs::write(private_path, seed);
        seed.zeroize();
        written?;
        Ok(())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying.to_bytes()
    }

    /// CRC32 of the public key, logged at startup for quick visual comparison.
    pub fn crc32(&self) -> u32 {
        crc32fast::hash(self.verifying.as_bytes())
    }

    /// SHA-256 of the public key.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.verifying.as_bytes()).into()
    }
}
