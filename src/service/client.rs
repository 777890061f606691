use std::net::SocketAddr;
use std::path::Path;

use ed25519_dalek::VerifyingKey;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::auth::{PlayerProfile, MAX_USERNAME_LEN};
use crate::bootstrap::{read_artifact_config, LauncherDigest};
use crate::config::{PROTOCOL_MAGIC, PROTOCOL_VERSION};
use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::{constants, Result, ServerError};
use crate::protocol::handlers::{
    read_optional_player, MAX_LOGIN_LEN, MAX_PASSWORD_LEN, MAX_UPDATE_NAME_LEN,
};
use crate::protocol::{opcode, Response};
use crate::state::{DigestNode, Profile, SignedEnvelope};

/// Result of a successful AUTH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub uuid: Uuid,
    pub username: String,
    pub access_token: String,
}

/// Launcher side of the protocol.
///
/// Everything signed is checked against the public key the client was built
/// with before it is handed back; nothing unverified escapes this type.
pub struct LauncherClient {
    framed: Framed<TcpStream, FrameCodec>,
    key: VerifyingKey,
}

impl LauncherClient {
    #[instrument(skip(key))]
    pub async fn connect(addr: SocketAddr, key: VerifyingKey) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
            key,
        })
    }

    /// Connect using the address and key embedded in a built launcher.
    pub async fn from_artifact<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = read_artifact_config(path)?;
        let raw: [u8; 32] = config
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| ServerError::ConfigError(constants::ERR_KEY_LENGTH.to_string()))?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|_| ServerError::VerificationFailure)?;
        let addr = tokio::net::lookup_host((config.address.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| ServerError::ConfigError(format!("Can't resolve {}", config.address)))?;
        Self::connect(addr, key).await
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, opcode: u16, body: impl Into<bytes::Bytes>) -> Result<Response> {
        self.framed.send(Frame::new(opcode, body)).await?;
        let frame = self
            .framed
            .next()
            .await
            .ok_or(ServerError::ConnectionClosed)??;
        if frame.opcode != opcode {
            return Err(ServerError::UnexpectedOpcode(frame.opcode));
        }
        Response::decode(frame.body)
    }

    async fn call(&mut self, opcode: u16, body: WireWriter) -> Result<WireReader> {
        let payload = self.request(opcode, body.into_bytes()).await?.into_payload()?;
        Ok(WireReader::new(payload))
    }

    /// HELLO; returns the server's snapshot generation.
    pub async fn hello(&mut self) -> Result<u64> {
        let mut body = WireWriter::new();
        body.write_u32(PROTOCOL_MAGIC);
        body.write_u8(PROTOCOL_VERSION);
        body.write_bytes(self.key.as_bytes())?;

        let mut reply = self.call(opcode::HELLO, body).await?;
        if reply.read_u8()? != PROTOCOL_VERSION {
            return Err(ServerError::InvalidFrame(constants::ERR_UNSUPPORTED_VERSION));
        }
        let generation = reply.read_u64()?;
        reply.finish()?;
        debug!(generation, "Handshake complete");
        Ok(generation)
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.call(opcode::PING, WireWriter::new()).await?.finish()
    }

    pub async fn auth(&mut self, login: &str, password: &str) -> Result<AuthResult> {
        let mut body = WireWriter::new();
        body.write_string(login, MAX_LOGIN_LEN)?;
        body.write_string(password, MAX_PASSWORD_LEN)?;

        let mut reply = self.call(opcode::AUTH, body).await?;
        let result = AuthResult {
            uuid: reply.read_uuid()?,
            username: reply.read_string(MAX_USERNAME_LEN)?,
            access_token: reply.read_string(MAX_LOGIN_LEN)?,
        };
        reply.finish()?;
        Ok(result)
    }

    pub async fn profile_by_uuid(&mut self, uuid: &Uuid) -> Result<Option<PlayerProfile>> {
        let mut body = WireWriter::new();
        body.write_uuid(uuid);
        let mut reply = self.call(opcode::PROFILE_BY_UUID, body).await?;
        let profile = read_optional_player(&mut reply)?;
        reply.finish()?;
        Ok(profile)
    }

    pub async fn profile_by_username(&mut self, username: &str) -> Result<Option<PlayerProfile>> {
        let mut body = WireWriter::new();
        body.write_string(username, MAX_USERNAME_LEN)?;
        let mut reply = self.call(opcode::PROFILE_BY_USERNAME, body).await?;
        let profile = read_optional_player(&mut reply)?;
        reply.finish()?;
        Ok(profile)
    }

    pub async fn batch_profile_by_username(
        &mut self,
        usernames: &[&str],
    ) -> Result<Vec<Option<PlayerProfile>>> {
        let count = u16::try_from(usernames.len())
            .map_err(|_| ServerError::rejected(constants::REJECT_BATCH_TOO_LARGE))?;
        let mut body = WireWriter::new();
        body.write_u16(count);
        for username in usernames {
            body.write_string(username, MAX_USERNAME_LEN)?;
        }

        let mut reply = self.call(opcode::BATCH_PROFILE_BY_USERNAME, body).await?;
        let n = reply.read_u16()? as usize;
        let mut profiles = Vec::with_capacity(n);
        for _ in 0..n {
            profiles.push(read_optional_player(&mut reply)?);
        }
        reply.finish()?;
        Ok(profiles)
    }

    /// Generation and names of the published update sets.
    pub async fn update_list(&mut self) -> Result<(u64, Vec<String>)> {
        let mut reply = self.call(opcode::UPDATE_LIST, WireWriter::new()).await?;
        let generation = reply.read_u64()?;
        let count = reply.read_u32()? as usize;
        let mut names = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            names.push(reply.read_string(MAX_UPDATE_NAME_LEN)?);
        }
        reply.finish()?;
        Ok((generation, names))
    }

    /// Fetch and verify the digest tree of one update set.
    pub async fn update(&mut self, name: &str) -> Result<Option<DigestNode>> {
        let mut body = WireWriter::new();
        body.write_string(name, MAX_UPDATE_NAME_LEN)?;
        let mut reply = self.call(opcode::UPDATE, body).await?;
        if !reply.read_bool()? {
            reply.finish()?;
            return Ok(None);
        }
        let envelope = SignedEnvelope::<DigestNode>::read_from(&mut reply)?;
        reply.finish()?;
        envelope.open(&self.key).map(Some)
    }

    /// Fetch and verify every client profile.
    pub async fn profiles(&mut self) -> Result<(u64, Vec<Profile>)> {
        let mut reply = self.call(opcode::PROFILES, WireWriter::new()).await?;
        let generation = reply.read_u64()?;
        let count = reply.read_u32()? as usize;
        let mut profiles = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let envelope = SignedEnvelope::<Profile>::read_from(&mut reply)?;
            profiles.push(envelope.open(&self.key)?);
        }
        reply.finish()?;
        Ok((generation, profiles))
    }

    /// Verified digest of the distributed launcher, if the server built one.
    pub async fn launcher_digest(&mut self) -> Result<Option<LauncherDigest>> {
        let mut reply = self.call(opcode::LAUNCHER, WireWriter::new()).await?;
        if !reply.read_bool()? {
            reply.finish()?;
            return Ok(None);
        }
        let envelope = SignedEnvelope::<LauncherDigest>::read_from(&mut reply)?;
        reply.finish()?;
        envelope.open(&self.key).map(Some)
    }
}
