//! Built-in request handlers.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{verify_username, PlayerProfile, Principal, SessionState, Texture, MAX_USERNAME_LEN};
use crate::config::{PROTOCOL_MAGIC, PROTOCOL_VERSION};
use crate::core::wire::{WireReader, WireWriter};
use crate::error::{constants, Result, ServerError};
use crate::protocol::context::RequestContext;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handler::Handler;
use crate::protocol::opcode;

pub const MAX_LOGIN_LEN: usize = 255;
pub const MAX_PASSWORD_LEN: usize = 255;
pub const MAX_UPDATE_NAME_LEN: usize = 255;
pub const MAX_TEXTURE_URL_LEN: usize = 2048;
pub const MAX_BATCH_SIZE: usize = 128;
/// Upper bound for the client key field in HELLO
pub const MAX_KEY_LEN: usize = 1024;

/// Register every built-in handler.
pub fn register_defaults(dispatcher: &Dispatcher) -> Result<()> {
    dispatcher.register(opcode::HELLO, HelloHandler)?;
    dispatcher.register(opcode::PING, PingHandler)?;
    dispatcher.register(opcode::LAUNCHER, LauncherHandler)?;
    dispatcher.register(opcode::AUTH, AuthHandler)?;
    dispatcher.register(opcode::PROFILE_BY_UUID, ProfileByUuidHandler)?;
    dispatcher.register(opcode::PROFILE_BY_USERNAME, ProfileByUsernameHandler)?;
    dispatcher.register(opcode::BATCH_PROFILE_BY_USERNAME, BatchProfileByUsernameHandler)?;
    dispatcher.register(opcode::UPDATE_LIST, UpdateListHandler)?;
    dispatcher.register(opcode::UPDATE, UpdateHandler)?;
    dispatcher.register(opcode::PROFILES, ProfilesHandler)?;
    Ok(())
}

/// Protocol check and launcher key comparison.
///
/// Request: magic `u32`, version `u8`, the launcher's embedded public key.
/// Response: server protocol version, current snapshot generation.
pub struct HelloHandler;

impl Handler for HelloHandler {
    fn name(&self) -> &'static str {
        "hello"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    fn handle(&self, ctx: &RequestContext<'_>, body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        if body.read_u32()? != PROTOCOL_MAGIC {
            return Err(ServerError::InvalidFrame(constants::ERR_BAD_MAGIC));
        }
        if body.read_u8()? != PROTOCOL_VERSION {
            return Err(ServerError::InvalidFrame(constants::ERR_UNSUPPORTED_VERSION));
        }
        let key = body.read_bytes(MAX_KEY_LEN)?;
        if key.as_ref() != ctx.server.store.keys().verifying_key().as_bytes() {
            info!(peer = %ctx.peer(), "Launcher key mismatch");
            return Err(ServerError::rejected(constants::REJECT_KEY_MISMATCH));
        }

        if !ctx
            .server
            .sessions
            .advance(ctx.session.id, SessionState::Authenticating)
        {
            return Err(ServerError::rejected(constants::REJECT_ALREADY_GREETED));
        }

        out.write_u8(PROTOCOL_VERSION);
        out.write_u64(ctx.server.store.current().generation());
        Ok(())
    }
}

pub struct PingHandler;

impl Handler for PingHandler {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    fn handle(&self, _ctx: &RequestContext<'_>, _body: &mut WireReader, _out: &mut WireWriter) -> Result<()> {
        Ok(())
    }
}

/// Signed digest of the distributed launcher, so clients can self-check.
///
/// Response: found flag, then the envelope when a launcher has been built.
pub struct LauncherHandler;

impl Handler for LauncherHandler {
    fn name(&self) -> &'static str {
        "launcher"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    fn handle(&self, ctx: &RequestContext<'_>, _body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        match ctx.server.launcher() {
            Some(envelope) => {
                out.write_bool(true);
                envelope.write_to(out)
            }
            None => {
                out.write_bool(false);
                Ok(())
            }
        }
    }
}

/// Login.
///
/// Request: login, password. Response: player UUID, username, access token.
pub struct AuthHandler;

impl Handler for AuthHandler {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    fn handle(&self, ctx: &RequestContext<'_>, body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let login = body.read_string(MAX_LOGIN_LEN)?;
        let password = body.read_string(MAX_PASSWORD_LEN)?;
        let server = ctx.server;

        let identity = ctx.peer().ip().to_string();
        if !server.rate_limiter.check(&identity) {
            return Err(ServerError::rejected(server.auth.reject_message.clone()));
        }

        let username = server.authenticator.authenticate(&login, &password)?;
        if let Some(allowlist) = &server.auth.allowlist {
            if !allowlist.iter().any(|allowed| allowed.eq_ignore_ascii_case(&username)) {
                return Err(ServerError::rejected(
                    server.auth.allowlist_reject_message.clone(),
                ));
            }
        }

        let uuid = server
            .players
            .uuid_of(&username)?
            .ok_or_else(|| ServerError::rejected(constants::REJECT_BAD_CREDENTIALS))?;
        let access_token = hex::encode(rand::random::<[u8; 16]>());

        let principal = Principal {
            username: username.clone(),
            uuid,
            access_token: access_token.clone(),
        };
        if !server.sessions.authenticate(ctx.session.id, principal) {
            return Err(ServerError::ConnectionClosed);
        }
        server.metrics.login();
        info!(username = %username, %uuid, peer = %ctx.peer(), "Player authenticated");

        out.write_uuid(&uuid);
        out.write_string(&username, MAX_USERNAME_LEN)?;
        out.write_string(&access_token, MAX_LOGIN_LEN)?;
        Ok(())
    }
}

/// Request: UUID. Response: found flag, then the player profile.
pub struct ProfileByUuidHandler;

impl Handler for ProfileByUuidHandler {
    fn name(&self) -> &'static str {
        "profile_by_uuid"
    }

    fn handle(&self, ctx: &RequestContext<'_>, body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let uuid = body.read_uuid()?;
        let profile = match ctx.server.players.username_of(&uuid)? {
            Some(username) => Some(lookup_profile(ctx, uuid, username)),
            None => None,
        };
        write_optional_player(out, profile.as_ref())
    }
}

/// Request: username. Response: found flag, then the player profile.
pub struct ProfileByUsernameHandler;

impl Handler for ProfileByUsernameHandler {
    fn name(&self) -> &'static str {
        "profile_by_username"
    }

    fn handle(&self, ctx: &RequestContext<'_>, body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let username = body.read_string(MAX_USERNAME_LEN)?;
        verify_username(&username)?;
        let profile = by_username(ctx, &username)?;
        write_optional_player(out, profile.as_ref())
    }
}

/// Request: `u16` count plus usernames. Response: one optional profile per
/// username, in request order.
pub struct BatchProfileByUsernameHandler;

impl Handler for BatchProfileByUsernameHandler {
    fn name(&self) -> &'static str {
        "batch_profile_by_username"
    }

    fn handle(&self, ctx: &RequestContext<'_>, body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let count = body.read_u16()? as usize;
        if count > MAX_BATCH_SIZE {
            return Err(ServerError::rejected(constants::REJECT_BATCH_TOO_LARGE));
        }
        let mut usernames = Vec::with_capacity(count);
        for _ in 0..count {
            let username = body.read_string(MAX_USERNAME_LEN)?;
            verify_username(&username)?;
            usernames.push(username);
        }

        out.write_u16(count as u16);
        for username in &usernames {
            let profile = by_username(ctx, username)?;
            write_optional_player(out, profile.as_ref())?;
        }
        Ok(())
    }
}

/// Response: snapshot generation, then the published update set names.
pub struct UpdateListHandler;

impl Handler for UpdateListHandler {
    fn name(&self) -> &'static str {
        "update_list"
    }

    fn handle(&self, ctx: &RequestContext<'_>, _body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let snapshot = ctx.server.store.current();
        out.write_u64(snapshot.generation());
        out.write_u32(snapshot.updates().len() as u32);
        for name in snapshot.update_names() {
            out.write_string(name, MAX_UPDATE_NAME_LEN)?;
        }
        Ok(())
    }
}

/// Request: update set name. Response: found flag, then the signed tree.
pub struct UpdateHandler;

impl Handler for UpdateHandler {
    fn name(&self) -> &'static str {
        "update"
    }

    fn handle(&self, ctx: &RequestContext<'_>, body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let name = body.read_string(MAX_UPDATE_NAME_LEN)?;
        let snapshot = ctx.server.store.current();
        match snapshot.update(&name) {
            Some(envelope) => {
                debug!(name = %name, generation = snapshot.generation(), "Serving update");
                out.write_bool(true);
                envelope.write_to(out)
            }
            None => {
                out.write_bool(false);
                Ok(())
            }
        }
    }
}

/// Response: snapshot generation, then every signed profile in display order.
pub struct ProfilesHandler;

impl Handler for ProfilesHandler {
    fn name(&self) -> &'static str {
        "profiles"
    }

    fn handle(&self, ctx: &RequestContext<'_>, _body: &mut WireReader, out: &mut WireWriter) -> Result<()> {
        let snapshot = ctx.server.store.current();
        out.write_u64(snapshot.generation());
        out.write_u32(snapshot.profiles().len() as u32);
        for envelope in snapshot.profiles() {
            envelope.write_to(out)?;
        }
        Ok(())
    }
}

fn by_username(ctx: &RequestContext<'_>, username: &str) -> Result<Option<PlayerProfile>> {
    Ok(ctx
        .server
        .players
        .uuid_of(username)?
        .map(|uuid| lookup_profile(ctx, uuid, username.to_string())))
}

/// Texture backends are best effort: a failing lookup means no texture.
fn lookup_profile(ctx: &RequestContext<'_>, uuid: Uuid, username: String) -> PlayerProfile {
    let textures = &ctx.server.textures;
    let skin = textures.skin(&uuid, &username).unwrap_or_else(|e| {
        warn!(username = %username, error = %e, "Can't get skin texture");
        None
    });
    let cloak = textures.cloak(&uuid, &username).unwrap_or_else(|e| {
        warn!(username = %username, error = %e, "Can't get cloak texture");
        None
    });
    PlayerProfile {
        uuid,
        username,
        skin,
        cloak,
    }
}

pub fn write_optional_player(out: &mut WireWriter, profile: Option<&PlayerProfile>) -> Result<()> {
    match profile {
        Some(profile) => {
            out.write_bool(true);
            write_player(out, profile)
        }
        None => {
            out.write_bool(false);
            Ok(())
        }
    }
}

pub fn write_player(out: &mut WireWriter, profile: &PlayerProfile) -> Result<()> {
    out.write_uuid(&profile.uuid);
    out.write_string(&profile.username, MAX_USERNAME_LEN)?;
    write_texture(out, profile.skin.as_ref())?;
    write_texture(out, profile.cloak.as_ref())
}

fn write_texture(out: &mut WireWriter, texture: Option<&Texture>) -> Result<()> {
    match texture {
        Some(texture) => {
            out.write_bool(true);
            out.write_string(&texture.url, MAX_TEXTURE_URL_LEN)?;
            out.write_raw(&texture.digest);
        }
        None => out.write_bool(false),
    }
    Ok(())
}

pub fn read_optional_player(input: &mut WireReader) -> Result<Option<PlayerProfile>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    Ok(Some(PlayerProfile {
        uuid: input.read_uuid()?,
        username: input.read_string(MAX_USERNAME_LEN)?,
        skin: read_texture(input)?,
        cloak: read_texture(input)?,
    }))
}

fn read_texture(input: &mut WireReader) -> Result<Option<Texture>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    Ok(Some(Texture {
        url: input.read_string(MAX_TEXTURE_URL_LEN)?,
        digest: input.read_fixed::<32>()?,
    }))
}
