//! Shared state handed to every request handler.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::auth::{
    AcceptAuthenticator, Authenticator, NoTextures, PlayerDirectory, RateLimiter, Session,
    SessionRegistry, TextureProvider,
};
use crate::bootstrap::LauncherDigest;
use crate::config::AuthConfig;
use crate::error::Result;
use crate::state::{SignedEnvelope, SnapshotStore};
use crate::utils::metrics::Metrics;

/// Everything handlers can reach. Built once at startup and shared behind
/// an `Arc`; nothing in here is a process-global.
pub struct ServerContext {
    pub auth: AuthConfig,
    pub store: Arc<SnapshotStore>,
    pub sessions: Arc<SessionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub players: Arc<dyn PlayerDirectory>,
    pub textures: Arc<dyn TextureProvider>,
    pub metrics: Arc<Metrics>,
    launcher: RwLock<Option<Arc<SignedEnvelope<LauncherDigest>>>>,
}

impl ServerContext {
    /// Context with the offline account backend and no textures.
    pub fn new(auth: AuthConfig, store: Arc<SnapshotStore>) -> Result<Self> {
        let rate_limiter = RateLimiter::new(auth.rate_limit, auth.rate_limit_window)?;
        Ok(Self {
            sessions: Arc::new(SessionRegistry::new(auth.session_idle_timeout)),
            rate_limiter: Arc::new(rate_limiter),
            auth,
            store,
            authenticator: Arc::new(AcceptAuthenticator),
            players: Arc::new(AcceptAuthenticator),
            textures: Arc::new(NoTextures),
            metrics: Arc::new(Metrics::new()),
            launcher: RwLock::new(None),
        })
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_players(mut self, players: Arc<dyn PlayerDirectory>) -> Self {
        self.players = players;
        self
    }

    pub fn with_textures(mut self, textures: Arc<dyn TextureProvider>) -> Self {
        self.textures = textures;
        self
    }

    /// Signed digest of the last built launcher artifact.
    pub fn launcher(&self) -> Option<Arc<SignedEnvelope<LauncherDigest>>> {
        self.launcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_launcher(&self, digest: SignedEnvelope<LauncherDigest>) {
        *self.launcher.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(digest));
    }
}

/// Per-request view: the server plus the caller's session as of this request.
pub struct RequestContext<'a> {
    pub server: &'a ServerContext,
    pub session: Session,
}

impl<'a> RequestContext<'a> {
    pub fn new(server: &'a ServerContext, session: Session) -> Self {
        Self { server, session }
    }

    pub fn peer(&self) -> SocketAddr {
        self.session.peer
    }
}
