//! # Session Registry
//!
//! Per-connection authentication state with idle expiry.
//!
//! A session is opened when a connection is accepted and removed when the
//! connection closes or when the maintenance sweep finds it idle for longer
//! than the configured timeout. Callers only ever receive copies of a
//! session; the registry's map is never exposed.
//!
//! ## States
//! ```text
//! Connecting -> Authenticating -> Active -> Closed
//! ```
//! `Connecting` until the HELLO handshake succeeds, `Authenticating` until a
//! successful login, `Active` afterwards. `Closed` is terminal.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Active)
                | (Active, Active)
                | (Connecting | Authenticating | Active, Closed)
        )
    }
}

/// Who a session belongs to once authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub uuid: Uuid,
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    pub peer: SocketAddr,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    pub state: SessionState,
    pub principal: Option<Principal>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }
}

/// Thread-safe registry of live sessions keyed by connection id.
#[derive(Debug)]
pub struct SessionRegistry {
    idle_timeout: Duration,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Session>>,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Register a freshly accepted connection.
    pub fn open(&self, peer: SocketAddr) -> Session {
        let now = Instant::now();
        let session = Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer,
            created_at: now,
            last_activity_at: now,
            state: SessionState::Connecting,
            principal: None,
        };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id, session.clone());
        trace!(session_id = session.id, %peer, "Session opened");
        session
    }

    pub fn get(&self, id: u64) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Mark activity and return the updated session, `None` if it expired.
    pub fn touch(&self, id: u64) -> Option<Session> {
        self.touch_at(id, Instant::now())
    }

    pub fn touch_at(&self, id: u64, now: Instant) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(&id)?;
        session.last_activity_at = now;
        Some(session.clone())
    }

    /// Move a session to `next`; returns false for unknown sessions or
    /// illegal transitions.
    pub fn advance(&self, id: u64, next: SessionState) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&id) {
            Some(session) if session.state.can_advance_to(next) => {
                debug!(session_id = id, from = ?session.state, to = ?next, "Session state changed");
                session.state = next;
                true
            }
            _ => false,
        }
    }

    /// Attach a principal and move the session to `Active`.
    pub fn authenticate(&self, id: u64, principal: Principal) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&id) {
            Some(session) if session.state.can_advance_to(SessionState::Active) => {
                debug!(session_id = id, username = %principal.username, "Session authenticated");
                session.state = SessionState::Active;
                session.principal = Some(principal);
                true
            }
            _ => false,
        }
    }

    /// Remove a session, returning its final state as `Closed`.
    pub fn close(&self, id: u64) -> Option<Session> {
        let mut session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)?;
        session.state = SessionState::Closed;
        trace!(session_id = id, "Session closed");
        Some(session)
    }

    /// Remove sessions idle for longer than the timeout.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for(now) <= self.idle_timeout);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "Idle sessions expired");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sessions in the `Active` state.
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.is_active())
            .count()
    }
}
