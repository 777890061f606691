//! Sliding-window rate limiter for authentication attempts.
//!
//! Each identity (usually the client IP) keeps the timestamps of its recent
//! allowed attempts. A check prunes timestamps older than the window, denies
//! if the remaining count already reached the limit, and otherwise records
//! the new attempt. Denied attempts are not recorded, so hammering the
//! server while blocked does not extend the block.
//!
//! Idle identities are purged by [`RateLimiter::sweep`], driven by the
//! maintenance scheduler rather than by request handling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::error::{Result, ServerError};

#[derive(Debug)]
pub struct RateLimiter {
    /// Allowed attempts per identity inside one window
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Both limits must be positive.
    pub fn new(max_attempts: u32, window: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(ServerError::ConfigError(
                "Rate limit must allow at least one attempt".into(),
            ));
        }
        if window.is_zero() {
            return Err(ServerError::ConfigError(
                "Rate limit window must be positive".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record an attempt for `identity` now, if allowed.
    pub fn check(&self, identity: &str) -> bool {
        self.check_at(identity, Instant::now())
    }

    #[instrument(skip(self, now))]
    pub fn check_at(&self, identity: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let attempts = windows.entry(identity.to_string()).or_default();

        while let Some(oldest) = attempts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                attempts.pop_front();
            } else {
                break;
            }
        }

        if attempts.len() >= self.max_attempts as usize {
            warn!(
                identity,
                attempts = attempts.len(),
                "Rate limit exceeded"
            );
            return false;
        }

        attempts.push_back(now);
        true
    }

    /// Drop identities whose latest attempt is older than the window.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, attempts| match attempts.back() {
            Some(latest) => now.saturating_duration_since(*latest) < self.window,
            None => false,
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "Rate limit windows purged");
        }
        removed
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything (useful for testing or manual reset)
    pub fn clear(&self) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Rate limiter cleared");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    #[test]
    fn test_fourth_attempt_denied() {
        let limiter = RateLimiter::new(3, WINDOW).unwrap();
        let t0 = Instant::now();
        let results: Vec<bool> = (0..4)
            .map(|i| limiter.check_at("10.0.0.1", t0 + Duration::from_millis(i * 100)))
            .collect();
        assert_eq!(results, vec![true, true, true, false]);
    }

    #[test]
    fn test_window_elapsed_resets() {
        let limiter = RateLimiter::new(3, WINDOW).unwrap();
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("peer", t0));
        }
        assert!(!limiter.check_at("peer", t0 + Duration::from_millis(999)));
        assert!(limiter.check_at("peer", t0 + WINDOW));
    }

    #[test]
    fn test_denied_attempts_not_recorded() {
        let limiter = RateLimiter::new(1, WINDOW).unwrap();
        let t0 = Instant::now();
        assert!(limiter.check_at("peer", t0));
        for i in 1..10 {
            assert!(!limiter.check_at("peer", t0 + Duration::from_millis(i * 50)));
        }
        // Only the first attempt counts, so the block ends one window after it.
        assert!(limiter.check_at("peer", t0 + WINDOW));
    }

    #[test]
    fn test_identities_independent() {
        let limiter = RateLimiter::new(1, WINDOW).unwrap();
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0));
        assert!(!limiter.check_at("a", t0));
        assert!(limiter.check_at("b", t0));
    }

    #[test]
    fn test_sweep_removes_idle_identities() {
        let limiter = RateLimiter::new(2, WINDOW).unwrap();
        let t0 = Instant::now();
        limiter.check_at("old", t0);
        limiter.check_at("fresh", t0 + Duration::from_millis(900));

        assert_eq!(limiter.sweep(t0 + Duration::from_millis(1200)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(RateLimiter::new(0, WINDOW).is_err());
        assert!(RateLimiter::new(3, Duration::ZERO).is_err());
    }
}
