//! Observability counters
//!
//! Atomic counters owned by the server context. There is no process-global
//! instance; every server (and every test) gets its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Connections dropped at accept because the limit was reached
    pub connections_refused: AtomicU64,
    /// Requests dispatched to a handler
    pub requests_total: AtomicU64,
    /// Requests answered with a rejection
    pub rejections: AtomicU64,
    /// Faults that closed a connection
    pub protocol_errors: AtomicU64,
    /// Successful logins
    pub logins: AtomicU64,
    /// Published snapshots
    pub resyncs: AtomicU64,
    /// Failed resync attempts
    pub resync_failures: AtomicU64,
    /// Update envelopes signed during resyncs
    pub envelopes_signed: AtomicU64,
    /// Update envelopes carried over unchanged
    pub envelopes_reused: AtomicU64,
    /// Expired sessions and rate-limit windows removed by sweeps
    pub swept: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            logins: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            resync_failures: AtomicU64::new(0),
            envelopes_signed: AtomicU64::new(0),
            envelopes_reused: AtomicU64::new(0),
            swept: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a published resync and how many update envelopes it signed or reused
    pub fn resync(&self, signed: usize, reused: usize) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        self.envelopes_signed
            .fetch_add(signed as u64, Ordering::Relaxed);
        self.envelopes_reused
            .fetch_add(reused as u64, Ordering::Relaxed);
    }

    pub fn resync_failed(&self) {
        self.resync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn swept(&self, count: usize) {
        self.swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            resync_failures: self.resync_failures.load(Ordering::Relaxed),
            envelopes_signed: self.envelopes_signed.load(Ordering::Relaxed),
            envelopes_reused: self.envelopes_reused.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            connections_refused = s.connections_refused,
            requests_total = s.requests_total,
            rejections = s.rejections,
            protocol_errors = s.protocol_errors,
            logins = s.logins,
            resyncs = s.resyncs,
            resync_failures = s.resync_failures,
            envelopes_signed = s.envelopes_signed,
            envelopes_reused = s.envelopes_reused,
            swept = s.swept,
            uptime_seconds = s.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_refused: u64,
    pub requests_total: u64,
    pub rejections: u64,
    pub protocol_errors: u64,
    pub logins: u64,
    pub resyncs: u64,
    pub resync_failures: u64,
    pub envelopes_signed: u64,
    pub envelopes_reused: u64,
    pub swept: u64,
    pub uptime_seconds: u64,
}

/// Logs how long an operation took when dropped.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = Metrics::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        m.resync(3, 2);
        m.rejection();

        let s = m.snapshot();
        assert_eq!(s.connections_total, 2);
        assert_eq!(s.connections_active, 1);
        assert_eq!(s.envelopes_signed, 3);
        assert_eq!(s.envelopes_reused, 2);
        assert_eq!(s.rejections, 1);
        assert_eq!(s.resyncs, 1);
    }
}
