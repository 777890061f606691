//! Periodic expiry sweeps, decoupled from request handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::auth::{RateLimiter, SessionRegistry};
use crate::utils::metrics::Metrics;

/// Something holding entries that go stale with time.
pub trait Sweepable: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Remove stale entries as of `now`; returns how many were removed.
    fn sweep(&self, now: Instant) -> usize;
}

impl Sweepable for SessionRegistry {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn sweep(&self, now: Instant) -> usize {
        SessionRegistry::sweep(self, now)
    }
}

impl Sweepable for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn sweep(&self, now: Instant) -> usize {
        RateLimiter::sweep(self, now)
    }
}

/// Run `target.sweep` every `period` until `shutdown` flips to true.
pub fn spawn_sweep(
    target: Arc<dyn Sweepable>,
    period: Duration,
    metrics: Option<Arc<Metrics>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let removed = target.sweep(Instant::now());
                    trace!(target = target.name(), removed, "Sweep finished");
                    if let Some(metrics) = &metrics {
                        metrics.swept(removed);
                    }
                }
            }
        }
        debug!(target = target.name(), "Sweep task stopped");
    })
}
