//! # Utility Modules
//!
//! Logging setup and operational counters.

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
