//! Background Jobs
//!
//! Periodic tasks spawned next to the write path:
//!
//! - `projector`: drains the outbox into the shadow store
//! - `health_check`: runs sync verification and logs anything not healthy
//!
//! # Usage
//!
//! ```ignore
//! use kvshadow_sync::jobs::{projector_task, health_check_task};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(projector_task(Arc::clone(&projector), shutdown_rx.clone()));
//! tokio::spawn(health_check_task(Arc::clone(&verifier), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod health_check;
pub mod projector;

pub use health_check::{health_check_task, HealthCheckMetrics, HealthCheckSnapshot};
pub use projector::{projector_task, ProjectorJobMetrics, ProjectorJobSnapshot};

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Ticker that first fires after `initial_delay`, then every `period`.
/// Ticks missed while a run overran are delayed, not bunched up.
pub(crate) fn ticker(initial_delay: Duration, period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
