//! Per-process write sequencing.
//!
//! Every synchronizer call stamps its shadow write (direct or queued) with a
//! sequence number from [`WriteSequencer`]. The projector compares the
//! event's sequence with the stored record's and refuses to let a late
//! queued event overwrite a newer direct write for the same key.
//!
//! Sequences are derived from wall-clock microseconds so they keep growing
//! across restarts, and are bumped by one whenever the clock has not moved
//! (or moved backwards) since the last issued value.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence generator shared by every writer in the process.
#[derive(Debug, Default)]
pub struct WriteSequencer {
    last: AtomicU64,
}

impl WriteSequencer {
    /// Create a new sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next sequence number. Strictly greater than every
    /// previously issued value.
    pub fn next(&self) -> u64 {
        let now = wall_clock_micros();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }

    /// The last sequence number issued, or zero if none.
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_clock_micros() -> u64 {
    let micros = Utc::now().timestamp_micros();
    if micros < 0 {
        0
    } else {
        micros as u64
    }
}
