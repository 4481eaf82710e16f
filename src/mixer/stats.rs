//! Mixer counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the mixer's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerStats {
    /// Ticks that came due, rendered or not.
    pub ticks: u64,
    /// Completed composite passes.
    pub composites: u64,
    /// Composites delivered to a live output.
    pub emitted: u64,
    /// Ticks abandoned because of a resource or render failure.
    pub skipped: u64,
    /// Catch-up events.
    pub collapsed: u64,
    /// Ticks folded into catch-up events.
    pub missed: u64,
    /// Ticks passed over while paused.
    pub paused: u64,
    /// Frames accepted from producers.
    pub pushes: u64,
    /// Accepted frames that replaced a frame not yet superseded by a pass.
    pub replaced: u64,
    /// Frames refused (unknown source or wrong length).
    pub rejected: u64,
    /// Slots cleared by the stale-frame policy.
    pub stale_drops: u64,
    /// Sources removed because their owner dropped them.
    pub pruned: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub ticks: AtomicU64,
    pub composites: AtomicU64,
    pub emitted: AtomicU64,
    pub skipped: AtomicU64,
    pub collapsed: AtomicU64,
    pub missed: AtomicU64,
    pub paused: AtomicU64,
    pub pushes: AtomicU64,
    pub replaced: AtomicU64,
    pub rejected: AtomicU64,
    pub stale_drops: AtomicU64,
    pub pruned: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MixerStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MixerStats {
            ticks: load(&self.ticks),
            composites: load(&self.composites),
            emitted: load(&self.emitted),
            skipped: load(&self.skipped),
            collapsed: load(&self.collapsed),
            missed: load(&self.missed),
            paused: load(&self.paused),
            pushes: load(&self.pushes),
            replaced: load(&self.replaced),
            rejected: load(&self.rejected),
            stale_drops: load(&self.stale_drops),
            pruned: load(&self.pruned),
        }
    }
}
