//! Tick cadence and backlog recovery.
//!
//! Pure bookkeeping: the render loop asks [`Schedule::poll`] what to do at
//! time `now` and either waits or renders. Tick `n` is due at
//! `epoch + n * frame_duration` and is stamped with `n * frame_duration`.
//!
//! When the loop falls more than one frame duration behind, the missed ticks
//! are not replayed. They collapse into one immediate tick stamped with the
//! current time, and the schedule restarts one frame duration from now.
//!
//! A forced tick ([`Schedule::pull_forward`]) renders the pending tick early
//! but keeps its grid timestamp, so later ticks stay on the grid.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Nothing due yet; the next tick is this far away.
    Wait(Duration),
    /// Render a tick now.
    Render {
        /// Presentation time relative to the epoch.
        pts: Duration,
        /// Tick index, `pts / frame_duration` rounded down.
        tick: u64,
        /// Ticks folded into this one because the loop fell behind.
        collapsed: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Schedule {
    epoch: Instant,
    frame_duration: Duration,
    next: Instant,
    /// The pending tick renders at the next poll, even if not yet due.
    forced: bool,
    last_rendered: Option<Instant>,
}

impl Schedule {
    pub fn new(epoch: Instant, frame_duration: Duration) -> Self {
        Self {
            epoch,
            frame_duration,
            next: epoch,
            forced: false,
            last_rendered: None,
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn next_tick(&self) -> Instant {
        self.next
    }

    /// Restart the cadence from `epoch`.
    pub fn set_epoch(&mut self, epoch: Instant) {
        self.epoch = epoch;
        self.next = epoch;
        self.forced = false;
        self.last_rendered = None;
    }

    pub fn poll(&mut self, now: Instant) -> TickDecision {
        let forced = std::mem::take(&mut self.forced);
        if now < self.next && !forced {
            return TickDecision::Wait(self.next - now);
        }

        let lag = now.saturating_duration_since(self.next);
        let (at, collapsed) = if lag > self.frame_duration {
            let missed = (lag.as_nanos() / self.frame_duration.as_nanos()) as u64;
            self.next = now + self.frame_duration;
            (now, missed)
        } else {
            let at = self.next;
            self.next += self.frame_duration;
            (at, 0)
        };

        self.last_rendered = Some(now);
        let pts = at.saturating_duration_since(self.epoch);
        TickDecision::Render {
            pts,
            tick: (pts.as_nanos() / self.frame_duration.as_nanos()) as u64,
            collapsed,
        }
    }

    /// Advance past a due tick without rendering it. Used while paused so no
    /// backlog builds up.
    ///
    /// Returns `None` if a tick was skipped, or the wait until the next one.
    pub fn skip(&mut self, now: Instant) -> Option<Duration> {
        self.forced = false;
        if now < self.next {
            return Some(self.next - now);
        }
        if now - self.next > self.frame_duration {
            self.next = now + self.frame_duration;
        } else {
            self.next += self.frame_duration;
        }
        None
    }

    /// Render the pending tick at the next poll instead of waiting for it.
    ///
    /// Only the next tick is pulled, and only if it is at most one frame
    /// away, so repeated requests cannot render ahead of schedule. The tick
    /// keeps its grid timestamp. Returns whether the schedule changed.
    pub fn pull_forward(&mut self, now: Instant) -> bool {
        let after_last = self.last_rendered.map_or(true, |last| now > last);
        let pending = self.next > now && self.next <= now + self.frame_duration;
        if pending && after_last && !self.forced {
            self.forced = true;
            true
        } else {
            false
        }
    }
}
