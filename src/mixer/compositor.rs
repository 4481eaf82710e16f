//! Composite pass execution.
//!
//! The compositor owns the render context, the output pool and the double
//! buffer. It lives on exactly one thread at a time: the render thread once
//! the mixer is started, or the caller of [`Mixer::step`](super::Mixer::step)
//! before that.

use super::schedule::TickDecision;
use super::stats::StatsCounters;
use super::table::DrawItem;
use super::Shared;
use crate::filters::{passthrough, FilterHandle, VideoFilter};
use crate::frame::{
    CompositeMetadata, DoubleBuffer, FrameBuffer, FrameId, FramePool, Metadata, Payload, PoolError,
};
use crate::gpu::{RenderContext, RenderError, TextureCache};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Outcome of one scheduling iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// No tick due; the next one is this far away.
    Waiting(Duration),
    /// A composite pass ran.
    Composited {
        pts: Duration,
        tick: u64,
        collapsed_ticks: u64,
        /// Sources drawn into the composite.
        sources: usize,
        /// Whether a live output received the composite.
        emitted: bool,
    },
    /// A tick came due while paused and was passed over.
    Paused,
    /// The tick was abandoned; the next one is tried as scheduled.
    Skipped(String),
}

/// Why a pass could not produce a composite.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("no output buffer available: {0}")]
    Pool(#[from] PoolError),
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("render target is shared")]
    TargetBusy,
}

pub(crate) struct Compositor {
    ctx: Box<dyn RenderContext>,
    pool: FramePool,
    double: DoubleBuffer,
    cache: TextureCache,
    passthrough: Box<dyn VideoFilter>,
    /// Filters this compositor has bound, keyed by [`FilterHandle::key`].
    known: HashMap<usize, FilterHandle>,
    passthrough_warned: bool,
}

impl Compositor {
    pub fn new(ctx: Box<dyn RenderContext>, pool: FramePool, double: DoubleBuffer) -> Self {
        Self {
            ctx,
            pool,
            double,
            cache: TextureCache::new(),
            passthrough: passthrough(),
            known: HashMap::new(),
            passthrough_warned: false,
        }
    }

    /// Run queued commands, then handle whatever the schedule says is due.
    pub fn iterate(&mut self, shared: &Shared, now: Instant) -> TickReport {
        shared.commands.drain(self.ctx.as_mut());

        if shared.is_paused() {
            return match shared.schedule.lock().skip(now) {
                Some(wait) => TickReport::Waiting(wait),
                None => {
                    StatsCounters::bump(&shared.stats.ticks);
                    StatsCounters::bump(&shared.stats.paused);
                    TickReport::Paused
                }
            };
        }

        let decision = shared.schedule.lock().poll(now);
        match decision {
            TickDecision::Wait(wait) => TickReport::Waiting(wait),
            TickDecision::Render {
                pts,
                tick,
                collapsed,
            } => self.tick(shared, now, pts, tick, collapsed),
        }
    }

    fn tick(
        &mut self,
        shared: &Shared,
        now: Instant,
        pts: Duration,
        tick: u64,
        collapsed: u64,
    ) -> TickReport {
        let stats = &shared.stats;
        StatsCounters::bump(&stats.ticks);
        if collapsed > 0 {
            StatsCounters::bump(&stats.collapsed);
            StatsCounters::add(&stats.missed, collapsed);
            log::info!("Render loop fell behind, collapsed {collapsed} missed ticks into tick {tick}");
        }

        let recycled = self.pool.drain_recycled();
        self.cache.invalidate(self.ctx.as_mut(), &recycled);

        let snapshot = shared
            .table
            .lock()
            .snapshot(now, shared.config.stale_frame_policy);
        if !snapshot.pruned.is_empty() {
            StatsCounters::add(&stats.pruned, snapshot.pruned.len() as u64);
            log::info!("Pruned dropped sources: {:?}", snapshot.pruned);
        }
        if !snapshot.expired.is_empty() {
            StatsCounters::add(&stats.stale_drops, snapshot.expired.len() as u64);
            log::debug!("Cleared {} stale slots", snapshot.expired.len());
        }
        drop(snapshot.expired);

        let report = match self.render(shared, &snapshot.items) {
            Ok(composite) => {
                StatsCounters::bump(&stats.composites);
                let metadata = Metadata {
                    pts,
                    dts: pts,
                    payload: Payload::Composite(CompositeMetadata {
                        width: composite.width(),
                        height: composite.height(),
                        format: composite.format(),
                        tick,
                        collapsed_ticks: collapsed,
                        sources: snapshot.items.len(),
                    }),
                };
                let emitted = shared.emit(composite, metadata);
                TickReport::Composited {
                    pts,
                    tick,
                    collapsed_ticks: collapsed,
                    sources: snapshot.items.len(),
                    emitted,
                }
            }
            Err(e) => {
                StatsCounters::bump(&stats.skipped);
                log::warn!("Skipping tick {tick}: {e}");
                TickReport::Skipped(e.to_string())
            }
        };

        let live: HashSet<FrameId> = snapshot.items.iter().map(|item| item.frame.id()).collect();
        self.cache.retain_live(self.ctx.as_mut(), &live);
        self.release_unassociated(&snapshot.filters);
        report
    }

    /// Draw `items` back to front and expose the result.
    fn render(&mut self, shared: &Shared, items: &[DrawItem]) -> Result<FrameBuffer, PassError> {
        let config = &shared.config;
        let target = self.double.target()?;
        let ctx = self.ctx.as_mut();
        ctx.begin_pass(config.width, config.height, config.pixel_format, config.clear_color)?;

        for item in items {
            let texture = self.cache.get_or_upload(ctx, &item.frame)?;

            let custom = match &item.filter {
                Some(handle) => {
                    self.known
                        .entry(handle.key())
                        .or_insert_with(|| handle.clone());
                    let mut filter = handle.lock();
                    if filter.bind(ctx, &item.transform) {
                        let drawn = ctx.draw_quad(texture);
                        filter.unbind();
                        Some(drawn)
                    } else {
                        None
                    }
                }
                None => None,
            };

            let drawn = if let Some(drawn) = custom {
                drawn
            } else if self.passthrough.bind(ctx, &item.transform) {
                let drawn = ctx.draw_quad(texture);
                self.passthrough.unbind();
                drawn
            } else {
                if !self.passthrough_warned {
                    log::error!("Passthrough filter unavailable, unfiltered sources are not drawn");
                    self.passthrough_warned = true;
                }
                Ok(())
            };
            drawn?;
        }

        let pixels = target.pixels_mut().ok_or(PassError::TargetBusy)?;
        ctx.end_pass(pixels)?;
        Ok(self.double.swap())
    }

    /// Release programs of filters no source refers to any more.
    fn release_unassociated(&mut self, associated: &[FilterHandle]) {
        if self.known.is_empty() {
            return;
        }
        let live: HashSet<usize> = associated.iter().map(FilterHandle::key).collect();
        let ctx = self.ctx.as_mut();
        self.known.retain(|key, handle| {
            if live.contains(key) {
                return true;
            }
            let mut filter = handle.lock();
            log::debug!("Releasing filter '{}'", filter.name());
            filter.release(ctx);
            false
        });
    }

    /// Final teardown on the owning thread.
    pub fn shutdown(&mut self, shared: &Shared) {
        shared.commands.close();
        let ran = shared.commands.drain(self.ctx.as_mut());
        if ran > 0 {
            log::debug!("Ran {ran} queued GPU commands at shutdown");
        }
        self.release_unassociated(&[]);
        self.passthrough.release(self.ctx.as_mut());
        self.cache.clear(self.ctx.as_mut());
    }
}
