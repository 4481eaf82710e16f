//! Frame → texture bindings.
//!
//! A source that does not push a new frame between ticks is drawn again from
//! the texture uploaded for it last time. Entries are keyed by [`FrameId`],
//! which changes whenever a frame's pixels may have changed, so a hit is
//! always current.

use super::{RenderContext, RenderError, TextureId};
use crate::frame::{FrameBuffer, FrameId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct TextureCache {
    entries: HashMap<FrameId, TextureId>,
    hits: u64,
    uploads: u64,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_upload(
        &mut self,
        ctx: &mut dyn RenderContext,
        frame: &FrameBuffer,
    ) -> Result<TextureId, RenderError> {
        if let Some(texture) = self.entries.get(&frame.id()) {
            self.hits += 1;
            return Ok(*texture);
        }
        let texture = ctx.upload_texture(frame)?;
        self.entries.insert(frame.id(), texture);
        self.uploads += 1;
        Ok(texture)
    }

    /// Drop bindings for frames that went back to their pool.
    pub fn invalidate(&mut self, ctx: &mut dyn RenderContext, ids: &[FrameId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(texture) = self.entries.remove(id) {
                ctx.delete_texture(texture);
                removed += 1;
            }
        }
        removed
    }

    /// Drop every binding whose frame is not in `live`.
    pub fn retain_live(&mut self, ctx: &mut dyn RenderContext, live: &HashSet<FrameId>) {
        self.entries.retain(|id, texture| {
            let keep = live.contains(id);
            if !keep {
                ctx.delete_texture(*texture);
            }
            keep
        });
    }

    pub fn clear(&mut self, ctx: &mut dyn RenderContext) {
        for (_, texture) in self.entries.drain() {
            ctx.delete_texture(texture);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}
