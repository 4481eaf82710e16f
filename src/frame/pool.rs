//! Bounded pool of native frame buffers.
//!
//! The pool hands out [`FrameBuffer`]s of one fixed size. A buffer returns to
//! the pool automatically when its last handle is dropped, so the number of
//! buffers alive at once never exceeds the pool capacity no matter how many
//! consumers pass them around. Returned frame ids are recorded so GPU texture
//! bindings made for them can be invalidated.

use super::{FrameBuffer, FrameId, PixelFormat};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Recycled ids kept for cache invalidation before the oldest are discarded.
const RECYCLED_BACKLOG: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Frame pool exhausted ({capacity} buffers outstanding)")]
    Exhausted { capacity: usize },
    #[error("Invalid pool dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Frame pool capacity must be > 0")]
    ZeroCapacity,
}

/// Statistics about the current state of the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently held by someone.
    pub outstanding: usize,
    /// Buffers sitting idle, ready for reuse.
    pub available: usize,
    /// Hard maximum number of live buffers.
    pub capacity: usize,
    /// Total successful acquisitions since creation.
    pub acquired: u64,
    /// Acquisitions refused because the pool was exhausted.
    pub exhausted: u64,
}

struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
    recycled: VecDeque<FrameId>,
    acquired: u64,
    exhausted: u64,
}

pub(crate) struct PoolShared {
    width: u32,
    height: u32,
    format: PixelFormat,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl PoolShared {
    pub(crate) fn recycle(&self, id: FrameId, pixels: Vec<u8>) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if pixels.len() == self.byte_len() {
            state.free.push(pixels);
        }
        if state.recycled.len() == RECYCLED_BACKLOG {
            state.recycled.pop_front();
        }
        state.recycled.push_back(id);
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Shared handle to a bounded frame pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        capacity: usize,
    ) -> Result<Self, PoolError> {
        if width == 0 || height == 0 {
            return Err(PoolError::InvalidDimensions { width, height });
        }
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        Ok(Self {
            shared: Arc::new(PoolShared {
                width,
                height,
                format,
                capacity,
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(capacity),
                    outstanding: 0,
                    recycled: VecDeque::new(),
                    acquired: 0,
                    exhausted: 0,
                }),
            }),
        })
    }

    /// Take a buffer from the pool, allocating lazily up to capacity.
    ///
    /// Reused buffers keep their previous contents.
    pub fn acquire(&self) -> Result<FrameBuffer, PoolError> {
        let pixels = {
            let mut state = self.shared.state.lock();
            if state.outstanding >= self.shared.capacity {
                state.exhausted += 1;
                return Err(PoolError::Exhausted {
                    capacity: self.shared.capacity,
                });
            }
            state.outstanding += 1;
            state.acquired += 1;
            state.free.pop()
        };
        let pixels = pixels.unwrap_or_else(|| vec![0; self.shared.byte_len()]);
        Ok(FrameBuffer::wrap(
            self.shared.width,
            self.shared.height,
            self.shared.format,
            pixels,
            Some(Arc::downgrade(&self.shared)),
        ))
    }

    /// Ids of buffers returned since the last call.
    pub fn drain_recycled(&self) -> Vec<FrameId> {
        self.shared.state.lock().recycled.drain(..).collect()
    }

    pub fn width(&self) -> u32 {
        self.shared.width
    }

    pub fn height(&self) -> u32 {
        self.shared.height
    }

    pub fn format(&self) -> PixelFormat {
        self.shared.format
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            outstanding: state.outstanding,
            available: self.shared.capacity.saturating_sub(state.outstanding),
            capacity: self.shared.capacity,
            acquired: state.acquired,
            exhausted: state.exhausted,
        }
    }

    /// Whether `frame` has this pool's geometry.
    pub fn matches(&self, frame: &FrameBuffer) -> bool {
        frame.width() == self.shared.width
            && frame.height() == self.shared.height
            && frame.format() == self.shared.format
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("format", &self.shared.format)
            .field("capacity", &self.shared.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
