//! Render target / exposed buffer pair.

use super::{FrameBuffer, FramePool, PoolError};

/// Two output buffers: one is rendered into, the other is exposed downstream.
///
/// The render target is only ever handed out while uniquely owned. If the
/// consumer still holds the buffer that is due to become the target again,
/// it is left to the consumer and a replacement is drawn from the pool.
pub struct DoubleBuffer {
    buffers: [FrameBuffer; 2],
    active: usize,
    pool: FramePool,
}

impl DoubleBuffer {
    /// Take both buffers from `pool`. Fails when the pool cannot supply two.
    pub fn allocate(pool: &FramePool) -> Result<Self, PoolError> {
        let front = pool.acquire()?;
        let back = pool.acquire()?;
        Ok(Self {
            buffers: [front, back],
            active: 0,
            pool: pool.clone(),
        })
    }

    /// The buffer to render into, guaranteed not shared with anyone.
    pub fn target(&mut self) -> Result<&mut FrameBuffer, PoolError> {
        if !self.buffers[self.active].is_unique() {
            let fresh = self.pool.acquire()?;
            self.buffers[self.active] = fresh;
            log::debug!("Render target still retained downstream, replaced from pool");
        }
        Ok(&mut self.buffers[self.active])
    }

    /// Flip roles after a completed pass and return the newly exposed buffer.
    pub fn swap(&mut self) -> FrameBuffer {
        let finished = self.active;
        self.active ^= 1;
        self.buffers[finished].clone()
    }

}

impl std::fmt::Debug for DoubleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleBuffer")
            .field("active", &self.active)
            .finish()
    }
}
