//! Mixer configuration.

use crate::frame::PixelFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest pool that still fits the double-buffer pair.
pub const MIN_POOL_CAPACITY: usize = 2;

/// How long a slot's last frame keeps being drawn once its producer stalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "after")]
pub enum StaleFramePolicy {
    /// Keep drawing the last frame until a new one arrives.
    #[default]
    Repeat,
    /// Clear the slot once it has not been refreshed for this long.
    DropAfter(Duration),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Output dimensions must be non-zero, got {0}x{1}")]
    ZeroDimensions(u32, u32),
    #[error("Frame duration must be non-zero")]
    ZeroFrameDuration,
    #[error("Pool capacity {0} is below the minimum of {MIN_POOL_CAPACITY}")]
    PoolTooSmall(usize),
    #[error("Stale frame bound must be non-zero")]
    ZeroStaleBound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub width: u32,
    pub height: u32,
    /// Time between ticks (reciprocal of the output frame rate).
    pub frame_duration: Duration,
    pub pixel_format: PixelFormat,
    /// Output buffers available to the double buffer and its replacements.
    pub pool_capacity: usize,
    /// RGBA color each pass starts from.
    pub clear_color: [f32; 4],
    pub stale_frame_policy: StaleFramePolicy,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_duration: Duration::from_nanos(1_000_000_000 / 30),
            pixel_format: PixelFormat::Bgra8,
            pool_capacity: 4,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            stale_frame_policy: StaleFramePolicy::Repeat,
        }
    }
}

impl MixerConfig {
    pub fn new(width: u32, height: u32, frame_duration: Duration) -> Self {
        Self {
            width,
            height,
            frame_duration,
            ..Default::default()
        }
    }

    /// Config for `fps` frames per second. A zero rate yields a zero frame
    /// duration, which [`validate`](Self::validate) rejects.
    pub fn with_fps(width: u32, height: u32, fps: u32) -> Self {
        let frame_duration = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(1_000_000_000 / u64::from(fps))
        };
        Self::new(width, height, frame_duration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroDimensions(self.width, self.height));
        }
        if self.frame_duration.is_zero() {
            return Err(ConfigError::ZeroFrameDuration);
        }
        if self.pool_capacity < MIN_POOL_CAPACITY {
            return Err(ConfigError::PoolTooSmall(self.pool_capacity));
        }
        if self.stale_frame_policy == StaleFramePolicy::DropAfter(Duration::ZERO) {
            return Err(ConfigError::ZeroStaleBound);
        }
        Ok(())
    }

    pub fn fps(&self) -> f64 {
        1.0 / self.frame_duration.as_secs_f64()
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
