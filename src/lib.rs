//! Framemix Core
//!
//! Real-time compositor that mixes frames from many independent producers
//! into a single output stream at a fixed frame rate.
//!
//! # Features
//!
//! - Thread-safe source registration with per-source transform, layer and filter
//! - Pooled, reference-counted frame buffers that never tear while being read
//! - Fixed-cadence render thread with backlog collapse, pause and sync
//! - GPU compositing via wgpu, or a software rasterizer for headless use
//! - Named filter registry with grayscale, invert and sepia builtins

pub mod clock;
pub mod filters;
pub mod frame;
pub mod gpu;
pub mod io;
pub mod mixer;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use filters::{FilterError, FilterHandle, FilterRegistry, ShaderFilter, VideoFilter};
pub use frame::{
    FrameBuffer, FrameError, FramePool, Metadata, Payload, PixelFormat, VideoMetadata,
};
pub use gpu::{RenderContext, RenderError, SoftwareContext, WgpuContext};
pub use io::{ChannelOutput, Output, PixelBufferSource, Source, SourceId, SourceInput};
pub use mixer::{
    Mixer, MixerBuilder, MixerConfig, MixerError, MixerState, MixerStats, StaleFramePolicy,
    TickReport,
};
