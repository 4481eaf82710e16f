//! Tagged metadata attached to every buffer in flight.

use super::PixelFormat;
use crate::io::SourceId;
use glam::Mat4;
use std::time::Duration;

/// Discriminates the payload shape without inspecting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataTag {
    /// Frame produced by a video source.
    Video,
    /// Frame produced by the compositor.
    Composite,
    /// Timestamps only.
    Empty,
}

impl MetadataTag {
    /// Four-character code identifying the tag on the wire.
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Composite => *b"cmps",
            Self::Empty => *b"none",
        }
    }
}

/// Fields a video source may attach to a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    /// Producer identity, needed when pushing straight into the mixer.
    pub source: Option<SourceId>,
    /// Move the source to this layer.
    pub z_index: Option<i32>,
    /// Replace the source's transform.
    pub transform: Option<Mat4>,
    pub width: u32,
    pub height: u32,
}

/// Fields the compositor attaches to an emitted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeMetadata {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Zero-based index of the tick that produced this frame.
    pub tick: u64,
    /// Ticks folded into this one by catch-up (0 when on schedule).
    pub collapsed_ticks: u64,
    /// Number of sources drawn.
    pub sources: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    Video(VideoMetadata),
    Composite(CompositeMetadata),
    #[default]
    None,
}

/// Presentation and decode timestamps plus a stage-specific payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub pts: Duration,
    pub dts: Duration,
    pub payload: Payload,
}

impl Metadata {
    /// Metadata with pts == dts and no payload.
    pub fn at(pts: Duration) -> Self {
        Self {
            pts,
            dts: pts,
            payload: Payload::None,
        }
    }

    pub fn video(pts: Duration, video: VideoMetadata) -> Self {
        Self {
            pts,
            dts: pts,
            payload: Payload::Video(video),
        }
    }

    pub fn tag(&self) -> MetadataTag {
        match self.payload {
            Payload::Video(_) => MetadataTag::Video,
            Payload::Composite(_) => MetadataTag::Composite,
            Payload::None => MetadataTag::Empty,
        }
    }

    pub fn as_video(&self) -> Option<&VideoMetadata> {
        match &self.payload {
            Payload::Video(video) => Some(video),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeMetadata> {
        match &self.payload {
            Payload::Composite(composite) => Some(composite),
            _ => None,
        }
    }
}
