//! Producer and consumer contracts.
//!
//! A [`Source`] is anything that produces frames on its own thread. Once it
//! has been given an [`Output`] it pushes every new frame into it. The mixer
//! is itself a source of composites and forwards each one to its output.

pub mod pixel_source;

pub use pixel_source::{PixelBufferSource, PixelSourceError};

use crate::frame::{FrameBuffer, Metadata};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Stable identity issued to a source at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Consumer of frames.
///
/// Implementations must accept concurrent calls from several producers and
/// serialize internally. Callers treat the call as fire-and-forget.
pub trait Output: Send + Sync {
    fn push_buffer(&self, frame: FrameBuffer, metadata: Metadata);
}

/// Producer of frames.
pub trait Source: Send + Sync {
    /// Connect the source to the consumer it should push into.
    fn set_output(&self, output: Arc<dyn Output>);
}

/// Where a [`SourceInput`] delivers frames.
pub(crate) trait FrameSink: Send + Sync {
    fn accept(&self, id: SourceId, frame: FrameBuffer, metadata: Metadata);
}

/// Per-source input port handed to a registered source.
///
/// Frames pushed here are attributed to the source it was created for, so
/// producers never have to carry their own id. Holds the mixer weakly: once
/// the mixer is gone, pushes are dropped.
#[derive(Clone)]
pub struct SourceInput {
    id: SourceId,
    sink: Weak<dyn FrameSink>,
}

impl SourceInput {
    pub(crate) fn new(id: SourceId, sink: Weak<dyn FrameSink>) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Whether the mixer behind this port still exists.
    pub fn is_connected(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

impl Output for SourceInput {
    fn push_buffer(&self, frame: FrameBuffer, metadata: Metadata) {
        if let Some(sink) = self.sink.upgrade() {
            sink.accept(self.id, frame, metadata);
        }
    }
}

impl fmt::Debug for SourceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceInput")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Output that forwards frames into a bounded channel.
///
/// When the receiver falls behind, new frames are dropped rather than
/// blocking the pusher.
pub struct ChannelOutput {
    tx: Sender<(FrameBuffer, Metadata)>,
    dropped: AtomicU64,
}

impl ChannelOutput {
    pub fn bounded(capacity: usize) -> (Arc<Self>, Receiver<(FrameBuffer, Metadata)>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let output = Arc::new(Self {
            tx,
            dropped: AtomicU64::new(0),
        });
        (output, rx)
    }

    /// Frames discarded because the channel was full or disconnected.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Output for ChannelOutput {
    fn push_buffer(&self, frame: FrameBuffer, metadata: Metadata) {
        match self.tx.try_send((frame, metadata)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
