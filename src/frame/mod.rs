//! Native frame buffers flowing between sources, the mixer and outputs.
//!
//! A [`FrameBuffer`] is a cheaply clonable, reference-counted handle to pixel
//! storage. Clones share storage; the pixels can only be written through
//! [`FrameBuffer::pixels_mut`] while the handle is the sole owner, so a frame
//! that has been handed to anyone else can never be modified underneath them.

pub mod double_buffer;
pub mod metadata;
pub mod pool;

pub use double_buffer::DoubleBuffer;
pub use metadata::{CompositeMetadata, Metadata, MetadataTag, Payload, VideoMetadata};
pub use pool::{FramePool, PoolError, PoolStats};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Errors raised when building or exporting frame buffers.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Buffer length {got} does not match {width}x{height} {format:?} ({expected} bytes)")]
    LengthMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        got: usize,
    },
    #[error("Frame dimensions must be non-zero, got {0}x{1}")]
    ZeroDimensions(u32, u32),
    #[error("Image export failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Pixel layouts understood by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit blue, green, red, alpha (the usual camera/encoder layout).
    #[default]
    Bgra8,
    /// 8-bit red, green, blue, alpha.
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Decode one texel into normalized RGBA.
    #[inline]
    pub fn decode(self, px: &[u8]) -> [f32; 4] {
        let (r, g, b, a) = match self {
            Self::Bgra8 => (px[2], px[1], px[0], px[3]),
            Self::Rgba8 => (px[0], px[1], px[2], px[3]),
        };
        [
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        ]
    }

    /// Encode normalized RGBA into one texel.
    #[inline]
    pub fn encode(self, rgba: [f32; 4], out: &mut [u8]) {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let [r, g, b, a] = rgba.map(q);
        match self {
            Self::Bgra8 => out[..4].copy_from_slice(&[b, g, r, a]),
            Self::Rgba8 => out[..4].copy_from_slice(&[r, g, b, a]),
        }
    }
}

/// Identity of a frame's contents.
///
/// Every new frame, and every frame whose pixels were handed out for writing,
/// gets a fresh id, so caches keyed by it never see stale pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Storage shared by all clones of a [`FrameBuffer`].
struct FrameData {
    id: FrameId,
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
    home: Option<Weak<pool::PoolShared>>,
}

impl Drop for FrameData {
    fn drop(&mut self) {
        // Last reference gone: give the storage back to the pool it came from.
        if let Some(pool) = self.home.take().and_then(|weak| weak.upgrade()) {
            pool.recycle(self.id, std::mem::take(&mut self.pixels));
        }
    }
}

/// Reference-counted native image buffer.
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<FrameData>,
}

impl FrameBuffer {
    /// Allocate a zeroed (transparent black) frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
        let len = byte_len(width, height, format)?;
        Ok(Self::wrap(width, height, format, vec![0; len], None))
    }

    /// Wrap existing pixel bytes. The length must match the dimensions exactly.
    pub fn from_vec(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = byte_len(width, height, format)?;
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                width,
                height,
                format,
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self::wrap(width, height, format, pixels, None))
    }

    /// A frame where every pixel has the given normalized RGBA color.
    pub fn filled(
        width: u32,
        height: u32,
        format: PixelFormat,
        rgba: [f32; 4],
    ) -> Result<Self, FrameError> {
        let mut frame = Self::new(width, height, format)?;
        if let Some(pixels) = frame.pixels_mut() {
            for px in pixels.chunks_exact_mut(4) {
                format.encode(rgba, px);
            }
        }
        Ok(frame)
    }

    pub(crate) fn wrap(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
        home: Option<Weak<pool::PoolShared>>,
    ) -> Self {
        Self {
            inner: Arc::new(FrameData {
                id: FrameId::next(),
                width,
                height,
                format,
                pixels,
                home,
            }),
        }
    }

    pub fn id(&self) -> FrameId {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.inner.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.inner.pixels.len()
    }

    /// Row stride in bytes (frames are tightly packed).
    pub fn stride(&self) -> usize {
        self.inner.width as usize * self.inner.format.bytes_per_pixel()
    }

    /// Number of live handles sharing this frame's storage.
    pub fn retain_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True when no other handle shares this frame.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Whether the storage came from a [`FramePool`].
    pub fn is_pooled(&self) -> bool {
        self.inner.home.is_some()
    }

    /// Writable pixels, available only while this handle is the sole owner.
    ///
    /// Granting write access assigns a new [`FrameId`].
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        let data = Arc::get_mut(&mut self.inner)?;
        data.id = FrameId::next();
        Some(data.pixels.as_mut_slice())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read one pixel as normalized RGBA.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * 4;
        Some(self.format().decode(&self.pixels()[offset..offset + 4]))
    }

    /// Convert to an RGBA image (copies).
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let mut rgba = Vec::with_capacity(self.byte_len());
        match self.format() {
            PixelFormat::Rgba8 => rgba.extend_from_slice(self.pixels()),
            PixelFormat::Bgra8 => {
                for px in self.pixels().chunks_exact(4) {
                    rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            }
        }
        // Length always matches width * height * 4.
        image::RgbaImage::from_raw(self.width(), self.height(), rgba)
            .unwrap_or_else(|| image::RgbaImage::new(self.width(), self.height()))
    }

    /// Write the frame to disk as a PNG.
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), FrameError> {
        self.to_rgba_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("retain_count", &self.retain_count())
            .finish()
    }
}

/// Byte length of a tightly packed frame.
pub fn byte_len(width: u32, height: u32, format: PixelFormat) -> Result<usize, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroDimensions(width, height));
    }
    Ok(width as usize * height as usize * format.bytes_per_pixel())
}
