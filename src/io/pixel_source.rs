//! Source fed with raw pixel bytes.

use super::{Output, Source};
use crate::frame::{FrameBuffer, FrameError, FramePool, Metadata, PixelFormat, PoolError, VideoMetadata};
use glam::Mat4;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PixelSourceError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Default, Clone, Copy)]
struct Placement {
    z_index: Option<i32>,
    transform: Option<Mat4>,
}

/// Copies caller-owned pixel bytes into frame buffers and pushes them.
///
/// Layer and transform set here travel in the metadata of every pushed
/// frame from then on, so a frame the consumer rejects loses nothing.
pub struct PixelBufferSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    pool: Option<FramePool>,
    output: Mutex<Option<Arc<dyn Output>>>,
    placement: Mutex<Placement>,
}

impl PixelBufferSource {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            pool: None,
            output: Mutex::new(None),
            placement: Mutex::new(Placement::default()),
        }
    }

    /// Draw frames from `pool` instead of allocating. The pool must have
    /// this source's geometry; otherwise it is ignored.
    pub fn with_pool(mut self, pool: FramePool) -> Self {
        if pool.width() == self.width && pool.height() == self.height && pool.format() == self.format {
            self.pool = Some(pool);
        } else {
            log::warn!(
                "Pool {}x{} does not match pixel source {}x{}, allocating per frame",
                pool.width(),
                pool.height(),
                self.width,
                self.height
            );
        }
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Byte length every pushed buffer must have.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn set_layer(&self, z_index: i32) {
        self.placement.lock().z_index = Some(z_index);
    }

    pub fn set_transform(&self, transform: Mat4) {
        self.placement.lock().transform = Some(transform);
    }

    pub fn is_connected(&self) -> bool {
        self.output.lock().is_some()
    }

    /// Copy `pixels` into a frame and push it.
    ///
    /// Returns `Ok(false)` when no output has been connected yet.
    pub fn push_pixels(&self, pixels: &[u8], pts: Duration) -> Result<bool, PixelSourceError> {
        let Some(output) = self.output.lock().clone() else {
            return Ok(false);
        };

        let frame = self.copy_in(pixels)?;
        let placement = *self.placement.lock();
        let metadata = Metadata::video(
            pts,
            VideoMetadata {
                source: None,
                z_index: placement.z_index,
                transform: placement.transform,
                width: self.width,
                height: self.height,
            },
        );
        output.push_buffer(frame, metadata);
        Ok(true)
    }

    fn copy_in(&self, pixels: &[u8]) -> Result<FrameBuffer, PixelSourceError> {
        let expected = self.frame_size();
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                width: self.width,
                height: self.height,
                format: self.format,
                expected,
                got: pixels.len(),
            }
            .into());
        }

        match &self.pool {
            Some(pool) => {
                let mut frame = pool.acquire()?;
                if let Some(dst) = frame.pixels_mut() {
                    dst.copy_from_slice(pixels);
                }
                Ok(frame)
            }
            None => Ok(FrameBuffer::from_vec(
                self.width,
                self.height,
                self.format,
                pixels.to_vec(),
            )?),
        }
    }
}

impl Source for PixelBufferSource {
    fn set_output(&self, output: Arc<dyn Output>) {
        *self.output.lock() = Some(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        frames: Mutex<Vec<(FrameBuffer, Metadata)>>,
    }

    impl Output for Capture {
        fn push_buffer(&self, frame: FrameBuffer, metadata: Metadata) {
            self.frames.lock().push((frame, metadata));
        }
    }

    #[test]
    fn test_push_without_output() {
        let source = PixelBufferSource::new(2, 2, PixelFormat::Bgra8);
        assert!(!source.push_pixels(&[0; 16], Duration::ZERO).unwrap());
    }

    #[test]
    fn test_push_validates_length() {
        let source = PixelBufferSource::new(2, 2, PixelFormat::Bgra8);
        source.set_output(Arc::new(Capture::default()));
        let err = source.push_pixels(&[0; 15], Duration::ZERO).unwrap_err();
        assert!(matches!(err, PixelSourceError::Frame(FrameError::LengthMismatch { .. })));
    }

    #[test]
    fn test_layer_travels_with_every_frame() {
        let capture = Arc::new(Capture::default());
        let source = PixelBufferSource::new(1, 1, PixelFormat::Rgba8);
        source.set_output(capture.clone());

        source.push_pixels(&[1, 2, 3, 4], Duration::ZERO).unwrap();
        source.set_layer(3);
        source.push_pixels(&[1, 2, 3, 4], Duration::from_millis(1)).unwrap();
        // Consumer discards that frame; the next one still carries the layer.
        capture.frames.lock().pop();
        source.push_pixels(&[1, 2, 3, 4], Duration::from_millis(2)).unwrap();

        let frames = capture.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.pixels(), &[1, 2, 3, 4]);
        assert_eq!(frames[0].1.as_video().unwrap().z_index, None);
        assert_eq!(frames[1].1.as_video().unwrap().z_index, Some(3));
        assert_eq!(frames[1].1.pts, Duration::from_millis(2));
    }

    #[test]
    fn test_pool_backed_frames() {
        let pool = FramePool::new(1, 1, PixelFormat::Rgba8, 1).unwrap();
        let capture = Arc::new(Capture::default());
        let source = PixelBufferSource::new(1, 1, PixelFormat::Rgba8).with_pool(pool.clone());
        source.set_output(capture.clone());

        source.push_pixels(&[9; 4], Duration::ZERO).unwrap();
        assert_eq!(pool.outstanding(), 1);
        assert!(matches!(
            source.push_pixels(&[9; 4], Duration::ZERO),
            Err(PixelSourceError::Pool(PoolError::Exhausted { .. }))
        ));

        capture.frames.lock().clear();
        assert_eq!(pool.outstanding(), 0);
    }
}
