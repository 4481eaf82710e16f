//! GPU textures for source frames, the composite target and readback.

use super::RenderError;
use crate::frame::{FrameBuffer, PixelFormat};
use wgpu::{Device, Queue, Texture, TextureFormat, TextureUsages, TextureView};

/// Linear texture format holding frames of `format`.
pub fn texture_format(format: PixelFormat) -> TextureFormat {
    match format {
        PixelFormat::Bgra8 => TextureFormat::Bgra8Unorm,
        PixelFormat::Rgba8 => TextureFormat::Rgba8Unorm,
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// A texture kept together with its default view.
pub struct FrameTexture {
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FrameTexture {
    pub fn new(
        device: &Device,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    /// Composite target: rendered into, then copied out for readback.
    pub fn for_composite(device: &Device, width: u32, height: u32, format: PixelFormat) -> Self {
        Self::new(
            device,
            "framemix_composite",
            width,
            height,
            format,
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
        )
    }

    /// Sampled texture holding a copy of `frame`.
    pub fn from_frame(device: &Device, queue: &Queue, frame: &FrameBuffer) -> Self {
        let target = Self::new(
            device,
            "framemix_source",
            frame.width(),
            frame.height(),
            frame.format(),
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        );
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.pixels(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride() as u32),
                rows_per_image: Some(frame.height()),
            },
            extent(frame.width(), frame.height()),
        );
        target
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Whether this target can be reused for a pass of the given geometry.
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }
}

/// Staging buffer for copying a texture back to the CPU.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row_bytes: u32,
    unpadded_row_bytes: u32,
}

impl ReadbackBuffer {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let bytes_per_pixel = 4u32;
        let unpadded_row_bytes = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framemix_readback"),
            size: (padded_row_bytes * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            width,
            height,
            padded_row_bytes,
            unpadded_row_bytes,
        }
    }

    pub fn padded_row_bytes(&self) -> u32 {
        self.padded_row_bytes
    }

    /// Record a copy of `target` into this buffer.
    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, target: &FrameTexture) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: target.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
    }

    /// Map the buffer and copy its rows, without padding, into `out`.
    pub fn read_into(&self, device: &Device, out: &mut [u8]) -> Result<(), RenderError> {
        let expected = (self.unpadded_row_bytes * self.height) as usize;
        if out.len() != expected {
            return Err(RenderError::Readback(format!(
                "target holds {} bytes, readback has {expected}",
                out.len()
            )));
        }

        let slice = self.buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        {
            let data = slice.get_mapped_range();
            let row = self.unpadded_row_bytes as usize;
            for (y, dst) in out.chunks_exact_mut(row).enumerate() {
                let start = y * self.padded_row_bytes as usize;
                dst.copy_from_slice(&data[start..start + row]);
            }
        }
        self.buffer.unmap();
        Ok(())
    }
}
