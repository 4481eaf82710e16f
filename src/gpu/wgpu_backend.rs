//! wgpu render context.
//!
//! Draws are recorded during a pass and encoded into a single render pass at
//! [`end_pass`](RenderContext::end_pass), followed by a copy of the target
//! into a readback buffer.

use super::context::{GpuContext, GpuError};
use super::layouts::{create_quad_layout, quad_bind_group};
use super::pipelines::{create_pipeline_layout, FilterPipelines};
use super::textures::{FrameTexture, ReadbackBuffer};
use super::{
    next_context_handle, BackendKind, ContextInfo, ProgramId, RenderContext, RenderError,
    ShaderSource, TextureId,
};
use crate::frame::{FrameBuffer, PixelFormat};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuadUniform {
    transform: [f32; 16],
}

struct Draw {
    program: ProgramId,
    bind_group: wgpu::BindGroup,
}

struct PendingPass {
    width: u32,
    height: u32,
    format: PixelFormat,
    clear: [f32; 4],
    current: Option<(ProgramId, Mat4)>,
    draws: Vec<Draw>,
}

pub struct WgpuContext {
    gpu: GpuContext,
    handle: u64,
    next_id: u64,
    bind_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    programs: HashMap<ProgramId, FilterPipelines>,
    textures: HashMap<TextureId, FrameTexture>,
    target: Option<(FrameTexture, ReadbackBuffer)>,
    pass: Option<PendingPass>,
}

impl WgpuContext {
    pub fn new(gpu: GpuContext) -> Self {
        let bind_layout = create_quad_layout(&gpu.device);
        let pipeline_layout =
            create_pipeline_layout(&gpu.device, "framemix_quad_pipeline_layout", &[&bind_layout]);
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("framemix_nearest"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu,
            handle: next_context_handle(),
            next_id: 1,
            bind_layout,
            pipeline_layout,
            sampler,
            programs: HashMap::new(),
            textures: HashMap::new(),
            target: None,
            pass: None,
        }
    }

    /// Acquire a device and build a context on it.
    pub fn create() -> Result<Self, GpuError> {
        Ok(Self::new(GpuContext::new_blocking()?))
    }

    fn issue(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_target(&mut self, width: u32, height: u32, format: PixelFormat) {
        let reusable = matches!(&self.target, Some((t, _)) if t.matches(width, height, format));
        if !reusable {
            let device = &self.gpu.device;
            self.target = Some((
                FrameTexture::for_composite(device, width, height, format),
                ReadbackBuffer::new(device, width, height),
            ));
        }
    }
}

impl RenderContext for WgpuContext {
    fn info(&self) -> ContextInfo {
        ContextInfo {
            backend: BackendKind::Wgpu,
            name: self.gpu.adapter_info().name.clone(),
            handle: self.handle,
        }
    }

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramId, RenderError> {
        let device = self.gpu.device.clone();
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);

        let pipelines =
            FilterPipelines::compile(&device, &self.pipeline_layout, &source.label, &source.wgsl);

        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(RenderError::Compile {
                label: source.label.clone(),
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.issue());
        self.programs.insert(id, pipelines);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn upload_texture(&mut self, frame: &FrameBuffer) -> Result<TextureId, RenderError> {
        let scope = self.gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = FrameTexture::from_frame(&self.gpu.device, &self.gpu.queue, frame);
        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(RenderError::Allocation(error.to_string()));
        }

        let id = TextureId(self.issue());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn begin_pass(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        clear: [f32; 4],
    ) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Allocation(format!(
                "zero-sized target {width}x{height}"
            )));
        }
        self.pass = Some(PendingPass {
            width,
            height,
            format,
            clear,
            current: None,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn use_program(&mut self, program: ProgramId, transform: &Mat4) -> Result<(), RenderError> {
        if !self.programs.contains_key(&program) {
            return Err(RenderError::UnknownProgram(program));
        }
        let pass = self.pass.as_mut().ok_or(RenderError::NoActivePass)?;
        pass.current = Some((program, *transform));
        Ok(())
    }

    fn draw_quad(&mut self, texture: TextureId) -> Result<(), RenderError> {
        let pass = self.pass.as_mut().ok_or(RenderError::NoActivePass)?;
        let (program, transform) = pass.current.ok_or(RenderError::NoProgramBound)?;
        let source = self
            .textures
            .get(&texture)
            .ok_or(RenderError::UnknownTexture(texture))?;

        let device = &self.gpu.device;
        let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("framemix_quad_uniform"),
            contents: bytemuck::bytes_of(&QuadUniform {
                transform: transform.to_cols_array(),
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group =
            quad_bind_group(device, &self.bind_layout, &uniform, source.view(), &self.sampler);
        pass.draws.push(Draw {
            program,
            bind_group,
        });
        Ok(())
    }

    fn end_pass(&mut self, target: &mut [u8]) -> Result<(), RenderError> {
        let pass = self.pass.take().ok_or(RenderError::NoActivePass)?;
        let device = self.gpu.device.clone();
        let queue = self.gpu.queue.clone();
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);

        self.ensure_target(pass.width, pass.height, pass.format);
        let Some((composite, readback)) = self.target.as_ref() else {
            return Err(RenderError::Allocation("composite target missing".to_string()));
        };
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("framemix_composite_encoder"),
        });
        {
            let [r, g, b, a] = pass.clear.map(f64::from);
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("framemix_composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: composite.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for draw in &pass.draws {
                let Some(program) = self.programs.get(&draw.program) else {
                    continue;
                };
                render_pass.set_pipeline(program.for_format(pass.format));
                render_pass.set_bind_group(0, &draw.bind_group, &[]);
                render_pass.draw(0..6, 0..1);
            }
        }
        readback.copy_from(&mut encoder, composite);
        queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(RenderError::Device(error.to_string()));
        }
        readback.read_into(&device, target)
    }
}
