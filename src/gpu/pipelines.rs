//! Quad render pipelines.
//!
//! Every filter program is the shared quad shader with the filter's
//! `filter_color` function appended. One module is built per program and one
//! pipeline per output format, so a program can render into either composite
//! layout without recompiling.

use super::textures::texture_format;
use crate::frame::PixelFormat;
use std::borrow::Cow;
use wgpu::{BindGroupLayout, Device, PipelineLayout, RenderPipeline, ShaderModule};

/// Vertex stage and fragment entry shared by every filter program.
pub const QUAD_SHADER: &str = include_str!("shaders/quad.wgsl");

const OUTPUT_FORMATS: [PixelFormat; 2] = [PixelFormat::Bgra8, PixelFormat::Rgba8];

/// Full WGSL module for a filter snippet.
pub fn compose_program(filter_wgsl: &str) -> String {
    format!("{QUAD_SHADER}\n// filter\n{filter_wgsl}\n")
}

/// Compiled filter program.
pub struct FilterPipelines {
    bgra: RenderPipeline,
    rgba: RenderPipeline,
}

impl FilterPipelines {
    /// Compile `filter_wgsl` against the quad shader.
    ///
    /// wgpu reports invalid WGSL through the device's error scopes, not here;
    /// callers wrap this in a validation scope.
    pub fn compile(
        device: &Device,
        layout: &PipelineLayout,
        label: &str,
        filter_wgsl: &str,
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(compose_program(filter_wgsl))),
        });
        let [bgra, rgba] =
            OUTPUT_FORMATS.map(|format| quad_pipeline(device, layout, label, &module, format));
        Self { bgra, rgba }
    }

    pub fn for_format(&self, format: PixelFormat) -> &RenderPipeline {
        match format {
            PixelFormat::Bgra8 => &self.bgra,
            PixelFormat::Rgba8 => &self.rgba,
        }
    }
}

/// Source-over blended quad into a `format` target.
fn quad_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    label: &str,
    module: &ShaderModule,
    format: PixelFormat,
) -> RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: texture_format(format),
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

pub fn create_pipeline_layout(
    device: &Device,
    label: &'static str,
    layouts: &[&BindGroupLayout],
) -> PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        immediate_size: 0,
    })
}
