//! Bindings of the quad shader.
//!
//! Group 0 carries everything one draw needs: the source transform for the
//! vertex stage, then the source texture and its sampler for the fragment
//! stage. Binding numbers match `shaders/quad.wgsl`.

use wgpu::{
    BindGroup, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer, Device, Sampler,
    ShaderStages, TextureView,
};

pub const TRANSFORM_BINDING: u32 = 0;
pub const SOURCE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;

pub fn quad_layout_entries() -> [BindGroupLayoutEntry; 3] {
    let entry = |binding, visibility, ty| BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    };
    [
        entry(
            TRANSFORM_BINDING,
            ShaderStages::VERTEX,
            BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(64),
            },
        ),
        entry(
            SOURCE_BINDING,
            ShaderStages::FRAGMENT,
            BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
        ),
        entry(
            SAMPLER_BINDING,
            ShaderStages::FRAGMENT,
            BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        ),
    ]
}

pub fn create_quad_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("framemix_quad_layout"),
        entries: &quad_layout_entries(),
    })
}

/// Bind group for drawing `source` with the transform held in `uniform`.
pub fn quad_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    uniform: &Buffer,
    source: &TextureView,
    sampler: &Sampler,
) -> BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("framemix_quad_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: TRANSFORM_BINDING,
                resource: uniform.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: SOURCE_BINDING,
                resource: wgpu::BindingResource::TextureView(source),
            },
            wgpu::BindGroupEntry {
                binding: SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}
