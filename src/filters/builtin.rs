//! Builtin filters.

use super::registry::FilterFactory;
use super::{ShaderFilter, VideoFilter};
use crate::gpu::ShaderSource;

pub const PASSTHROUGH: &str = "framemix.filters.passthrough";
pub const GRAYSCALE: &str = "framemix.filters.grayscale";
pub const INVERT: &str = "framemix.filters.invert";
pub const SEPIA: &str = "framemix.filters.sepia";

/// Every builtin, in registration order.
pub const BUILTIN_FILTERS: &[(&str, FilterFactory)] = &[
    (PASSTHROUGH, passthrough),
    (GRAYSCALE, grayscale),
    (INVERT, invert),
    (SEPIA, sepia),
];

const PASSTHROUGH_WGSL: &str = r#"
fn filter_color(color: vec4<f32>) -> vec4<f32> {
    return color;
}
"#;

const GRAYSCALE_WGSL: &str = r#"
fn filter_color(color: vec4<f32>) -> vec4<f32> {
    let luma = dot(color.rgb, vec3<f32>(0.299, 0.587, 0.114));
    return vec4<f32>(luma, luma, luma, color.a);
}
"#;

const INVERT_WGSL: &str = r#"
fn filter_color(color: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(vec3<f32>(1.0) - color.rgb, color.a);
}
"#;

const SEPIA_WGSL: &str = r#"
fn filter_color(color: vec4<f32>) -> vec4<f32> {
    let r = dot(color.rgb, vec3<f32>(0.393, 0.769, 0.189));
    let g = dot(color.rgb, vec3<f32>(0.349, 0.686, 0.168));
    let b = dot(color.rgb, vec3<f32>(0.272, 0.534, 0.131));
    return vec4<f32>(min(vec3<f32>(r, g, b), vec3<f32>(1.0)), color.a);
}
"#;

fn identity_kernel(c: [f32; 4]) -> [f32; 4] {
    c
}

fn grayscale_kernel(c: [f32; 4]) -> [f32; 4] {
    let luma = 0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2];
    [luma, luma, luma, c[3]]
}

fn invert_kernel(c: [f32; 4]) -> [f32; 4] {
    [1.0 - c[0], 1.0 - c[1], 1.0 - c[2], c[3]]
}

fn sepia_kernel(c: [f32; 4]) -> [f32; 4] {
    let [r, g, b, a] = c;
    [
        (0.393 * r + 0.769 * g + 0.189 * b).min(1.0),
        (0.349 * r + 0.686 * g + 0.168 * b).min(1.0),
        (0.272 * r + 0.534 * g + 0.131 * b).min(1.0),
        a,
    ]
}

/// Samples the source unchanged. Used for sources without a filter.
pub fn passthrough() -> Box<dyn VideoFilter> {
    Box::new(ShaderFilter::new(
        PASSTHROUGH,
        ShaderSource::new(PASSTHROUGH, PASSTHROUGH_WGSL, identity_kernel),
    ))
}

pub fn grayscale() -> Box<dyn VideoFilter> {
    Box::new(ShaderFilter::new(
        GRAYSCALE,
        ShaderSource::new(GRAYSCALE, GRAYSCALE_WGSL, grayscale_kernel),
    ))
}

pub fn invert() -> Box<dyn VideoFilter> {
    Box::new(ShaderFilter::new(
        INVERT,
        ShaderSource::new(INVERT, INVERT_WGSL, invert_kernel),
    ))
}

pub fn sepia() -> Box<dyn VideoFilter> {
    Box::new(ShaderFilter::new(
        SEPIA,
        ShaderSource::new(SEPIA, SEPIA_WGSL, sepia_kernel),
    ))
}
