//! Render context abstraction and its backends.
//!
//! The compositor only talks to a [`RenderContext`]: it compiles programs,
//! uploads frames as textures and draws transformed quads into an offscreen
//! target that is finally read back into a frame buffer. Two backends exist:
//! a wgpu one for real GPUs and a CPU rasterizer that produces identical
//! results for tests and headless machines.
//!
//! Quad geometry is the unit square in normalized device coordinates,
//! `[-1, 1]` on both axes with +y up. A source transform maps that square onto
//! the output, so the identity transform covers the whole frame.

pub mod commands;
pub mod context;
pub mod layouts;
pub mod pipelines;
pub mod software;
pub mod texture_cache;
pub mod textures;
pub mod wgpu_backend;

pub use commands::{CommandQueue, GpuCommand};
pub use context::{GpuContext, GpuError, GpuOptions};
pub use software::SoftwareContext;
pub use texture_cache::TextureCache;
pub use wgpu_backend::WgpuContext;

use crate::frame::{FrameBuffer, PixelFormat};
use glam::Mat4;
use std::fmt;

/// Errors raised by a render context.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Program '{label}' failed to compile: {message}")]
    Compile { label: String, message: String },
    #[error("Allocation failed: {0}")]
    Allocation(String),
    #[error("No render pass in progress")]
    NoActivePass,
    #[error("No program bound for draw")]
    NoProgramBound,
    #[error("Unknown program {0:?}")]
    UnknownProgram(ProgramId),
    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("Readback failed: {0}")]
    Readback(String),
    #[error("Device error: {0}")]
    Device(String),
}

/// CPU implementation of a filter's color function.
pub type PixelKernel = fn([f32; 4]) -> [f32; 4];

/// A filter program.
///
/// `wgsl` is a fragment snippet defining
/// `fn filter_color(color: vec4<f32>) -> vec4<f32>`, spliced into the shared
/// quad shader. `cpu` is the same function for the software backend; a
/// program without one cannot be compiled there.
#[derive(Clone)]
pub struct ShaderSource {
    pub label: String,
    pub wgsl: String,
    pub cpu: Option<PixelKernel>,
}

impl ShaderSource {
    pub fn new(label: impl Into<String>, wgsl: impl Into<String>, cpu: PixelKernel) -> Self {
        Self {
            label: label.into(),
            wgsl: wgsl.into(),
            cpu: Some(cpu),
        }
    }

    /// Program with GPU code only.
    pub fn wgsl_only(label: impl Into<String>, wgsl: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            wgsl: wgsl.into(),
            cpu: None,
        }
    }
}

impl fmt::Debug for ShaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderSource")
            .field("label", &self.label)
            .field("has_cpu_kernel", &self.cpu.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Software,
    Wgpu,
}

/// Description of a live render context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub backend: BackendKind,
    /// Adapter or implementation name.
    pub name: String,
    /// Opaque process-unique handle identifying this context.
    pub handle: u64,
}

/// Platform adapter owning GPU state. Used from one thread at a time.
pub trait RenderContext: Send {
    fn info(&self) -> ContextInfo;

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramId, RenderError>;

    fn delete_program(&mut self, program: ProgramId);

    /// Make `frame`'s pixels available for sampling.
    fn upload_texture(&mut self, frame: &FrameBuffer) -> Result<TextureId, RenderError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Start a pass into an offscreen target cleared to `clear` (RGBA).
    fn begin_pass(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        clear: [f32; 4],
    ) -> Result<(), RenderError>;

    /// Select the program and transform for following draws.
    fn use_program(&mut self, program: ProgramId, transform: &Mat4) -> Result<(), RenderError>;

    /// Draw the unit quad sampling `texture`, blended source-over.
    fn draw_quad(&mut self, texture: TextureId) -> Result<(), RenderError>;

    /// Finish the pass and write the result into `target`.
    fn end_pass(&mut self, target: &mut [u8]) -> Result<(), RenderError>;
}

pub(crate) fn next_context_handle() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
