//! CPU reference rasterizer.
//!
//! Nearest-neighbour sampling, pixel-centre coverage and source-over blending
//! matching the wgpu pipeline's `ALPHA_BLENDING` state.

use super::{
    next_context_handle, BackendKind, ContextInfo, PixelKernel, ProgramId, RenderContext,
    RenderError, ShaderSource, TextureId,
};
use crate::frame::{FrameBuffer, PixelFormat};
use glam::{Mat4, Vec3};
use std::collections::HashMap;

struct Texture {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

struct Pass {
    width: u32,
    height: u32,
    format: PixelFormat,
    accum: Vec<[f32; 4]>,
    program: Option<(PixelKernel, Mat4)>,
    draws: usize,
}

pub struct SoftwareContext {
    handle: u64,
    next_id: u64,
    programs: HashMap<ProgramId, PixelKernel>,
    textures: HashMap<TextureId, Texture>,
    pass: Option<Pass>,
    last_pass_draws: usize,
}

impl SoftwareContext {
    pub fn new() -> Self {
        Self {
            handle: next_context_handle(),
            next_id: 1,
            programs: HashMap::new(),
            textures: HashMap::new(),
            pass: None,
            last_pass_draws: 0,
        }
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Quads drawn by the most recently finished pass.
    pub fn last_pass_draws(&self) -> usize {
        self.last_pass_draws
    }

    fn issue(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext for SoftwareContext {
    fn info(&self) -> ContextInfo {
        ContextInfo {
            backend: BackendKind::Software,
            name: "framemix software rasterizer".to_string(),
            handle: self.handle,
        }
    }

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramId, RenderError> {
        let kernel = source.cpu.ok_or_else(|| RenderError::Compile {
            label: source.label.clone(),
            message: "no CPU kernel for software backend".to_string(),
        })?;
        let id = ProgramId(self.issue());
        self.programs.insert(id, kernel);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn upload_texture(&mut self, frame: &FrameBuffer) -> Result<TextureId, RenderError> {
        let format = frame.format();
        let texels = frame
            .pixels()
            .chunks_exact(format.bytes_per_pixel())
            .map(|px| format.decode(px))
            .collect();
        let id = TextureId(self.issue());
        self.textures.insert(
            id,
            Texture {
                width: frame.width(),
                height: frame.height(),
                texels,
            },
        );
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
        self.pass = Some(Pass {
            width,
            height,
            format,
            accum: vec![clear; width as usize * height as usize],
            program: None,
            draws: 0,
        });
        Ok(())
    }

    fn use_program(&mut self, program: ProgramId, transform: &Mat4) -> Result<(), RenderError> {
        let kernel = *self
            .programs
            .get(&program)
            .ok_or(RenderError::UnknownProgram(program))?;
        let pass = self.pass.as_mut().ok_or(RenderError::NoActivePass)?;
        pass.program = Some((kernel, *transform));
        Ok(())
    }

    fn draw_quad(&mut self, texture: TextureId) -> Result<(), RenderError> {
        let pass = self.pass.as_mut().ok_or(RenderError::NoActivePass)?;
        let (kernel, transform) = pass.program.ok_or(RenderError::NoProgramBound)?;
        let tex = self
            .textures
            .get(&texture)
            .ok_or(RenderError::UnknownTexture(texture))?;

        pass.draws += 1;
        if transform.determinant().abs() <= f32::EPSILON {
            return Ok(());
        }
        let inverse = transform.inverse();

        let (w, h) = (pass.width as f32, pass.height as f32);
        for y in 0..pass.height {
            let ndc_y = 1.0 - (y as f32 + 0.5) / h * 2.0;
            for x in 0..pass.width {
                let ndc_x = (x as f32 + 0.5) / w * 2.0 - 1.0;
                let quad = inverse.project_point3(Vec3::new(ndc_x, ndc_y, 0.0));
                if !(-1.0..=1.0).contains(&quad.x) || !(-1.0..=1.0).contains(&quad.y) {
                    continue;
                }

                let u = (quad.x + 1.0) * 0.5;
                let v = (1.0 - quad.y) * 0.5;
                let tx = ((u * tex.width as f32) as u32).min(tex.width - 1);
                let ty = ((v * tex.height as f32) as u32).min(tex.height - 1);
                let src = kernel(tex.texels[(ty * tex.width + tx) as usize]);

                let dst = &mut pass.accum[(y * pass.width + x) as usize];
                let a = src[3];
                *dst = [
                    src[0] * a + dst[0] * (1.0 - a),
                    src[1] * a + dst[1] * (1.0 - a),
                    src[2] * a + dst[2] * (1.0 - a),
                    a + dst[3] * (1.0 - a),
                ];
            }
        }
        Ok(())
    }

    fn end_pass(&mut self, target: &mut [u8]) -> Result<(), RenderError> {
        let pass = self.pass.take().ok_or(RenderError::NoActivePass)?;
        let bpp = pass.format.bytes_per_pixel();
        let expected = pass.width as usize * pass.height as usize * bpp;
        if target.len() != expected {
            return Err(RenderError::Readback(format!(
                "target holds {} bytes, pass produced {expected}",
                target.len()
            )));
        }
        for (px, rgba) in target.chunks_exact_mut(bpp).zip(&pass.accum) {
            pass.format.encode(*rgba, px);
        }
        self.last_pass_draws = pass.draws;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(c: [f32; 4]) -> [f32; 4] {
        c
    }

    fn passthrough() -> ShaderSource {
        ShaderSource::new("test.identity", "", identity)
    }

    fn render(ctx: &mut SoftwareContext, w: u32, h: u32) -> FrameBuffer {
        let mut out = FrameBuffer::new(w, h, PixelFormat::Rgba8).unwrap();
        ctx.end_pass(out.pixels_mut().unwrap()).unwrap();
        out
    }

    #[test]
    fn test_fullscreen_quad_copies_texture() {
        let mut ctx = SoftwareContext::new();
        let program = ctx.compile_program(&passthrough()).unwrap();
        let frame = FrameBuffer::filled(2, 2, PixelFormat::Bgra8, [0.0, 0.0, 1.0, 1.0]).unwrap();
        let tex = ctx.upload_texture(&frame).unwrap();

        ctx.begin_pass(4, 4, PixelFormat::Rgba8, [0.0; 4]).unwrap();
        ctx.use_program(program, &Mat4::IDENTITY).unwrap();
        ctx.draw_quad(tex).unwrap();
        let out = render(&mut ctx, 4, 4);

        assert!(out.pixels().chunks(4).all(|px| px == [0, 0, 255, 255]));
        assert_eq!(ctx.last_pass_draws(), 1);
    }

    #[test]
    fn test_transform_places_quad() {
        let mut ctx = SoftwareContext::new();
        let program = ctx.compile_program(&passthrough()).unwrap();
        let frame = FrameBuffer::filled(1, 1, PixelFormat::Rgba8, [1.0, 1.0, 1.0, 1.0]).unwrap();
        let tex = ctx.upload_texture(&frame).unwrap();

        // Left half of the output.
        let left = Mat4::from_translation(Vec3::new(-0.5, 0.0, 0.0))
            * Mat4::from_scale(Vec3::new(0.5, 1.0, 1.0));
        ctx.begin_pass(4, 2, PixelFormat::Rgba8, [0.0, 0.0, 0.0, 1.0]).unwrap();
        ctx.use_program(program, &left).unwrap();
        ctx.draw_quad(tex).unwrap();
        let out = render(&mut ctx, 4, 2);

        assert_eq!(out.pixel(0, 0), Some([1.0, 1.0, 1.0, 1.0]));
        assert_eq!(out.pixel(1, 1), Some([1.0, 1.0, 1.0, 1.0]));
        assert_eq!(out.pixel(2, 0), Some([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(out.pixel(3, 1), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_texture_orientation() {
        // Top row red, bottom row green.
        let mut pixels = Vec::new();
        pixels.extend_from_slice(&[255, 0, 0, 255]);
        pixels.extend_from_slice(&[0, 255, 0, 255]);
        let frame = FrameBuffer::from_vec(1, 2, PixelFormat::Rgba8, pixels).unwrap();

        let mut ctx = SoftwareContext::new();
        let program = ctx.compile_program(&passthrough()).unwrap();
        let tex = ctx.upload_texture(&frame).unwrap();
        ctx.begin_pass(1, 2, PixelFormat::Rgba8, [0.0; 4]).unwrap();
        ctx.use_program(program, &Mat4::IDENTITY).unwrap();
        ctx.draw_quad(tex).unwrap();
        let out = render(&mut ctx, 1, 2);

        assert_eq!(out.pixel(0, 0), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(out.pixel(0, 1), Some([0.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_alpha_blending() {
        let mut ctx = SoftwareContext::new();
        let program = ctx.compile_program(&passthrough()).unwrap();
        let half = FrameBuffer::filled(1, 1, PixelFormat::Rgba8, [1.0, 1.0, 1.0, 0.0]).unwrap();
        let tex = ctx.upload_texture(&half).unwrap();

        ctx.begin_pass(1, 1, PixelFormat::Rgba8, [0.0, 0.0, 1.0, 1.0]).unwrap();
        ctx.use_program(program, &Mat4::IDENTITY).unwrap();
        ctx.draw_quad(tex).unwrap();
        let out = render(&mut ctx, 1, 1);

        // Fully transparent source leaves the clear color.
        assert_eq!(out.pixel(0, 0), Some([0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn test_degenerate_transform_draws_nothing() {
        let mut ctx = SoftwareContext::new();
        let program = ctx.compile_program(&passthrough()).unwrap();
        let frame = FrameBuffer::filled(1, 1, PixelFormat::Rgba8, [1.0; 4]).unwrap();
        let tex = ctx.upload_texture(&frame).unwrap();

        ctx.begin_pass(2, 2, PixelFormat::Rgba8, [0.0; 4]).unwrap();
        ctx.use_program(program, &Mat4::ZERO).unwrap();
        ctx.draw_quad(tex).unwrap();
        let out = render(&mut ctx, 2, 2);
        assert!(out.pixels().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_compile_without_kernel_fails() {
        let mut ctx = SoftwareContext::new();
        let err = ctx
            .compile_program(&ShaderSource::wgsl_only("gpu.only", "fn x() {}"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Compile { .. }));
        assert_eq!(ctx.program_count(), 0);
    }

    #[test]
    fn test_draw_requires_pass_and_program() {
        let mut ctx = SoftwareContext::new();
        let frame = FrameBuffer::new(1, 1, PixelFormat::Rgba8).unwrap();
        let tex = ctx.upload_texture(&frame).unwrap();
        assert!(matches!(ctx.draw_quad(tex), Err(RenderError::NoActivePass)));

        ctx.begin_pass(1, 1, PixelFormat::Rgba8, [0.0; 4]).unwrap();
        assert!(matches!(ctx.draw_quad(tex), Err(RenderError::NoProgramBound)));

        ctx.delete_texture(tex);
        assert_eq!(ctx.texture_count(), 0);
    }

    #[test]
    fn test_end_pass_checks_target_size() {
        let mut ctx = SoftwareContext::new();
        ctx.begin_pass(2, 2, PixelFormat::Rgba8, [0.0; 4]).unwrap();
        let mut small = vec![0u8; 4];
        assert!(matches!(ctx.end_pass(&mut small), Err(RenderError::Readback(_))));
    }
}
