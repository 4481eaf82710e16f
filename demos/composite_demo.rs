//! Example: Composite three live producers and save a few output frames.
//!
//! Three producer threads push animated patterns into a running mixer. One is
//! a full-screen background, two are picture-in-picture tiles with filters.
//! Every 30th composite is written as a PNG.
//!
//! Run with:
//!     cargo run --example composite_demo
//!     cargo run --example composite_demo -- --gpu

use anyhow::{Context, Result};
use framemix::filters::builtin::{GRAYSCALE, SEPIA};
use framemix::{
    ChannelOutput, Mixer, MixerConfig, PixelBufferSource, PixelFormat, RenderContext,
    SoftwareContext, Source, WgpuContext,
};
use glam::{Mat4, Vec3};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const FPS: u32 = 30;
const SECONDS: u64 = 3;

/// Fill `pixels` (BGRA) with a pattern that moves with `t`.
fn paint(pixels: &mut [u8], width: u32, height: u32, t: f32, hue: f32) {
    for y in 0..height {
        for x in 0..width {
            let u = x as f32 / width as f32;
            let v = y as f32 / height as f32;
            let wave = ((u * 6.0 + t * 2.0).sin() * (v * 4.0 - t).cos() + 1.0) * 0.5;
            let offset = (y * width + x) as usize * 4;
            pixels[offset] = (255.0 * (1.0 - wave) * hue) as u8;
            pixels[offset + 1] = (255.0 * v * wave) as u8;
            pixels[offset + 2] = (255.0 * wave * (1.0 - hue)) as u8;
            pixels[offset + 3] = 255;
        }
    }
}

fn spawn_producer(
    source: Arc<PixelBufferSource>,
    hue: f32,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<Result<u64>> {
    thread::spawn(move || {
        let (width, height) = (source.width(), source.height());
        let mut pixels = vec![0u8; source.frame_size()];
        let start = Instant::now();
        let mut pushed = 0;
        while running.load(Ordering::Acquire) {
            let t = start.elapsed().as_secs_f32();
            paint(&mut pixels, width, height, t, hue);
            if source.push_pixels(&pixels, start.elapsed())? {
                pushed += 1;
            }
            thread::sleep(Duration::from_millis(15));
        }
        Ok(pushed)
    })
}

fn render_context(use_gpu: bool) -> Box<dyn RenderContext> {
    if use_gpu {
        match WgpuContext::create() {
            Ok(ctx) => return Box::new(ctx),
            Err(e) => println!("  GPU unavailable ({e}), using the software rasterizer"),
        }
    }
    Box::new(SoftwareContext::new())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Framemix - Composite Demo");
    println!("=========================\n");

    let use_gpu = std::env::args().any(|arg| arg == "--gpu");
    let config = MixerConfig::with_fps(WIDTH, HEIGHT, FPS);
    println!("Output: {}x{} @ {} fps", WIDTH, HEIGHT, FPS);

    let mixer = Mixer::builder(config)
        .context(render_context(use_gpu))
        .on_context_created(|info| println!("  Render context: {} ({:?})\n", info.name, info.backend))
        .build()
        .context("building mixer")?;

    let (output, rx) = ChannelOutput::bounded(8);
    mixer.set_output(output.clone());

    // Background plus two inset tiles.
    let background = Arc::new(PixelBufferSource::new(WIDTH, HEIGHT, PixelFormat::Bgra8));
    let left = Arc::new(PixelBufferSource::new(WIDTH / 2, HEIGHT / 2, PixelFormat::Bgra8));
    let right = Arc::new(PixelBufferSource::new(WIDTH / 2, HEIGHT / 2, PixelFormat::Bgra8));

    mixer.register_source(&background, background.frame_size());
    let left_id = mixer.register_source(&left, left.frame_size());
    let right_id = mixer.register_source(&right, right.frame_size());

    let inset = Mat4::from_scale(Vec3::new(0.35, 0.35, 1.0));
    mixer.set_source_layer(left_id, 1);
    mixer.set_source_transform(left_id, Mat4::from_translation(Vec3::new(-0.55, 0.5, 0.0)) * inset);
    mixer.set_source_filter_by_name(left_id, GRAYSCALE)?;
    // Layer and transform can also travel with the frames.
    right.set_layer(2);
    right.set_transform(Mat4::from_translation(Vec3::new(0.55, -0.5, 0.0)) * inset);
    mixer.set_source_filter_by_name(right_id, SEPIA)?;

    let running = Arc::new(AtomicBool::new(true));
    let producers = vec![
        spawn_producer(background.clone(), 0.2, running.clone()),
        spawn_producer(left.clone(), 0.6, running.clone()),
        spawn_producer(right.clone(), 0.9, running.clone()),
    ];

    mixer.start()?;
    println!("Mixing for {} seconds...", SECONDS);

    let deadline = Instant::now() + Duration::from_secs(SECONDS);
    let mut received = 0u64;
    while Instant::now() < deadline {
        let Ok((frame, metadata)) = rx.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        if received % 30 == 0 {
            let path = format!("composite_{:04}.png", received);
            frame
                .save_png(Path::new(&path))
                .with_context(|| format!("saving {path}"))?;
            println!("  {:>8.3}s -> {}", metadata.pts.as_secs_f64(), path);
        }
        received += 1;
    }

    running.store(false, Ordering::Release);
    let mut pushed = 0;
    for producer in producers {
        pushed += producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }
    mixer.stop();

    println!("\nReceived {} composites from {} pushed frames", received, pushed);
    println!("Stats: {}", serde_json::to_string_pretty(&mixer.stats())?);

    Ok(())
}
