//! Integration tests for the mixer: scheduling, source table and composites.
//!
//! Everything except the threaded tests runs on a `ManualClock` and drives
//! the mixer with `Mixer::step`, so timing is exact.

use framemix::frame::VideoMetadata;
use framemix::gpu::commands::CommandError;
use framemix::mixer::PushRejection;
use framemix::{
    ChannelOutput, Clock, FrameBuffer, FramePool, ManualClock, Metadata, Mixer, MixerConfig,
    MixerError, MixerState, Output, PixelBufferSource, PixelFormat, Source, StaleFramePolicy,
    TickReport,
};
use glam::{Mat4, Vec3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

const D: Duration = Duration::from_millis(10);
const SIZE: u32 = 8;
const FRAME_BYTES: usize = (SIZE * SIZE * 4) as usize;

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn config() -> MixerConfig {
    MixerConfig {
        pixel_format: PixelFormat::Rgba8,
        ..MixerConfig::new(SIZE, SIZE, D)
    }
}

fn manual_mixer(config: MixerConfig) -> (Mixer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let mixer = Mixer::builder(config)
        .clock(clock.clone())
        .build()
        .unwrap();
    (mixer, clock)
}

fn solid(rgba: [f32; 4]) -> FrameBuffer {
    FrameBuffer::filled(SIZE, SIZE, PixelFormat::Rgba8, rgba).unwrap()
}

fn composited(report: TickReport) -> (Duration, u64, u64, usize, bool) {
    match report {
        TickReport::Composited {
            pts,
            tick,
            collapsed_ticks,
            sources,
            emitted,
        } => (pts, tick, collapsed_ticks, sources, emitted),
        other => panic!("expected a composite, got {other:?}"),
    }
}

fn center_pixel(mixer: &Mixer) -> [f32; 4] {
    mixer
        .latest_composite()
        .and_then(|frame| frame.pixel(SIZE / 2, SIZE / 2))
        .unwrap()
}

// ==================== Scheduling ====================

#[test]
fn test_emission_timestamps_follow_cadence() {
    let (mixer, clock) = manual_mixer(config());
    let (output, rx) = ChannelOutput::bounded(4);
    mixer.set_output(output.clone());

    let mut last = None;
    for n in 0..10u32 {
        let (pts, tick, collapsed, _, emitted) = composited(mixer.step().unwrap());
        assert_eq!(pts, D * n);
        assert_eq!(tick, n as u64);
        assert_eq!(collapsed, 0);
        assert!(emitted);

        let (_frame, metadata) = rx.try_recv().unwrap();
        assert_eq!(metadata.pts, D * n);
        if let Some(previous) = last {
            assert!(metadata.pts > previous);
        }
        last = Some(metadata.pts);

        // Nothing else is due until the clock moves.
        assert_eq!(mixer.step().unwrap(), TickReport::Waiting(D));
        clock.advance(D);
    }
    assert_eq!(mixer.stats().emitted, 10);
    assert_eq!(output.dropped(), 0);
}

#[test]
fn test_clock_jump_emits_once_and_resyncs() {
    let (mixer, clock) = manual_mixer(config());
    composited(mixer.step().unwrap());

    clock.advance(D * 5);
    let now = clock.now();
    let (pts, tick, collapsed, _, _) = composited(mixer.step().unwrap());
    assert_eq!(pts, D * 5);
    assert_eq!(tick, 5);
    assert_eq!(collapsed, 4);
    assert_eq!(mixer.next_tick(), now + D);

    // No backlog of the missed ticks.
    assert_eq!(mixer.step().unwrap(), TickReport::Waiting(D));

    let stats = mixer.stats();
    assert_eq!(stats.composites, 2);
    assert_eq!(stats.collapsed, 1);
    assert_eq!(stats.missed, 4);
}

#[test]
fn test_pause_skips_ticks_without_backlog() {
    let (mixer, clock) = manual_mixer(config());
    let epoch = mixer.epoch();
    composited(mixer.step().unwrap());

    mixer.set_paused(true);
    assert!(mixer.is_paused());
    for _ in 0..2 {
        clock.advance(D);
        assert_eq!(mixer.step().unwrap(), TickReport::Paused);
    }
    // The schedule kept moving while nothing was emitted.
    assert_eq!(mixer.next_tick(), epoch + D * 3);
    assert_eq!(mixer.stats().composites, 1);
    assert_eq!(mixer.stats().paused, 2);

    mixer.set_paused(false);
    clock.advance(D);
    let (pts, _, collapsed, _, _) = composited(mixer.step().unwrap());
    assert_eq!(pts, D * 3);
    assert_eq!(collapsed, 0);
    assert_eq!(mixer.step().unwrap(), TickReport::Waiting(D));
}

#[test]
fn test_set_epoch_restarts_timestamps() {
    let (mixer, clock) = manual_mixer(config());
    composited(mixer.step().unwrap());
    clock.advance(D);
    composited(mixer.step().unwrap());

    clock.advance(D * 7);
    let restart = clock.now();
    mixer.set_epoch(restart);
    assert_eq!(mixer.epoch(), restart);
    assert_eq!(mixer.next_tick(), restart);

    let (pts, tick, _, _, _) = composited(mixer.step().unwrap());
    assert_eq!(pts, Duration::ZERO);
    assert_eq!(tick, 0);
}

#[test]
fn test_sync_renders_pending_tick_once() {
    let (mixer, clock) = manual_mixer(config());
    let epoch = mixer.epoch();
    composited(mixer.step().unwrap());

    clock.advance(Duration::from_millis(3));
    mixer.sync();
    assert_eq!(mixer.next_tick(), epoch + D);
    let (pts, tick, _, _, _) = composited(mixer.step().unwrap());
    assert_eq!(pts, D);
    assert_eq!(tick, 1);

    // The following tick is more than a frame away; a second sync does nothing.
    mixer.sync();
    assert_eq!(
        mixer.step().unwrap(),
        TickReport::Waiting(D * 2 - Duration::from_millis(3))
    );
}

#[test]
fn test_cadence_stays_on_grid_after_sync() {
    let (mixer, clock) = manual_mixer(config());
    let (output, rx) = ChannelOutput::bounded(8);
    mixer.set_output(output.clone());
    let epoch = mixer.epoch();

    composited(mixer.step().unwrap());
    clock.advance(Duration::from_millis(3));
    mixer.sync();
    composited(mixer.step().unwrap());

    clock.set(epoch + D * 2);
    for _ in 0..3 {
        composited(mixer.step().unwrap());
        clock.advance(D);
    }

    let stamps: Vec<Duration> = rx.try_iter().map(|(_, metadata)| metadata.pts).collect();
    assert_eq!(stamps, vec![Duration::ZERO, D, D * 2, D * 3, D * 4]);
}

#[test]
fn test_sync_ignored_while_paused() {
    let (mixer, clock) = manual_mixer(config());
    composited(mixer.step().unwrap());
    let pending = mixer.next_tick();

    mixer.set_paused(true);
    clock.advance(Duration::from_millis(3));
    mixer.sync();
    assert_eq!(mixer.next_tick(), pending);
}

// ==================== Sources and composites ====================

#[test]
fn test_no_sources_renders_clear_color() {
    let (mixer, _clock) = manual_mixer(config());
    assert!(mixer.latest_composite().is_none());

    let (_, _, _, sources, emitted) = composited(mixer.step().unwrap());
    assert_eq!(sources, 0);
    assert!(!emitted);

    let composite = mixer.latest_composite().unwrap();
    assert_eq!(composite.width(), SIZE);
    assert_eq!(composite.height(), SIZE);
    assert_eq!(composite.pixel(0, 0), Some(BLACK));
}

#[test]
fn test_silent_source_contributes_nothing() {
    let (mixer, _clock) = manual_mixer(config());
    let active = mixer.register_input(FRAME_BYTES);
    let silent = mixer.register_input(FRAME_BYTES);
    // Above the active source, so it would hide it if it drew anything.
    assert!(mixer.set_source_layer(silent.id(), 5));

    active.push_buffer(solid(RED), Metadata::at(Duration::ZERO));

    let (_, _, _, sources, _) = composited(mixer.step().unwrap());
    assert_eq!(sources, 1);
    assert_eq!(center_pixel(&mixer), RED);
}

#[test]
fn test_layers_render_back_to_front() {
    let (mixer, clock) = manual_mixer(config());
    let red = mixer.register_input(0);
    let blue = mixer.register_input(0);
    mixer.set_source_layer(red.id(), 1);

    red.push_buffer(solid(RED), Metadata::at(Duration::ZERO));
    blue.push_buffer(solid(BLUE), Metadata::at(Duration::ZERO));
    composited(mixer.step().unwrap());
    assert_eq!(center_pixel(&mixer), RED);

    mixer.set_source_layer(blue.id(), 2);
    assert_eq!(
        mixer.layers(),
        vec![(1, vec![red.id()]), (2, vec![blue.id()])]
    );
    clock.advance(D);
    composited(mixer.step().unwrap());
    assert_eq!(center_pixel(&mixer), BLUE);
}

#[test]
fn test_same_layer_keeps_registration_order() {
    let (mixer, _clock) = manual_mixer(config());
    let first = mixer.register_input(0);
    let second = mixer.register_input(0);
    let third = mixer.register_input(0);

    assert_eq!(
        mixer.layers(),
        vec![(0, vec![first.id(), second.id(), third.id()])]
    );

    first.push_buffer(solid(RED), Metadata::at(Duration::ZERO));
    second.push_buffer(solid(BLUE), Metadata::at(Duration::ZERO));
    composited(mixer.step().unwrap());
    assert_eq!(center_pixel(&mixer), BLUE);
}

#[test]
fn test_transform_limits_coverage() {
    let (mixer, _clock) = manual_mixer(config());
    let input = mixer.register_input(FRAME_BYTES);
    assert!(mixer.set_source_transform(
        input.id(),
        Mat4::from_scale(Vec3::new(0.5, 0.5, 1.0))
    ));
    input.push_buffer(solid(RED), Metadata::at(Duration::ZERO));

    composited(mixer.step().unwrap());
    let composite = mixer.latest_composite().unwrap();
    assert_eq!(composite.pixel(SIZE / 2, SIZE / 2), Some(RED));
    assert_eq!(composite.pixel(0, 0), Some(BLACK));
}

#[test]
fn test_latest_frame_wins() {
    let (mixer, _clock) = manual_mixer(config());
    let input = mixer.register_input(FRAME_BYTES);

    input.push_buffer(solid(BLUE), Metadata::at(Duration::ZERO));
    input.push_buffer(solid(RED), Metadata::at(Duration::from_millis(1)));
    composited(mixer.step().unwrap());

    assert_eq!(center_pixel(&mixer), RED);
    let stats = mixer.stats();
    assert_eq!(stats.pushes, 2);
    assert_eq!(stats.replaced, 1);
}

#[test]
fn test_unregister_removes_every_reference() {
    let (mixer, clock) = manual_mixer(config());
    let keep = mixer.register_input(0);
    let gone = mixer.register_input(0);
    mixer.set_source_layer(gone.id(), 3);
    mixer
        .set_source_filter_by_name(gone.id(), "framemix.filters.invert")
        .unwrap();
    gone.push_buffer(solid(RED), Metadata::at(Duration::ZERO));
    composited(mixer.step().unwrap());

    assert!(mixer.unregister_source(gone.id()));
    assert!(!mixer.is_registered(gone.id()));
    assert!(mixer.source_filter(gone.id()).is_none());
    assert_eq!(mixer.source_count(), 1);
    assert_eq!(mixer.layers(), vec![(0, vec![keep.id()])]);
    assert!(mixer.input(gone.id()).is_none());

    // Second removal and setters on the stale id are no-ops.
    assert!(!mixer.unregister_source(gone.id()));
    assert!(!mixer.set_source_layer(gone.id(), 1));
    assert!(!mixer.set_source_transform(gone.id(), Mat4::IDENTITY));
    assert!(!mixer.set_source_filter(gone.id(), None));

    gone.push_buffer(solid(RED), Metadata::at(D));
    assert_eq!(mixer.stats().rejected, 1);

    clock.advance(D);
    let (_, _, _, sources, _) = composited(mixer.step().unwrap());
    assert_eq!(sources, 0);
    assert_eq!(center_pixel(&mixer), BLACK);
}

#[test]
fn test_push_to_unknown_source_is_rejected() {
    let (mixer, _clock) = manual_mixer(config());
    let input = mixer.register_input(0);
    let id = input.id();
    mixer.unregister_source(id);

    match mixer.push_frame(id, solid(RED), Duration::ZERO) {
        Err(MixerError::FrameRejected(PushRejection::UnknownSource(rejected))) => {
            assert_eq!(rejected, id)
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn test_length_mismatch_keeps_previous_frame() {
    let (mixer, clock) = manual_mixer(config());
    let input = mixer.register_input(FRAME_BYTES);
    let id = input.id();

    mixer.push_frame(id, solid(RED), Duration::ZERO).unwrap();
    composited(mixer.step().unwrap());

    let small = FrameBuffer::filled(4, 4, PixelFormat::Rgba8, BLUE).unwrap();
    match mixer.push_frame(id, small, D) {
        Err(MixerError::FrameRejected(PushRejection::LengthMismatch { expected, got, .. })) => {
            assert_eq!(expected, FRAME_BYTES);
            assert_eq!(got, 64);
        }
        other => panic!("expected length mismatch, got {other:?}"),
    }

    clock.advance(D);
    composited(mixer.step().unwrap());
    assert_eq!(center_pixel(&mixer), RED);
    assert_eq!(mixer.stats().rejected, 1);
    assert_eq!(mixer.stats().pushes, 1);
}

#[test]
fn test_push_buffer_needs_source_in_metadata() {
    let (mixer, _clock) = manual_mixer(config());
    let result = mixer.push_buffer(solid(RED), Metadata::at(Duration::ZERO));
    assert!(matches!(result, Err(MixerError::UnresolvedSource)));
}

#[test]
fn test_video_metadata_moves_layer_and_transform() {
    let (mixer, _clock) = manual_mixer(config());
    let input = mixer.register_input(0);
    let id = input.id();
    let transform = Mat4::from_translation(Vec3::new(0.25, 0.0, 0.0));

    let metadata = Metadata::video(
        Duration::ZERO,
        VideoMetadata {
            source: Some(id),
            z_index: Some(3),
            transform: Some(transform),
            width: SIZE,
            height: SIZE,
        },
    );
    mixer.push_buffer(solid(RED), metadata).unwrap();

    assert_eq!(mixer.layers(), vec![(3, vec![id])]);
    let (_, _, _, sources, _) = composited(mixer.step().unwrap());
    assert_eq!(sources, 1);
    // Shifted right by an eighth of the output: the left column is uncovered.
    let composite = mixer.latest_composite().unwrap();
    assert_eq!(composite.pixel(0, SIZE / 2), Some(BLACK));
    assert_eq!(composite.pixel(SIZE - 1, SIZE / 2), Some(RED));
}

#[test]
fn test_stale_frames_dropped_after_bound() {
    let config = MixerConfig {
        stale_frame_policy: StaleFramePolicy::DropAfter(D * 2),
        ..config()
    };
    let (mixer, clock) = manual_mixer(config);
    let input = mixer.register_input(FRAME_BYTES);
    input.push_buffer(solid(RED), Metadata::at(Duration::ZERO));

    for _ in 0..3 {
        let (_, _, _, sources, _) = composited(mixer.step().unwrap());
        assert_eq!(sources, 1);
        clock.advance(D);
    }

    // Three frame durations without a refresh exceeds the bound.
    let (_, _, _, sources, _) = composited(mixer.step().unwrap());
    assert_eq!(sources, 0);
    assert_eq!(center_pixel(&mixer), BLACK);
    assert_eq!(mixer.stats().stale_drops, 1);

    // A fresh push brings the source back.
    input.push_buffer(solid(BLUE), Metadata::at(D * 3));
    clock.advance(D);
    composited(mixer.step().unwrap());
    assert_eq!(center_pixel(&mixer), BLUE);
}

#[test]
fn test_repeat_policy_keeps_last_frame() {
    let (mixer, clock) = manual_mixer(config());
    let input = mixer.register_input(FRAME_BYTES);
    input.push_buffer(solid(RED), Metadata::at(Duration::ZERO));

    for _ in 0..20 {
        let (_, _, _, sources, _) = composited(mixer.step().unwrap());
        assert_eq!(sources, 1);
        clock.advance(D);
    }
    assert_eq!(center_pixel(&mixer), RED);
}

// ==================== Buffer ownership ====================

#[test]
fn test_dropped_source_is_pruned_and_buffers_return() {
    let (mixer, clock) = manual_mixer(config());
    let pool = FramePool::new(SIZE, SIZE, PixelFormat::Rgba8, 3).unwrap();
    let source = Arc::new(PixelBufferSource::new(SIZE, SIZE, PixelFormat::Rgba8).with_pool(pool.clone()));
    let id = mixer.register_source(&source, FRAME_BYTES);
    assert!(source.is_connected());

    let pixels = vec![255u8; FRAME_BYTES];
    assert!(source.push_pixels(&pixels, Duration::ZERO).unwrap());
    assert_eq!(pool.outstanding(), 1);
    composited(mixer.step().unwrap());
    assert_eq!(pool.outstanding(), 1);

    // The replaced frame goes straight back.
    assert!(source.push_pixels(&pixels, D).unwrap());
    assert_eq!(pool.outstanding(), 1);

    drop(source);
    clock.advance(D);
    let (_, _, _, sources, _) = composited(mixer.step().unwrap());
    assert_eq!(sources, 0);
    assert!(!mixer.is_registered(id));
    assert_eq!(mixer.stats().pruned, 1);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_retained_composite_is_never_the_render_target() {
    let (mixer, clock) = manual_mixer(config());
    let (output, rx) = ChannelOutput::bounded(8);
    mixer.set_output(output.clone());
    let input = mixer.register_input(FRAME_BYTES);

    input.push_buffer(solid(RED), Metadata::at(Duration::ZERO));
    composited(mixer.step().unwrap());
    let (held, _) = rx.try_recv().unwrap();
    assert!(mixer.latest_composite().unwrap().ptr_eq(&held));
    assert_eq!(mixer.pool().outstanding(), 2);

    input.push_buffer(solid(BLUE), Metadata::at(D));
    clock.advance(D);
    composited(mixer.step().unwrap());
    clock.advance(D);
    composited(mixer.step().unwrap());

    // The held buffer came due as render target again and was left alone.
    assert_eq!(held.pixel(0, 0), Some(RED));
    assert!(!mixer.latest_composite().unwrap().ptr_eq(&held));
    assert_eq!(mixer.pool().outstanding(), 3);

    drop(held);
    assert_eq!(mixer.pool().outstanding(), 2);
}

#[test]
fn test_composites_not_emitted_after_output_dropped() {
    let (mixer, clock) = manual_mixer(config());
    let (output, _rx) = ChannelOutput::bounded(8);
    mixer.set_output(output.clone());

    let (_, _, _, _, emitted) = composited(mixer.step().unwrap());
    assert!(emitted);

    drop(output);
    clock.advance(D);
    let (_, _, _, _, emitted) = composited(mixer.step().unwrap());
    assert!(!emitted);
    assert!(mixer.latest_composite().is_some());
    assert_eq!(mixer.stats().emitted, 1);
}

#[test]
fn test_pool_exhaustion_skips_tick() {
    let (mixer, clock) = manual_mixer(MixerConfig {
        pool_capacity: 2,
        ..config()
    });
    let (output, rx) = ChannelOutput::bounded(8);
    mixer.set_output(output.clone());

    composited(mixer.step().unwrap());
    clock.advance(D);
    composited(mixer.step().unwrap());

    // Both buffers are held downstream; the next target cannot be replaced.
    clock.advance(D);
    assert!(matches!(mixer.step().unwrap(), TickReport::Skipped(_)));
    assert_eq!(mixer.stats().skipped, 1);

    // Releasing them lets the following tick through.
    while rx.try_recv().is_ok() {}
    clock.advance(D);
    composited(mixer.step().unwrap());
}

// ==================== Construction ====================

#[test]
fn test_invalid_config_rejected() {
    let result = Mixer::new(MixerConfig::with_fps(0, 720, 30));
    assert!(matches!(result, Err(MixerError::InvalidConfig(_))));

    let result = Mixer::new(MixerConfig::with_fps(1280, 720, 0));
    assert!(matches!(result, Err(MixerError::InvalidConfig(_))));
}

#[test]
fn test_supplied_pool_must_match_output() {
    let pool = FramePool::new(4, 4, PixelFormat::Rgba8, 4).unwrap();
    let result = Mixer::builder(config()).pool(pool).build();
    assert!(matches!(result, Err(MixerError::PoolMismatch { .. })));

    let pool = FramePool::new(SIZE, SIZE, PixelFormat::Rgba8, 4).unwrap();
    let mixer = Mixer::builder(config()).pool(pool.clone()).build().unwrap();
    // The double buffer is drawn from the supplied pool.
    assert_eq!(pool.outstanding(), 2);
    drop(mixer);
}

#[test]
fn test_builder_from_json() {
    let mixer = framemix::MixerBuilder::from_json(
        r#"{"width": 320, "height": 240, "pixel_format": "rgba8"}"#,
    )
    .unwrap()
    .build()
    .unwrap();
    assert_eq!(mixer.config().width, 320);
    assert_eq!(mixer.config().pixel_format, PixelFormat::Rgba8);
    assert_eq!(mixer.config().pool_capacity, 4);
}

#[test]
fn test_context_callback_runs_once() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    let _mixer = Mixer::builder(config())
        .on_context_created(move |info| {
            assert!(!info.name.is_empty());
            flag.store(true, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    assert!(called.load(Ordering::SeqCst));
}

// ==================== Render thread ====================

#[test]
fn test_commands_run_at_next_step() {
    let (mixer, _clock) = manual_mixer(config());
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    mixer
        .enqueue(move |_ctx| flag.store(true, Ordering::SeqCst))
        .unwrap();
    assert!(!ran.load(Ordering::SeqCst));

    mixer.step().unwrap();
    assert!(ran.load(Ordering::SeqCst));

    // Waiting for a result needs a running render thread.
    assert!(matches!(
        mixer.enqueue_sync(|ctx| ctx.info()),
        Err(MixerError::NotRunning)
    ));
}

#[test]
fn test_threaded_start_and_stop() {
    let mixer = Mixer::new(MixerConfig {
        pixel_format: PixelFormat::Rgba8,
        ..MixerConfig::new(SIZE, SIZE, Duration::from_millis(5))
    })
    .unwrap();
    let (output, rx) = ChannelOutput::bounded(16);
    mixer.set_output(output.clone());
    assert_eq!(mixer.state(), MixerState::Idle);

    mixer.start().unwrap();
    assert_eq!(mixer.state(), MixerState::Running);
    assert!(matches!(mixer.start(), Err(MixerError::AlreadyStarted)));
    assert!(matches!(mixer.step(), Err(MixerError::AlreadyStarted)));

    let backend = mixer.enqueue_sync(|ctx| ctx.info().backend).unwrap();
    assert_eq!(backend, framemix::gpu::BackendKind::Software);

    let mut last = None;
    for _ in 0..3 {
        let (_, metadata) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        if let Some(previous) = last {
            assert!(metadata.pts > previous);
        }
        last = Some(metadata.pts);
    }

    mixer.set_paused(true);
    assert_eq!(mixer.state(), MixerState::Paused);
    mixer.set_paused(false);

    mixer.stop();
    assert_eq!(mixer.state(), MixerState::Stopped);
    mixer.stop();
    assert!(matches!(
        mixer.enqueue_sync(|ctx| ctx.info()),
        Err(MixerError::NotRunning)
    ));
    assert!(matches!(mixer.start(), Err(MixerError::NotRunning)));
}

struct ReentrantOutput {
    mixer: OnceLock<Weak<Mixer>>,
    refused: crossbeam_channel::Sender<bool>,
}

impl Output for ReentrantOutput {
    fn push_buffer(&self, _frame: FrameBuffer, _metadata: Metadata) {
        let Some(mixer) = self.mixer.get().and_then(Weak::upgrade) else {
            return;
        };
        let result = mixer.enqueue_sync(|ctx| ctx.info());
        let refused = matches!(
            result,
            Err(MixerError::Command(CommandError::FromRenderThread))
        );
        let _ = self.refused.send(refused);
    }
}

#[test]
fn test_enqueue_sync_from_output_is_refused() {
    let mixer = Arc::new(
        Mixer::new(MixerConfig {
            pixel_format: PixelFormat::Rgba8,
            ..MixerConfig::new(SIZE, SIZE, Duration::from_millis(5))
        })
        .unwrap(),
    );
    let (tx, rx) = crossbeam_channel::unbounded();
    let output = Arc::new(ReentrantOutput {
        mixer: OnceLock::new(),
        refused: tx,
    });
    let _ = output.mixer.set(Arc::downgrade(&mixer));
    mixer.set_output(output.clone());

    mixer.start().unwrap();
    // The render thread keeps ticking after each refused call.
    for _ in 0..3 {
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
    mixer.stop();
    assert_eq!(mixer.state(), MixerState::Stopped);
    assert!(mixer.stats().composites >= 3);
}

#[test]
fn test_stop_before_start() {
    let (mixer, _clock) = manual_mixer(config());
    mixer.stop();
    assert_eq!(mixer.state(), MixerState::Stopped);
    assert!(matches!(mixer.step(), Err(MixerError::AlreadyStarted)));
    assert!(mixer.enqueue(|_ctx| {}).is_err());
}

#[test]
fn test_epoch_tracks_manual_clock() {
    let start = Instant::now();
    let clock = Arc::new(ManualClock::starting_at(start));
    let mixer = Mixer::builder(config()).clock(clock).build().unwrap();
    assert_eq!(mixer.epoch(), start);
    assert_eq!(mixer.next_tick(), start);
}
