//! Multi-source real-time compositor.
//!
//! Producers push frames from any thread; each push only swaps the source's
//! slot under a short lock. A single render thread wakes on a fixed cadence,
//! snapshots the source table, draws every source back to front with its
//! transform and filter, and hands the composite to the output stamped with
//! the tick's presentation time.

pub mod compositor;
pub mod config;
pub mod schedule;
pub mod stats;
pub mod table;

pub use compositor::{PassError, TickReport};
pub use config::{ConfigError, MixerConfig, StaleFramePolicy, MIN_POOL_CAPACITY};
pub use schedule::{Schedule, TickDecision};
pub use stats::MixerStats;
pub use table::{PushRejection, DEFAULT_LAYER};

use crate::clock::{Clock, SystemClock};
use crate::filters::{FilterError, FilterHandle, FilterRegistry};
use crate::frame::{DoubleBuffer, FrameBuffer, FramePool, Metadata, PoolError};
use crate::gpu::commands::CommandError;
use crate::gpu::{CommandQueue, ContextInfo, RenderContext, RenderError, SoftwareContext};
use crate::io::{FrameSink, Output, Source, SourceId, SourceInput};
use compositor::Compositor;
use glam::Mat4;
use parking_lot::{Condvar, Mutex, RwLock};
use stats::StatsCounters;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use table::SourceTable;

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Supplied pool is {got_width}x{got_height}, output is {width}x{height}")]
    PoolMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("Could not allocate output buffers: {0}")]
    Pool(#[from] PoolError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("GPU command failed: {0}")]
    Command(#[from] CommandError),
    #[error("Frame rejected: {0}")]
    FrameRejected(#[from] PushRejection),
    #[error("Pushed frame carries no source id")]
    UnresolvedSource,
    #[error("Mixer already started")]
    AlreadyStarted,
    #[error("Mixer is not running")]
    NotRunning,
    #[error("Failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerState {
    /// Constructed, render thread not started.
    Idle,
    Running,
    Paused,
    /// Shutdown requested, render thread finishing.
    Exiting,
    Stopped,
}

/// State shared between the mixer handle, producers and the render thread.
pub(crate) struct Shared {
    config: MixerConfig,
    clock: Arc<dyn Clock>,
    table: Mutex<SourceTable>,
    schedule: Mutex<Schedule>,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    started: AtomicBool,
    paused: AtomicBool,
    exiting: AtomicBool,
    stopped: AtomicBool,
    commands: CommandQueue,
    output: RwLock<Option<Weak<dyn Output>>>,
    latest: Mutex<Option<FrameBuffer>>,
    stats: StatsCounters,
}

impl Shared {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn wake(&self) {
        *self.wake.lock() = true;
        self.wake_cv.notify_one();
    }

    /// Sleep until woken or `timeout` elapses.
    fn wait(&self, timeout: Duration) {
        let mut pending = self.wake.lock();
        if !*pending {
            self.wake_cv.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }

    /// Store `frame` in the slot of `id`, applying layer/transform updates
    /// carried by video metadata.
    fn ingest(&self, id: SourceId, frame: FrameBuffer, metadata: &Metadata) -> Result<(), MixerError> {
        let now = self.clock.now();
        let stored = {
            let mut table = self.table.lock();
            let stored = table.store(id, frame, metadata.pts, now);
            if stored.is_ok() {
                if let Some(video) = metadata.as_video() {
                    if let Some(z_index) = video.z_index {
                        table.set_layer(id, z_index);
                    }
                    if let Some(transform) = video.transform {
                        table.set_transform(id, transform);
                    }
                }
            }
            stored
        };

        match stored {
            Ok(replaced) => {
                StatsCounters::bump(&self.stats.pushes);
                if replaced.is_some() {
                    StatsCounters::bump(&self.stats.replaced);
                }
                Ok(())
            }
            Err(rejection) => {
                StatsCounters::bump(&self.stats.rejected);
                log::debug!("Rejected push: {rejection}");
                Err(rejection.into())
            }
        }
    }

    /// Publish a composite. Returns whether a live output received it.
    fn emit(&self, composite: FrameBuffer, metadata: Metadata) -> bool {
        *self.latest.lock() = Some(composite.clone());
        let output = self.output.read().as_ref().and_then(Weak::upgrade);
        match output {
            Some(output) => {
                output.push_buffer(composite, metadata);
                StatsCounters::bump(&self.stats.emitted);
                true
            }
            None => false,
        }
    }
}

impl FrameSink for Shared {
    fn accept(&self, id: SourceId, frame: FrameBuffer, metadata: Metadata) {
        // Producers only see the port; failures are counted and logged.
        let _ = self.ingest(id, frame, &metadata);
    }
}

/// Callback receiving the render context description at construction.
pub type ContextCallback = Box<dyn FnOnce(&ContextInfo) + Send>;

/// Construction-time inputs for a [`Mixer`].
pub struct MixerBuilder {
    config: MixerConfig,
    context: Option<Box<dyn RenderContext>>,
    pool: Option<FramePool>,
    clock: Option<Arc<dyn Clock>>,
    filters: Option<FilterRegistry>,
    on_context: Option<ContextCallback>,
}

impl MixerBuilder {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            context: None,
            pool: None,
            clock: None,
            filters: None,
            on_context: None,
        }
    }

    /// Builder from a JSON [`MixerConfig`].
    pub fn from_json(json: &str) -> Result<Self, MixerError> {
        Ok(Self::new(MixerConfig::from_json(json)?))
    }

    /// Render context to composite with. Defaults to [`SoftwareContext`].
    pub fn context(mut self, context: Box<dyn RenderContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Externally owned pool for output buffers. Must match the output size.
    pub fn pool(mut self, pool: FramePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Registry used by [`Mixer::set_source_filter_by_name`]. Defaults to
    /// the builtins.
    pub fn filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Called once with the render context, e.g. so capture tooling can
    /// exclude it.
    pub fn on_context_created<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&ContextInfo) + Send + 'static,
    {
        self.on_context = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<Mixer, MixerError> {
        let config = self.config;
        config.validate()?;

        let pool = match self.pool {
            Some(pool) => {
                if pool.width() != config.width
                    || pool.height() != config.height
                    || pool.format() != config.pixel_format
                {
                    return Err(MixerError::PoolMismatch {
                        width: config.width,
                        height: config.height,
                        got_width: pool.width(),
                        got_height: pool.height(),
                    });
                }
                pool
            }
            None => FramePool::new(
                config.width,
                config.height,
                config.pixel_format,
                config.pool_capacity,
            )?,
        };
        let double = DoubleBuffer::allocate(&pool)?;

        let context = self
            .context
            .unwrap_or_else(|| Box::new(SoftwareContext::new()));
        let info = context.info();
        if let Some(callback) = self.on_context {
            callback(&info);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let schedule = Schedule::new(clock.now(), config.frame_duration);

        log::info!(
            "Mixer {}x{} {:?} @ {:.2} fps on {:?} ({})",
            config.width,
            config.height,
            config.pixel_format,
            config.fps(),
            info.backend,
            info.name
        );

        let shared = Arc::new(Shared {
            config,
            clock,
            table: Mutex::new(SourceTable::new()),
            schedule: Mutex::new(schedule),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            started: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            commands: CommandQueue::new(),
            output: RwLock::new(None),
            latest: Mutex::new(None),
            stats: StatsCounters::default(),
        });

        Ok(Mixer {
            shared,
            compositor: Mutex::new(Some(Compositor::new(context, pool.clone(), double))),
            pool,
            filters: self.filters.unwrap_or_else(FilterRegistry::with_builtins),
            render_thread: Mutex::new(None),
        })
    }
}

/// Handle to a compositor session.
pub struct Mixer {
    shared: Arc<Shared>,
    /// Present until the render thread takes it.
    compositor: Mutex<Option<Compositor>>,
    pool: FramePool,
    filters: FilterRegistry,
    render_thread: Mutex<Option<(ThreadId, JoinHandle<()>)>>,
}

impl Mixer {
    pub fn builder(config: MixerConfig) -> MixerBuilder {
        MixerBuilder::new(config)
    }

    /// Mixer with the software backend and system clock.
    pub fn new(config: MixerConfig) -> Result<Self, MixerError> {
        MixerBuilder::new(config).build()
    }

    pub fn config(&self) -> &MixerConfig {
        &self.shared.config
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Pool the output buffers come from.
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn state(&self) -> MixerState {
        let shared = &self.shared;
        if shared.stopped.load(Ordering::Acquire) {
            MixerState::Stopped
        } else if shared.exiting.load(Ordering::Acquire) {
            MixerState::Exiting
        } else if !shared.started.load(Ordering::Acquire) {
            MixerState::Idle
        } else if shared.is_paused() {
            MixerState::Paused
        } else {
            MixerState::Running
        }
    }

    /// Spawn the render thread.
    pub fn start(&self) -> Result<(), MixerError> {
        if self.shared.exiting.load(Ordering::Acquire) {
            return Err(MixerError::NotRunning);
        }
        let mut compositor = self
            .compositor
            .lock()
            .take()
            .ok_or(MixerError::AlreadyStarted)?;

        let shared = self.shared.clone();
        shared.started.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("framemix-render".to_string())
            .spawn(move || {
                render_loop(&shared, &mut compositor);
            })
            .map_err(|e| {
                self.shared.started.store(false, Ordering::Release);
                MixerError::Spawn(e)
            })?;

        log::info!("Render thread started");
        *self.render_thread.lock() = Some((handle.thread().id(), handle));
        Ok(())
    }

    /// Run one scheduling iteration on the calling thread.
    ///
    /// Only available before [`start`](Self::start); used for offline
    /// rendering and deterministic tests with a manual clock.
    pub fn step(&self) -> Result<TickReport, MixerError> {
        let mut guard = self.compositor.lock();
        let compositor = guard.as_mut().ok_or(MixerError::AlreadyStarted)?;
        if self.shared.exiting.load(Ordering::Acquire) {
            return Err(MixerError::NotRunning);
        }
        Ok(compositor.iterate(&self.shared, self.shared.clock.now()))
    }

    pub fn set_paused(&self, paused: bool) {
        let was = self.shared.paused.swap(paused, Ordering::AcqRel);
        if was != paused {
            log::info!("Mixing {}", if paused { "paused" } else { "resumed" });
            self.shared.wake();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Render the pending tick now instead of waiting for it. The composite
    /// keeps the tick's own timestamp. Ignored while paused or when the
    /// pending tick is more than a frame away.
    pub fn sync(&self) {
        if self.shared.is_paused() {
            return;
        }
        let now = self.shared.clock.now();
        if self.shared.schedule.lock().pull_forward(now) {
            self.shared.wake();
        }
    }

    /// Restart timestamps from `epoch`; the next tick is due at `epoch`.
    pub fn set_epoch(&self, epoch: Instant) {
        self.shared.schedule.lock().set_epoch(epoch);
        self.shared.wake();
    }

    pub fn epoch(&self) -> Instant {
        self.shared.schedule.lock().epoch()
    }

    pub fn next_tick(&self) -> Instant {
        self.shared.schedule.lock().next_tick()
    }

    /// Register `source` and connect it to its input port.
    ///
    /// The mixer only keeps a weak reference; once the application drops the
    /// source it is pruned at the next tick. `buffer_size > 0` fixes the byte
    /// length of every frame the source may push.
    pub fn register_source<S>(&self, source: &Arc<S>, buffer_size: usize) -> SourceId
    where
        S: Source + 'static,
    {
        let probe = Arc::downgrade(source);
        let probe: Weak<dyn Source> = probe;
        let id = self.shared.table.lock().insert(Some(probe), buffer_size);
        log::info!("Registered {id} ({buffer_size} byte frames)");
        self.shared.wake();
        source.set_output(Arc::new(self.make_input(id)));
        id
    }

    /// Register a producer without a [`Source`] object. Frames pushed into
    /// the returned port are attributed to the new id.
    pub fn register_input(&self, buffer_size: usize) -> SourceInput {
        let id = self.shared.table.lock().insert(None, buffer_size);
        log::info!("Registered {id} as bare input ({buffer_size} byte frames)");
        self.shared.wake();
        self.make_input(id)
    }

    /// Input port for an already registered source.
    pub fn input(&self, id: SourceId) -> Option<SourceInput> {
        self.is_registered(id).then(|| self.make_input(id))
    }

    fn make_input(&self, id: SourceId) -> SourceInput {
        let sink = Arc::downgrade(&self.shared);
        let sink: Weak<dyn FrameSink> = sink;
        SourceInput::new(id, sink)
    }

    /// Remove a source with its transform, layer, filter and slot.
    /// Returns `false` if it was not registered.
    pub fn unregister_source(&self, id: SourceId) -> bool {
        let removed = self.shared.table.lock().remove(id);
        match removed {
            Some(_released) => {
                log::info!("Unregistered {id}");
                self.shared.wake();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: SourceId) -> bool {
        self.shared.table.lock().contains(id)
    }

    pub fn source_count(&self) -> usize {
        self.shared.table.lock().len()
    }

    /// Source ids per layer, back to front.
    pub fn layers(&self) -> Vec<(i32, Vec<SourceId>)> {
        self.shared.table.lock().layers()
    }

    /// Bind `filter` to a source, or clear the binding with `None`.
    /// Returns `false` if the source is unknown.
    pub fn set_source_filter(&self, id: SourceId, filter: Option<FilterHandle>) -> bool {
        let previous = self.shared.table.lock().set_filter(id, filter);
        previous.is_ok()
    }

    /// Bind a new instance of the registered filter `name`.
    ///
    /// Fails only if no such filter is registered; an unknown source yields
    /// `Ok(false)`.
    pub fn set_source_filter_by_name(&self, id: SourceId, name: &str) -> Result<bool, MixerError> {
        let handle = self.filters.create_handle(name)?;
        Ok(self.set_source_filter(id, Some(handle)))
    }

    pub fn source_filter(&self, id: SourceId) -> Option<FilterHandle> {
        self.shared.table.lock().filter(id)
    }

    pub fn set_source_layer(&self, id: SourceId, z_index: i32) -> bool {
        self.shared.table.lock().set_layer(id, z_index)
    }

    pub fn set_source_transform(&self, id: SourceId, transform: Mat4) -> bool {
        self.shared.table.lock().set_transform(id, transform)
    }

    /// Producer entry point. The source is taken from the video metadata.
    pub fn push_buffer(&self, frame: FrameBuffer, metadata: Metadata) -> Result<(), MixerError> {
        let id = metadata
            .as_video()
            .and_then(|video| video.source)
            .ok_or(MixerError::UnresolvedSource)?;
        self.shared.ingest(id, frame, &metadata)
    }

    /// Producer entry point for a bare frame and timestamp.
    pub fn push_frame(&self, id: SourceId, frame: FrameBuffer, pts: Duration) -> Result<(), MixerError> {
        self.shared.ingest(id, frame, &Metadata::at(pts))
    }

    /// Composite most recently exposed by the double buffer.
    pub fn latest_composite(&self) -> Option<FrameBuffer> {
        self.shared.latest.lock().clone()
    }

    pub fn stats(&self) -> MixerStats {
        self.shared.stats.snapshot()
    }

    /// Run `command` on the render thread at its next wake-up.
    pub fn enqueue<F>(&self, command: F) -> Result<(), MixerError>
    where
        F: FnOnce(&mut dyn RenderContext) + Send + 'static,
    {
        self.shared.commands.enqueue(command)?;
        self.shared.wake();
        Ok(())
    }

    /// Run `command` on the render thread and wait for its result.
    ///
    /// Fails with [`CommandError::FromRenderThread`] when called from the
    /// render thread itself, e.g. from an output callback.
    pub fn enqueue_sync<F, R>(&self, command: F) -> Result<R, MixerError>
    where
        F: FnOnce(&mut dyn RenderContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        if !matches!(self.state(), MixerState::Running | MixerState::Paused) {
            return Err(MixerError::NotRunning);
        }
        let reply = self.shared.commands.submit(command)?;
        self.shared.wake();
        // A closed queue drops the command, which disconnects the reply.
        reply
            .recv()
            .map_err(|_| MixerError::Command(CommandError::Dropped))
    }

    /// Stop the render thread and release GPU state. Idempotent.
    pub fn stop(&self) {
        let shared = &self.shared;
        if shared.exiting.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.wake();

        if let Some(mut compositor) = self.compositor.lock().take() {
            compositor.shutdown(shared);
            shared.stopped.store(true, Ordering::Release);
            return;
        }

        let Some((thread_id, handle)) = self.render_thread.lock().take() else {
            return;
        };
        if thread_id == thread::current().id() {
            // Stopped from a callback on the render thread; the loop exits
            // on its own.
            return;
        }
        if handle.join().is_err() {
            log::error!("Render thread panicked");
            shared.stopped.store(true, Ordering::Release);
        }
        log::info!("Render thread stopped");
    }
}

impl Source for Mixer {
    /// Composites go to `output`, held weakly: once the application drops
    /// it, composites are still rendered but no longer delivered.
    fn set_output(&self, output: Arc<dyn Output>) {
        *self.shared.output.write() = Some(Arc::downgrade(&output));
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("width", &self.shared.config.width)
            .field("height", &self.shared.config.height)
            .field("state", &self.state())
            .finish()
    }
}

fn render_loop(shared: &Shared, compositor: &mut Compositor) {
    shared.commands.claim();
    while !shared.exiting.load(Ordering::Acquire) {
        let now = shared.clock.now();
        match compositor.iterate(shared, now) {
            TickReport::Waiting(wait) => shared.wait(wait),
            TickReport::Composited { .. } | TickReport::Paused | TickReport::Skipped(_) => {}
        }
    }
    compositor.shutdown(shared);
    shared.stopped.store(true, Ordering::Release);
}
