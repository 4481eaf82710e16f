//! Shader filters applied to sources while compositing.
//!
//! A filter owns one program on the render context. It is initialized lazily
//! the first time it is bound, on the render thread. A filter whose program
//! fails to compile stays uninitialized; binding it again is a cheap no-op
//! that reports `false`, and the compositor falls back to passthrough for
//! that source.

pub mod builtin;
pub mod registry;

pub use builtin::{passthrough, PASSTHROUGH};
pub use registry::{FilterFactory, FilterRegistry};

use crate::gpu::{ProgramId, RenderContext, RenderError, ShaderSource};
use glam::Mat4;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("No filter registered under '{0}'")]
    NotFound(String),
    #[error("Filter '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("Filter '{name}' failed to compile: {source}")]
    Compile {
        name: String,
        #[source]
        source: RenderError,
    },
}

/// Lifecycle every filter implements.
pub trait VideoFilter: Send {
    /// Registry key, e.g. `framemix.filters.grayscale`.
    fn name(&self) -> &str;

    fn is_initialized(&self) -> bool;

    /// Compile the filter's program on `ctx`.
    fn initialize(&mut self, ctx: &mut dyn RenderContext) -> Result<(), FilterError>;

    /// Activate the program with `transform`, initializing first if needed.
    /// Returns whether the program is now active.
    fn bind(&mut self, ctx: &mut dyn RenderContext, transform: &Mat4) -> bool;

    fn unbind(&mut self);

    fn is_bound(&self) -> bool;

    /// Free GPU state. The filter may be initialized again afterwards.
    fn release(&mut self, ctx: &mut dyn RenderContext);
}

/// [`VideoFilter`] backed by a single [`ShaderSource`].
pub struct ShaderFilter {
    name: String,
    source: ShaderSource,
    program: Option<ProgramId>,
    context: Option<u64>,
    failed: bool,
    bound: bool,
}

impl ShaderFilter {
    pub fn new(name: impl Into<String>, source: ShaderSource) -> Self {
        Self {
            name: name.into(),
            source,
            program: None,
            context: None,
            failed: false,
            bound: false,
        }
    }

    /// Whether compilation was attempted and failed.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }
}

impl VideoFilter for ShaderFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    fn initialize(&mut self, ctx: &mut dyn RenderContext) -> Result<(), FilterError> {
        if self.program.is_some() {
            return Ok(());
        }
        match ctx.compile_program(&self.source) {
            Ok(program) => {
                self.program = Some(program);
                self.context = Some(ctx.info().handle);
                self.failed = false;
                Ok(())
            }
            Err(source) => {
                self.failed = true;
                Err(FilterError::Compile {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn bind(&mut self, ctx: &mut dyn RenderContext, transform: &Mat4) -> bool {
        if self.failed {
            return false;
        }
        // Programs belong to the context that compiled them.
        if self.context.is_some_and(|handle| handle != ctx.info().handle) {
            self.program = None;
            self.context = None;
        }
        if self.program.is_none() {
            if let Err(e) = self.initialize(ctx) {
                log::warn!("{e}");
                return false;
            }
        }
        let Some(program) = self.program else {
            return false;
        };
        match ctx.use_program(program, transform) {
            Ok(()) => {
                self.bound = true;
                true
            }
            Err(e) => {
                log::warn!("Filter '{}' failed to bind: {e}", self.name);
                false
            }
        }
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn release(&mut self, ctx: &mut dyn RenderContext) {
        if let Some(program) = self.program.take() {
            if self.context == Some(ctx.info().handle) {
                ctx.delete_program(program);
            }
        }
        self.context = None;
        self.bound = false;
    }
}

/// Shared handle to a filter, used for source/filter associations.
#[derive(Clone)]
pub struct FilterHandle {
    inner: Arc<Mutex<Box<dyn VideoFilter>>>,
}

impl FilterHandle {
    pub fn new(filter: Box<dyn VideoFilter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(filter)),
        }
    }

    pub fn from_filter<F: VideoFilter + 'static>(filter: F) -> Self {
        Self::new(Box::new(filter))
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn VideoFilter>> {
        self.inner.lock()
    }

    pub fn name(&self) -> String {
        self.inner.lock().name().to_string()
    }

    /// Identity of the underlying filter, stable while any handle exists.
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterHandle")
            .field("name", &self.name())
            .finish()
    }
}
