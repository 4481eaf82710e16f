//! wgpu device acquisition.

use std::sync::Arc;
use wgpu::{Adapter, AdapterInfo, Backends, Device, Instance, PowerPreference, Queue};

/// Errors that can occur while acquiring a GPU.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No GPU adapter found for backends {0:?}")]
    NoAdapter(Backends),
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Adapter selection. `WGPU_BACKEND` and `WGPU_POWER_PREF` override the
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuOptions {
    pub backends: Backends,
    pub power_preference: PowerPreference,
    /// Accept a software adapter (e.g. llvmpipe) when no hardware one exists.
    pub allow_fallback: bool,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            backends: Backends::from_env()
                .unwrap_or(Backends::METAL | Backends::VULKAN | Backends::DX12 | Backends::GL),
            power_preference: PowerPreference::from_env()
                .unwrap_or(PowerPreference::HighPerformance),
            allow_fallback: true,
        }
    }
}

/// Headless device and queue shared by the wgpu render context.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    info: AdapterInfo,
}

impl GpuContext {
    pub async fn new() -> Result<Self, GpuError> {
        Self::with_options(GpuOptions::default()).await
    }

    /// Acquire a device, retrying with a fallback adapter if allowed.
    pub async fn with_options(options: GpuOptions) -> Result<Self, GpuError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });

        let request = |force_fallback_adapter| wgpu::RequestAdapterOptions {
            power_preference: options.power_preference,
            force_fallback_adapter,
            compatible_surface: None,
        };
        let adapter = match instance.request_adapter(&request(false)).await {
            Ok(adapter) => adapter,
            Err(_) if options.allow_fallback => {
                log::debug!("No hardware adapter, trying fallback");
                instance
                    .request_adapter(&request(true))
                    .await
                    .map_err(|_| GpuError::NoAdapter(options.backends))?
            }
            Err(_) => return Err(GpuError::NoAdapter(options.backends)),
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("framemix-compositor"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;
        // Errors outside an error scope would otherwise panic the render thread.
        device.on_uncaptured_error(Arc::new(|error: wgpu::Error| {
            log::error!("Uncaptured GPU error: {error}");
        }));

        let info = adapter.get_info();
        log::info!("GPU context ready on {} ({:?})", info.name, info.backend);

        Ok(Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
        })
    }

    /// Blocking variant of [`new`](Self::new) for non-async callers.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.info
    }

    /// Largest output side the device can render to.
    pub fn max_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}
