use std::fmt;
use std::sync::Arc;

use flatland_test_utils::{GpuBuffer, RenderContext};

/// Errors raised while creating a [`GraphicsContext`].
#[derive(Debug)]
pub enum GraphicsError {
    /// No adapter matched the requested options.
    NoAdapter(wgpu::RequestAdapterError),
    /// The adapter refused to create a device.
    DeviceRequest(wgpu::RequestDeviceError),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter(err) => write!(f, "failed to find a suitable GPU adapter: {err}"),
            Self::DeviceRequest(err) => write!(f, "failed to create device: {err}"),
        }
    }
}

impl std::error::Error for GraphicsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoAdapter(err) => Some(err),
            Self::DeviceRequest(err) => Some(err),
        }
    }
}

/// Options for [`GraphicsContext`] creation.
#[derive(Debug, Clone)]
pub struct GraphicsContextDescriptor {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    pub limits: wgpu::Limits,
    pub label: Option<&'static str>,
}

impl Default for GraphicsContextDescriptor {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            limits: wgpu::Limits::default(),
            label: Some("flatland device"),
        }
    }
}

/// A headless wgpu device and queue shared by everything that uploads buffers.
///
/// ```rust,no_run
/// use flatland_render::GraphicsContext;
///
/// let ctx = GraphicsContext::new_owned_sync().expect("no GPU");
/// let ctx2 = ctx.clone(); // Arc
/// ```
pub struct GraphicsContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GraphicsContext {
    pub async fn new_owned() -> Result<Arc<Self>, GraphicsError> {
        Self::new_owned_with_descriptor(GraphicsContextDescriptor::default()).await
    }

    /// Blocks the current thread until the context is created.
    pub fn new_owned_sync() -> Result<Arc<Self>, GraphicsError> {
        pollster::block_on(Self::new_owned())
    }

    pub async fn new_owned_with_descriptor(
        descriptor: GraphicsContextDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: descriptor.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: descriptor.power_preference,
                compatible_surface: None,
                force_fallback_adapter: descriptor.force_fallback_adapter,
            })
            .await
            .map_err(GraphicsError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: descriptor.label,
                required_limits: descriptor.limits.clone(),
                ..Default::default()
            })
            .await
            .map_err(GraphicsError::DeviceRequest)?;

        tracing::info!("Created graphics context on {:?}", adapter.get_info().name);

        Ok(Arc::new(Self {
            instance,
            adapter,
            device,
            queue,
        }))
    }

    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}

impl RenderContext for GraphicsContext {
    fn create_buffer(&self, desc: &wgpu::BufferDescriptor) -> GpuBuffer {
        GpuBuffer::from_wgpu(self.device.create_buffer(desc))
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        match buffer.as_wgpu() {
            Some(wgpu_buffer) => self.queue.write_buffer(wgpu_buffer, offset, data),
            None => tracing::warn!("Ignoring write to a buffer not owned by this context"),
        }
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        if let Some(wgpu_buffer) = buffer.as_wgpu() {
            wgpu_buffer.destroy();
        }
    }
}
