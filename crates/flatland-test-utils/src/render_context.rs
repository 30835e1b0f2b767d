//! Trait abstracting GPU buffer operations for testing.

use crate::gpu_types::GpuBuffer;
use wgpu::BufferDescriptor;

/// GPU buffer creation, upload and release.
///
/// Methods take `&self` and return owned wrappers, so the trait stays object
/// safe and mock implementations can record calls through interior mutability.
///
/// ```rust,no_run
/// use flatland_test_utils::RenderContext;
/// use wgpu::{BufferDescriptor, BufferUsages};
///
/// fn upload(ctx: &dyn RenderContext, data: &[u8]) {
///     let buffer = ctx.create_buffer(&BufferDescriptor {
///         label: None,
///         size: data.len() as u64,
///         usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
///         mapped_at_creation: false,
///     });
///     ctx.write_buffer(&buffer, 0, data);
/// }
/// ```
pub trait RenderContext: Send + Sync {
    /// Create a GPU buffer.
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer;

    /// Write data to a buffer.
    ///
    /// For real buffers this maps to `queue.write_buffer()`.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    /// Release a buffer's GPU memory. The wrapper must not be written afterwards.
    fn destroy_buffer(&self, buffer: &GpuBuffer);
}
