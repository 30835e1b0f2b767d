//! Per-instance attribute arrays.

use crate::dirty_ranges::DirtyRanges;
use flatland_core::profiling::profile_function;
use flatland_test_utils::{GpuBuffer, RenderContext};

/// A tightly packed per-instance `f32` array mirrored into one GPU vertex buffer.
///
/// Writes only touch the CPU copy and remember which instances changed. The
/// GPU copy is refreshed by [`upload`](Self::upload), and only after the owner
/// has called [`mark_needs_update`](Self::mark_needs_update); this lets a pass
/// write thousands of slots and flag the attribute once.
#[derive(Debug)]
pub struct InstanceAttribute {
    name: String,
    item_size: usize,
    data: Vec<f32>,
    dirty: DirtyRanges,
    version: u32,
    uploaded_version: u32,
    gpu: Option<GpuBuffer>,
}

impl InstanceAttribute {
    /// Create an attribute of `capacity` instances, each `item_size` floats,
    /// with every component set to `fill`.
    pub fn new(name: impl Into<String>, item_size: usize, capacity: usize, fill: f32) -> Self {
        debug_assert!(item_size > 0 && item_size <= 16);
        Self {
            name: name.into(),
            item_size,
            data: vec![fill; item_size * capacity],
            dirty: DirtyRanges::new(),
            version: 0,
            uploaded_version: 0,
            gpu: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Floats per instance.
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Number of instances the attribute can hold.
    pub fn capacity(&self) -> usize {
        self.data.len() / self.item_size
    }

    /// The whole CPU-side array.
    pub fn array(&self) -> &[f32] {
        &self.data
    }

    /// Values of one instance.
    pub fn get(&self, index: usize) -> &[f32] {
        let start = index * self.item_size;
        &self.data[start..start + self.item_size]
    }

    /// Overwrite one instance. `values` shorter than the item size leave the
    /// remaining components untouched.
    #[inline]
    pub fn set(&mut self, index: usize, values: &[f32]) {
        let start = index * self.item_size;
        let len = values.len().min(self.item_size);
        self.data[start..start + len].copy_from_slice(&values[..len]);
        self.dirty.mark_dirty(index, index + 1);
    }

    /// Overwrite a single component of one instance.
    #[inline]
    pub fn set_component(&mut self, index: usize, component: usize, value: f32) {
        debug_assert!(component < self.item_size);
        self.data[index * self.item_size + component] = value;
        self.dirty.mark_dirty(index, index + 1);
    }

    /// Flag the attribute for re-upload. Bumps [`version`](Self::version).
    pub fn mark_needs_update(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn needs_update(&self) -> bool {
        self.version != self.uploaded_version
    }

    /// Number of times the attribute has been flagged for re-upload.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn dirty_ranges(&self) -> &DirtyRanges {
        &self.dirty
    }

    /// The GPU buffer, once the attribute has been uploaded at least once.
    pub fn gpu_buffer(&self) -> Option<&GpuBuffer> {
        self.gpu.as_ref()
    }

    /// Byte stride between instances in the vertex buffer.
    pub fn array_stride(&self) -> wgpu::BufferAddress {
        (self.item_size * std::mem::size_of::<f32>()) as wgpu::BufferAddress
    }

    /// Vertex attributes for this buffer starting at `location`.
    ///
    /// Items wider than four floats (instance matrices) are split into
    /// consecutive `vec4` columns.
    pub fn vertex_attributes(&self, location: u32) -> Vec<wgpu::VertexAttribute> {
        let mut attributes = Vec::new();
        let mut remaining = self.item_size;
        let mut offset = 0u64;
        let mut shader_location = location;
        while remaining > 0 {
            let width = remaining.min(4);
            let format = match width {
                1 => wgpu::VertexFormat::Float32,
                2 => wgpu::VertexFormat::Float32x2,
                3 => wgpu::VertexFormat::Float32x3,
                _ => wgpu::VertexFormat::Float32x4,
            };
            attributes.push(wgpu::VertexAttribute {
                format,
                offset,
                shader_location,
            });
            offset += (width * std::mem::size_of::<f32>()) as u64;
            shader_location += 1;
            remaining -= width;
        }
        attributes
    }

    /// Push pending changes to the GPU.
    ///
    /// Creates the buffer on first use and writes the whole array; afterwards
    /// only dirty instance ranges are written. Returns `true` if anything was
    /// uploaded.
    pub fn upload(&mut self, ctx: &dyn RenderContext) -> bool {
        profile_function!();
        if !self.needs_update() {
            return false;
        }

        match &self.gpu {
            None => {
                let buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&self.name),
                    size: (self.data.len() * std::mem::size_of::<f32>()) as u64,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                ctx.write_buffer(&buffer, 0, bytemuck::cast_slice(&self.data));
                self.gpu = Some(buffer);
            }
            Some(buffer) => {
                let stride = self.item_size;
                for range in self.dirty.iter() {
                    let start = range.start * stride;
                    let end = (range.end * stride).min(self.data.len());
                    if start >= end {
                        continue;
                    }
                    let offset = (start * std::mem::size_of::<f32>()) as u64;
                    ctx.write_buffer(buffer, offset, bytemuck::cast_slice(&self.data[start..end]));
                }
            }
        }

        self.dirty.clear();
        self.uploaded_version = self.version;
        true
    }

    /// Release the GPU buffer. The CPU copy stays valid and is fully uploaded
    /// again on the next [`upload`](Self::upload).
    pub fn dispose(&mut self, ctx: &dyn RenderContext) {
        if let Some(buffer) = self.gpu.take() {
            ctx.destroy_buffer(&buffer);
            self.uploaded_version = self.version.wrapping_sub(1);
        }
    }

    /// Detach the GPU buffer without destroying it, for callers that destroy
    /// it later through a context. The next upload recreates the buffer.
    pub fn release(&mut self) -> Option<GpuBuffer> {
        let buffer = self.gpu.take();
        if buffer.is_some() {
            self.uploaded_version = self.version.wrapping_sub(1);
        }
        buffer
    }
}
