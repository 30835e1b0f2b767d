//! Instanced draw containers.

use std::sync::atomic::{AtomicU64, Ordering};

use flatland_core::profiling::profile_function;
use flatland_test_utils::{GpuBuffer, RenderContext};

use crate::attribute::InstanceAttribute;

/// Process-unique identifier of an [`InstancedMesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A shared unit quad drawn `instance_count` times, with one
/// [`InstanceAttribute`] per per-instance input.
///
/// Capacity is fixed at construction; every attribute holds exactly
/// `capacity` items.
#[derive(Debug)]
pub struct InstancedMesh {
    id: MeshId,
    label: String,
    capacity: usize,
    attributes: Vec<InstanceAttribute>,
    instance_count: u32,
    render_order: i32,
    disposed: bool,
}

impl InstancedMesh {
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: MeshId::next(),
            label: label.into(),
            capacity,
            attributes: Vec::new(),
            instance_count: 0,
            render_order: 0,
            disposed: false,
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a per-instance attribute filled with `fill`. Returns its index.
    pub fn push_attribute(&mut self, name: impl Into<String>, item_size: usize, fill: f32) -> usize {
        self.attributes
            .push(InstanceAttribute::new(name, item_size, self.capacity, fill));
        self.attributes.len() - 1
    }

    /// Drop every attribute past the first `len`. Their GPU buffers are
    /// returned for the caller to destroy.
    pub fn truncate_attributes(&mut self, len: usize) -> Vec<GpuBuffer> {
        let len = len.min(self.attributes.len());
        self.attributes
            .drain(len..)
            .filter_map(|mut attr| attr.release())
            .collect()
    }

    pub fn attributes(&self) -> &[InstanceAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, index: usize) -> &InstanceAttribute {
        &self.attributes[index]
    }

    pub fn attribute_mut(&mut self, index: usize) -> &mut InstanceAttribute {
        &mut self.attributes[index]
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&InstanceAttribute> {
        self.attributes.iter().find(|attr| attr.name() == name)
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn set_instance_count(&mut self, count: u32) {
        self.instance_count = count.min(self.capacity as u32);
    }

    pub fn render_order(&self) -> i32 {
        self.render_order
    }

    pub fn set_render_order(&mut self, order: i32) {
        self.render_order = order;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Upload every attribute that was flagged since the last upload.
    /// Returns the number of attributes written.
    pub fn upload(&mut self, ctx: &dyn RenderContext) -> usize {
        profile_function!();
        if self.disposed {
            return 0;
        }
        self.attributes
            .iter_mut()
            .map(|attr| attr.upload(ctx) as usize)
            .sum()
    }

    /// Detach all GPU buffers and mark the mesh disposed. The buffers are
    /// returned for the caller to destroy; the mesh must not be drawn again.
    pub fn dispose(&mut self) -> Vec<GpuBuffer> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        tracing::trace!("Disposed instanced mesh {:?} ({})", self.id, self.label);
        self.attributes
            .iter_mut()
            .filter_map(|attr| attr.release())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatland_test_utils::{MockRenderContext, RenderContext};

    #[test]
    fn test_mesh_ids_are_unique() {
        let a = InstancedMesh::new("a", 1);
        let b = InstancedMesh::new("b", 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_instance_count_clamped_to_capacity() {
        let mut mesh = InstancedMesh::new("m", 4);
        mesh.set_instance_count(10);
        assert_eq!(mesh.instance_count(), 4);
    }

    #[test]
    fn test_upload_only_flagged_attributes() {
        let mock = MockRenderContext::new();
        let mut mesh = InstancedMesh::new("m", 4);
        let color = mesh.push_attribute("color", 4, 1.0);
        mesh.push_attribute("uv", 4, 0.0);

        mesh.attribute_mut(color).mark_needs_update();
        assert_eq!(mesh.upload(&mock), 1);
        assert_eq!(mock.count_buffer_creates(), 1);
    }

    #[test]
    fn test_truncate_and_dispose_release_buffers() {
        let mock = MockRenderContext::new();
        let mut mesh = InstancedMesh::new("m", 2);
        for name in ["a", "b", "c"] {
            let idx = mesh.push_attribute(name, 4, 0.0);
            mesh.attribute_mut(idx).mark_needs_update();
        }
        mesh.upload(&mock);

        let retired = mesh.truncate_attributes(1);
        assert_eq!(mesh.attributes().len(), 1);
        assert_eq!(retired.len(), 2);

        let retired = mesh.dispose();
        assert!(mesh.is_disposed());
        assert_eq!(retired.len(), 1);
        for buffer in &retired {
            mock.destroy_buffer(buffer);
        }
        assert_eq!(mock.count_buffer_destroys(), 1);
        assert_eq!(mesh.upload(&mock), 0);
    }
}
