//! Mock implementation of RenderContext for testing.
//!
//! Records every operation and keeps a CPU copy of written bytes so tests can
//! read uploaded instance data back.

use crate::{gpu_types::GpuBuffer, render_context::RenderContext};
use parking_lot::Mutex;
use wgpu::*;

/// A recorded GPU operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    CreateBuffer {
        label: Option<String>,
        size: u64,
        usage: BufferUsages,
    },
    WriteBuffer {
        buffer_id: usize,
        offset: u64,
        size: usize,
    },
    DestroyBuffer {
        buffer_id: usize,
    },
}

#[derive(Debug, Clone)]
struct MockBuffer {
    label: Option<String>,
    contents: Vec<u8>,
    destroyed: bool,
}

/// Mock implementation of RenderContext for testing.
///
/// Uses `parking_lot::Mutex` so `&self` methods can record calls while the
/// type stays `Send + Sync`.
pub struct MockRenderContext {
    calls: Mutex<Vec<RenderCall>>,
    buffers: Mutex<Vec<MockBuffer>>,
}

impl MockRenderContext {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Copy of all recorded calls.
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    pub fn count_buffer_creates(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RenderCall::CreateBuffer { .. }))
            .count()
    }

    pub fn count_buffer_writes(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RenderCall::WriteBuffer { .. }))
            .count()
    }

    pub fn count_buffer_destroys(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RenderCall::DestroyBuffer { .. }))
            .count()
    }

    /// Bytes currently held by a mock buffer.
    pub fn buffer_contents(&self, buffer: &GpuBuffer) -> Option<Vec<u8>> {
        let id = buffer.mock_id()?;
        self.buffers.lock().get(id).map(|b| b.contents.clone())
    }

    /// Contents of a mock buffer reinterpreted as `f32`s.
    pub fn buffer_f32s(&self, buffer: &GpuBuffer) -> Option<Vec<f32>> {
        let bytes = self.buffer_contents(buffer)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Label a buffer was created with.
    pub fn buffer_label(&self, buffer: &GpuBuffer) -> Option<String> {
        let id = buffer.mock_id()?;
        self.buffers.lock().get(id).and_then(|b| b.label.clone())
    }

    pub fn is_destroyed(&self, buffer: &GpuBuffer) -> bool {
        buffer
            .mock_id()
            .and_then(|id| self.buffers.lock().get(id).map(|b| b.destroyed))
            .unwrap_or(false)
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockRenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext for MockRenderContext {
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer {
        let mut buffers = self.buffers.lock();
        let id = buffers.len();

        buffers.push(MockBuffer {
            label: desc.label.map(str::to_string),
            contents: vec![0; desc.size as usize],
            destroyed: false,
        });

        self.calls.lock().push(RenderCall::CreateBuffer {
            label: desc.label.map(str::to_string),
            size: desc.size,
            usage: desc.usage,
        });

        GpuBuffer::mock(id, desc.size)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        let Some(buffer_id) = buffer.mock_id() else {
            return;
        };

        if let Some(mock) = self.buffers.lock().get_mut(buffer_id) {
            let start = offset as usize;
            let end = (start + data.len()).min(mock.contents.len());
            if start < end {
                mock.contents[start..end].copy_from_slice(&data[..end - start]);
            }
        }

        self.calls.lock().push(RenderCall::WriteBuffer {
            buffer_id,
            offset,
            size: data.len(),
        });
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        let Some(buffer_id) = buffer.mock_id() else {
            return;
        };
        if let Some(mock) = self.buffers.lock().get_mut(buffer_id) {
            mock.destroyed = true;
        }
        self.calls.lock().push(RenderCall::DestroyBuffer { buffer_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_buffer(mock: &MockRenderContext, size: u64) -> GpuBuffer {
        mock.create_buffer(&BufferDescriptor {
            label: Some("test_buffer"),
            size,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    #[test]
    fn test_mock_buffer_creation() {
        let mock = MockRenderContext::new();
        let buffer = vertex_buffer(&mock, 1024);

        assert!(buffer.is_mock());
        assert_eq!(buffer.size(), 1024);
        assert_eq!(mock.count_buffer_creates(), 1);
        assert_eq!(mock.buffer_label(&buffer).as_deref(), Some("test_buffer"));
    }

    #[test]
    fn test_mock_buffer_write_keeps_bytes() {
        let mock = MockRenderContext::new();
        let buffer = vertex_buffer(&mock, 16);

        let data = [1.0f32, 2.0];
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        mock.write_buffer(&buffer, 8, &bytes);

        assert_eq!(mock.count_buffer_writes(), 1);
        assert_eq!(mock.buffer_f32s(&buffer), Some(vec![0.0, 0.0, 1.0, 2.0]));
    }

    #[test]
    fn test_write_past_end_is_clamped() {
        let mock = MockRenderContext::new();
        let buffer = vertex_buffer(&mock, 4);

        mock.write_buffer(&buffer, 0, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(mock.buffer_contents(&buffer), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_destroy_and_clear_calls() {
        let mock = MockRenderContext::new();
        let buffer = vertex_buffer(&mock, 64);

        mock.destroy_buffer(&buffer);
        assert!(mock.is_destroyed(&buffer));
        assert_eq!(mock.count_buffer_destroys(), 1);
        assert_eq!(mock.call_count(), 2);

        mock.clear_calls();
        assert_eq!(mock.call_count(), 0);
    }
}
