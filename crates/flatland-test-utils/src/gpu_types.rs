//! GPU resource wrappers that can be real or mock.

/// Wrapper around a GPU buffer that can be real or mock.
///
/// Cloning is cheap: real buffers are reference counted by wgpu, mock buffers
/// are just an id.
#[derive(Clone, Debug)]
pub struct GpuBuffer {
    inner: GpuBufferInner,
}

#[derive(Clone, Debug)]
enum GpuBufferInner {
    Real(wgpu::Buffer),
    #[cfg(feature = "mock")]
    Mock { id: usize, size: u64 },
}

impl GpuBuffer {
    /// Create from a real WGPU buffer.
    pub fn from_wgpu(buffer: wgpu::Buffer) -> Self {
        Self {
            inner: GpuBufferInner::Real(buffer),
        }
    }

    /// Create a mock buffer (for testing).
    #[cfg(feature = "mock")]
    pub fn mock(id: usize, size: u64) -> Self {
        Self {
            inner: GpuBufferInner::Mock { id, size },
        }
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        match &self.inner {
            GpuBufferInner::Real(buffer) => buffer.size(),
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock { size, .. } => *size,
        }
    }

    /// Get the underlying wgpu::Buffer, if real.
    pub fn as_wgpu(&self) -> Option<&wgpu::Buffer> {
        match &self.inner {
            GpuBufferInner::Real(buffer) => Some(buffer),
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock { .. } => None,
        }
    }

    /// Check if this is a mock.
    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuBufferInner::Mock { .. })
    }

    /// Get the mock ID (for test assertions).
    pub fn mock_id(&self) -> Option<usize> {
        match &self.inner {
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock { id, .. } => Some(*id),
            _ => None,
        }
    }
}
