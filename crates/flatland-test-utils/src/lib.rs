//! Test utilities for Flatland.
//!
//! - [`RenderContext`] - Trait abstracting the GPU buffer operations the sprite
//!   batcher needs
//! - `MockRenderContext` - Recording implementation for tests (requires `mock` feature)
//! - [`GpuBuffer`] - Owned buffer wrapper that can be real or mock
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use flatland_test_utils::{MockRenderContext, RenderContext};
//! use wgpu::*;
//!
//! let mock = MockRenderContext::new();
//! let buffer = mock.create_buffer(&BufferDescriptor {
//!     label: Some("instance_color"),
//!     size: 64,
//!     usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
//!     mapped_at_creation: false,
//! });
//! mock.write_buffer(&buffer, 0, &[0u8; 16]);
//!
//! assert_eq!(mock.count_buffer_creates(), 1);
//! assert_eq!(mock.count_buffer_writes(), 1);
//! # }
//! ```

pub mod gpu_types;
#[cfg(feature = "mock")]
pub mod mock_render;
pub mod render_context;

pub use gpu_types::*;
#[cfg(feature = "mock")]
pub use mock_render::*;
pub use render_context::*;
