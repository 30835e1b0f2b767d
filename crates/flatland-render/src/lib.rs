//! Flatland render plumbing.
//!
//! The pieces of a host graphics engine the sprite batcher relies on:
//!
//! - [`InstanceAttribute`]: a CPU-side per-instance float array mirrored into a
//!   GPU vertex buffer, with dirty-range tracking and a needs-update version
//! - [`InstancedMesh`]: an instanced draw unit (one draw call) owning a set of
//!   attributes, an instance count and a render order
//! - [`RenderGroup`]: a parent container with ordered child add/remove
//! - [`GraphicsContext`]: a headless wgpu device/queue implementing
//!   [`RenderContext`]

mod attribute;
mod color;
mod context;
mod dirty_ranges;
mod group;
mod instanced;

pub use attribute::*;
pub use color::*;
pub use context::*;
pub use dirty_ranges::*;
pub use group::*;
pub use instanced::*;

pub use flatland_test_utils::{GpuBuffer, RenderContext};
pub use wgpu;
