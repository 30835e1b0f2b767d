//! Math types.
//!
//! CPU-side math uses SIMD-accelerated [`glam`] types.
//!
//! ```
//! use flatland_core::math::{Vec2, Vec3};
//!
//! let position = Vec3::new(10.0, 20.0, 0.0);
//! let velocity = Vec2::new(1.0, 0.5);
//! let moved = position.truncate() + velocity * 0.016;
//! assert!(moved.x > 10.0);
//! ```

pub mod fast {
    pub use glam::*;
}

pub use fast::*;
