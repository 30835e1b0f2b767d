//! Flatland Core
//!
//! Shared utilities for the Flatland crates: logging, profiling, collections and math.

pub mod alloc;
pub mod logging;
pub mod math;
pub mod profiling;
