//! Allocation and collection types.
//!
//! - Re-exports of hash collections using AHash
//! - [`SparseSet`](sparse_set::SparseSet) with generational indices

pub mod sparse_set;

pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};
