use crate::error::{SpriteError, SpriteResult};

/// Largest supported batch capacity.
pub const MAX_BATCH_SIZE: u32 = 65_536;

/// Tunables for a [`SpriteWorld`](crate::SpriteWorld).
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteConfig {
    /// Slot capacity of every batch.
    pub max_batch_size: u32,
    /// Smallest packed effect tier a material uses once it has an effect.
    pub min_effect_tier: usize,
    /// Z bias added per render layer.
    pub layer_depth_step: f32,
    /// Z bias added per z-index unit.
    pub z_index_depth_step: f32,
    /// Number of empty batch containers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for SpriteConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8192,
            min_effect_tier: 8,
            layer_depth_step: 10.0,
            z_index_depth_step: 0.001,
            pool_capacity: 64,
        }
    }
}

impl SpriteConfig {
    pub fn with_max_batch_size(mut self, size: u32) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_min_effect_tier(mut self, tier: usize) -> Self {
        self.min_effect_tier = tier;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn validate(&self) -> SpriteResult<()> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(SpriteError::InvalidConfig {
                field: "max_batch_size",
                reason: format!("must be in 1..={}, got {}", MAX_BATCH_SIZE, self.max_batch_size),
            });
        }
        if self.min_effect_tier % 4 != 0 {
            return Err(SpriteError::InvalidConfig {
                field: "min_effect_tier",
                reason: format!("must be a multiple of 4, got {}", self.min_effect_tier),
            });
        }
        if !self.layer_depth_step.is_finite() || !self.z_index_depth_step.is_finite() {
            return Err(SpriteError::InvalidConfig {
                field: "depth_step",
                reason: "depth steps must be finite".to_string(),
            });
        }
        Ok(())
    }

    /// Depth written for a sprite at `z` on `layer` with `z_index`.
    #[inline]
    pub fn depth(&self, z: f32, layer: u8, z_index: i32) -> f32 {
        z + layer as f32 * self.layer_depth_step + z_index as f32 * self.z_index_depth_step
    }
}
