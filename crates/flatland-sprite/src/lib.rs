//! Batched, incrementally synced 2D sprite rendering.
//!
//! Sprites sharing a render layer and a material are packed into
//! fixed-capacity instanced batches, one draw call each. Per-sprite data
//! (transform, atlas frame, tint, flip and shader effect parameters) lives in
//! tightly packed instance buffers that are rewritten only where something
//! changed.
//!
//! ```
//! use flatland_sprite::{MaterialHandle, SpriteSnapshot, SpriteWorld};
//! use flatland_core::math::Vec3;
//!
//! let mut world = SpriteWorld::default();
//! let material = MaterialHandle::new("tiles");
//! let tile = world.spawn(SpriteSnapshot::new(material.clone()));
//! world.set_position(tile, Vec3::new(16.0, 32.0, 0.0)).unwrap();
//! world.update();
//!
//! assert_eq!(world.draw_calls().len(), 1);
//! assert!(world.binding(tile).unwrap().is_some());
//! ```
//!
//! Each [`SpriteWorld::update`] runs these passes in order:
//!
//! 1. assign newly eligible sprites to a batch slot
//! 2. move sprites whose layer or material changed to another run
//! 3. release sprites that stopped being eligible
//! 4. color, flip and effect writes for sprites that changed
//! 5. transform and UV writes for every batched sprite
//! 6. scene sync of the render group and draw order

mod batch;
mod config;
mod effect;
mod error;
mod material;
mod registry;
mod sheet;
mod snapshot;
mod sort;
mod sprite;
mod systems;
mod world;

pub use batch::SpriteBatch;
pub use config::{MAX_BATCH_SIZE, SpriteConfig};
pub use effect::{
    ColorNodeArgs, EffectClass, EffectClassBuilder, EffectClassId, EffectField, EffectFieldKind,
    EffectInstance,
};
pub use error::{SpriteError, SpriteResult};
pub use material::{
    EffectSchema, MAX_EXACT_EFFECT_BITS, MaterialHandle, MaterialId, SchemaChange, SchemaEntry,
    SpriteMaterial, tier_for,
};
pub use registry::{BatchBinding, BatchRegistry, RunKey, run_key};
pub use sheet::{SpriteSheet, UvRect};
pub use snapshot::{FlipFlags, SpriteSnapshot};
pub use sort::{sort_key, sort_sprites_by_key};
pub use sprite::{Sprite2D, SpriteRuntime, WorldHandle};
pub use world::{DrawCall, Entity, SpriteStats, SpriteWorld};
