//! Entity bookkeeping for enrolled sprites.

use glam::{Vec2, Vec3};

use flatland_core::alloc::sparse_set::{IndexSlot, SparseSet};
use flatland_core::profiling::profile_function;
use flatland_render::{Color, MeshId, RenderContext, RenderGroup};

use crate::config::SpriteConfig;
use crate::effect::{EffectClassId, EffectInstance};
use crate::error::{SpriteError, SpriteResult};
use crate::material::MaterialHandle;
use crate::registry::{BatchBinding, BatchRegistry};
use crate::sheet::UvRect;
use crate::snapshot::{FlipFlags, SpriteSnapshot};

/// Generational handle to a sprite in a [`SpriteWorld`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(pub(crate) IndexSlot);

impl Entity {
    pub(crate) fn from_slot(slot: IndexSlot) -> Self {
        Self(slot)
    }

    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }
}

#[derive(Debug)]
pub(crate) struct SpriteRecord {
    pub(crate) state: SpriteSnapshot,
    pub(crate) binding: Option<BatchBinding>,
}

/// Entities touched since the last update, one list per category.
///
/// Lists may hold duplicates and dead entities; passes skip both.
#[derive(Debug, Default)]
pub(crate) struct ChangeLists {
    /// Visibility, layer or material changed.
    pub(crate) membership: Vec<Entity>,
    /// Layer, material or z-index changed.
    pub(crate) sort: Vec<Entity>,
    pub(crate) color: Vec<Entity>,
    pub(crate) flip: Vec<Entity>,
    pub(crate) effects: Vec<Entity>,
}

impl ChangeLists {
    fn clear(&mut self) {
        self.membership.clear();
        self.sort.clear();
        self.color.clear();
        self.flip.clear();
        self.effects.clear();
    }
}

/// One draw call per active batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub mesh: MeshId,
    pub instance_count: u32,
    pub render_order: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpriteStats {
    pub entities: usize,
    pub batched_sprites: usize,
    pub active_batches: usize,
    pub runs: usize,
    pub pooled_batches: usize,
    pub draw_calls: usize,
}

/// Live sprite state plus the batches it is drawn from.
///
/// Setters only record values and the kind of change. [`update`](Self::update)
/// moves sprites between batches and writes the changed values into batch
/// buffers; [`prepare`](Self::prepare) uploads them.
#[derive(Debug)]
pub struct SpriteWorld {
    pub(crate) config: SpriteConfig,
    pub(crate) entities: SparseSet<SpriteRecord>,
    pub(crate) registry: BatchRegistry,
    pub(crate) group: RenderGroup,
    pub(crate) changes: ChangeLists,
    frame: u64,
}

impl Default for SpriteWorld {
    fn default() -> Self {
        Self::with_valid_config(SpriteConfig::default())
    }
}

impl SpriteWorld {
    pub fn new(config: SpriteConfig) -> SpriteResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    pub(crate) fn with_valid_config(config: SpriteConfig) -> Self {
        Self {
            registry: BatchRegistry::new(config.max_batch_size, config.pool_capacity),
            config,
            entities: SparseSet::new(),
            group: RenderGroup::new(),
            changes: ChangeLists::default(),
            frame: 0,
        }
    }

    pub fn config(&self) -> &SpriteConfig {
        &self.config
    }

    /// A new material using this world's minimum effect tier.
    pub fn create_material(&self, name: impl Into<String>) -> MaterialHandle {
        MaterialHandle::with_min_tier(name, self.config.min_effect_tier)
    }

    /// Add a sprite. It is batched on the next update if eligible.
    pub fn spawn(&mut self, state: SpriteSnapshot) -> Entity {
        state.register_effects();
        let entity = Entity(self.entities.push(SpriteRecord {
            state,
            binding: None,
        }));
        self.changes.membership.push(entity);
        entity
    }

    /// Add a sprite with no layer or material.
    pub fn spawn_empty(&mut self) -> Entity {
        self.spawn(SpriteSnapshot::default())
    }

    /// Remove a sprite, releasing its slot immediately. Returns its state.
    pub fn despawn(&mut self, entity: Entity) -> SpriteResult<SpriteSnapshot> {
        let record = self
            .entities
            .try_remove(entity.0)
            .ok_or(SpriteError::UnknownEntity {
                entity: entity.to_bits(),
            })?;
        if let Some(binding) = record.binding {
            self.registry.release(binding);
        }
        Ok(record.state)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(entity.0)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, entity: Entity) -> SpriteResult<&SpriteSnapshot> {
        self.record(entity).map(|record| &record.state)
    }

    /// Current batch binding, or `None` if the sprite is not batched.
    pub fn binding(&self, entity: Entity) -> SpriteResult<Option<BatchBinding>> {
        self.record(entity).map(|record| record.binding)
    }

    fn record(&self, entity: Entity) -> SpriteResult<&SpriteRecord> {
        self.entities
            .try_get(entity.0)
            .ok_or(SpriteError::UnknownEntity {
                entity: entity.to_bits(),
            })
    }

    fn state_mut(&mut self, entity: Entity) -> SpriteResult<&mut SpriteSnapshot> {
        self.entities
            .try_get_mut(entity.0)
            .map(|record| &mut record.state)
            .ok_or(SpriteError::UnknownEntity {
                entity: entity.to_bits(),
            })
    }

    pub fn set_layer(&mut self, entity: Entity, layer: u8) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.layer != Some(layer) {
            state.layer = Some(layer);
            self.changes.membership.push(entity);
            self.changes.sort.push(entity);
        }
        Ok(())
    }

    pub fn clear_layer(&mut self, entity: Entity) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.layer.take().is_some() {
            self.changes.membership.push(entity);
        }
        Ok(())
    }

    /// Switch material. Active effects are registered on the new material.
    pub fn set_material(&mut self, entity: Entity, material: MaterialHandle) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.material.as_ref().is_some_and(|m| m.id() == material.id()) {
            return Ok(());
        }
        state.material = Some(material);
        state.register_effects();
        self.changes.membership.push(entity);
        self.changes.sort.push(entity);
        self.changes.effects.push(entity);
        Ok(())
    }

    pub fn clear_material(&mut self, entity: Entity) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.material.take().is_some() {
            self.changes.membership.push(entity);
        }
        Ok(())
    }

    pub fn set_visible(&mut self, entity: Entity, visible: bool) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.visible != visible {
            state.visible = visible;
            self.changes.membership.push(entity);
        }
        Ok(())
    }

    pub fn set_z_index(&mut self, entity: Entity, z_index: i32) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.z_index != z_index {
            state.z_index = z_index;
            self.changes.sort.push(entity);
        }
        Ok(())
    }

    pub fn set_position(&mut self, entity: Entity, position: Vec3) -> SpriteResult<()> {
        self.state_mut(entity)?.position = position;
        Ok(())
    }

    pub fn set_rotation(&mut self, entity: Entity, rotation: f32) -> SpriteResult<()> {
        self.state_mut(entity)?.rotation = rotation;
        Ok(())
    }

    pub fn set_scale(&mut self, entity: Entity, scale: Vec2) -> SpriteResult<()> {
        self.state_mut(entity)?.scale = scale;
        Ok(())
    }

    pub fn set_uv(&mut self, entity: Entity, uv: UvRect) -> SpriteResult<()> {
        self.state_mut(entity)?.uv = uv;
        Ok(())
    }

    /// Show an atlas frame. Same as [`set_uv`](Self::set_uv).
    pub fn set_frame(&mut self, entity: Entity, frame: UvRect) -> SpriteResult<()> {
        self.set_uv(entity, frame)
    }

    pub fn set_color(&mut self, entity: Entity, color: Color) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.color != color {
            state.color = color;
            self.changes.color.push(entity);
        }
        Ok(())
    }

    pub fn set_alpha(&mut self, entity: Entity, alpha: f32) -> SpriteResult<()> {
        let color = self.get(entity)?.color.with_alpha(alpha);
        self.set_color(entity, color)
    }

    pub fn set_flip(&mut self, entity: Entity, flip: FlipFlags) -> SpriteResult<()> {
        let state = self.state_mut(entity)?;
        if state.flip != flip {
            state.flip = flip;
            self.changes.flip.push(entity);
        }
        Ok(())
    }

    /// Activate an effect, or overwrite the values of an already active
    /// instance of the same class.
    pub fn add_effect(&mut self, entity: Entity, effect: EffectInstance) -> SpriteResult<()> {
        self.state_mut(entity)?.insert_effect(effect);
        self.changes.effects.push(entity);
        Ok(())
    }

    /// Deactivate an effect. Returns the removed instance, if it was active.
    pub fn remove_effect(
        &mut self,
        entity: Entity,
        class: EffectClassId,
    ) -> SpriteResult<Option<EffectInstance>> {
        let removed = self.state_mut(entity)?.take_effect(class);
        if removed.is_some() {
            self.changes.effects.push(entity);
        }
        Ok(removed)
    }

    /// Write one field of an active effect. Returns `false` if the effect is
    /// not active or has no such field.
    pub fn set_effect_field(
        &mut self,
        entity: Entity,
        class: EffectClassId,
        field: &str,
        value: &[f32],
    ) -> SpriteResult<bool> {
        let written = self
            .state_mut(entity)?
            .effect_mut(class)
            .is_some_and(|fx| fx.set(field, value));
        if written {
            self.changes.effects.push(entity);
        }
        Ok(written)
    }

    pub fn effect_field(
        &self,
        entity: Entity,
        class: EffectClassId,
        field: &str,
    ) -> SpriteResult<Option<Vec<f32>>> {
        Ok(self
            .get(entity)?
            .effect(class)
            .and_then(|fx| fx.get(field))
            .map(<[f32]>::to_vec))
    }

    /// Run every sync pass once.
    pub fn update(&mut self) {
        profile_function!();
        self.assign_pass();
        self.reassign_pass();
        self.remove_pass();
        self.color_pass();
        self.flip_pass();
        self.effect_pass();
        self.transform_pass();
        self.scene_pass();
        self.changes.clear();
        self.frame += 1;
    }

    /// Upload every changed batch buffer and destroy buffers of recycled
    /// geometry. Returns the number of attributes written.
    pub fn prepare(&mut self, ctx: &dyn RenderContext) -> usize {
        self.registry.upload(ctx)
    }

    /// Number of completed updates.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// The scene container holding one mesh per active batch.
    pub fn render_group(&self) -> &RenderGroup {
        &self.group
    }

    /// Draw calls in render order.
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        let mut calls: Vec<DrawCall> = self
            .registry
            .active_batches()
            .map(|(_, batch)| DrawCall {
                mesh: batch.mesh().id(),
                instance_count: batch.mesh().instance_count(),
                render_order: batch.mesh().render_order(),
            })
            .collect();
        calls.sort_by_key(|call| call.render_order);
        calls
    }

    pub fn stats(&self) -> SpriteStats {
        let batched_sprites = self
            .registry
            .active_batches()
            .map(|(_, batch)| batch.active_count() as usize)
            .sum();
        SpriteStats {
            entities: self.entities.len(),
            batched_sprites,
            active_batches: self.registry.batch_count(),
            runs: self.registry.run_count(),
            pooled_batches: self.registry.pool_len(),
            draw_calls: self.group.len(),
        }
    }

    pub(crate) fn retire(&mut self, buffers: Vec<flatland_render::GpuBuffer>) {
        self.registry.retire(buffers);
    }
}
