//! The per-frame sync passes run by [`SpriteWorld::update`].
//!
//! Order: assign, reassign, remove, color, flip, effects, transform + UV,
//! scene. Every pass visits an entity at most once per frame and flags each
//! touched batch attribute once.

use flatland_core::alloc::HashSet;
use flatland_core::profiling::profile_function;
use flatland_render::MeshId;

use crate::batch::SpriteBatch;
use crate::config::SpriteConfig;
use crate::material::SpriteMaterial;
use crate::registry::{BatchBinding, BatchRegistry, RunKey};
use crate::snapshot::SpriteSnapshot;
use crate::world::{Entity, SpriteWorld};

/// Write every attribute of `state` into `slot`.
pub(crate) fn write_sprite(
    batch: &mut SpriteBatch,
    slot: u32,
    state: &SpriteSnapshot,
    material: &SpriteMaterial,
    config: &SpriteConfig,
) {
    batch.write_color(slot, state.color.to_array());
    batch.write_uv(slot, state.uv);
    batch.write_flip(slot, state.flip.signs());
    write_transform(batch, slot, state, config);
    // a stale batch is rebuilt and rewritten by the effect pass
    if !batch.is_stale(material) {
        write_effects(batch, slot, state, material);
    }
}

#[inline]
pub(crate) fn write_transform(
    batch: &mut SpriteBatch,
    slot: u32,
    state: &SpriteSnapshot,
    config: &SpriteConfig,
) {
    let p = state.position;
    let z = config.depth(p.z, state.layer.unwrap_or(0), state.z_index);
    batch.write_transform(slot, [p.x, p.y, z], state.rotation, state.scale.to_array());
}

/// Rewrite the whole packed effect block: mask, active values and the
/// defaults of every inactive registered effect.
pub(crate) fn write_effects(
    batch: &mut SpriteBatch,
    slot: u32,
    state: &SpriteSnapshot,
    material: &SpriteMaterial,
) {
    let tier = batch.effect_tier();
    if tier == 0 {
        return;
    }
    let mut packed = vec![0.0; tier];
    material.schema().pack(&state.effects, &mut packed);
    batch.write_effects(slot, &packed);
}

/// The batch `binding` points at, if it still holds `entity`.
fn bound_batch(
    registry: &mut BatchRegistry,
    entity: Entity,
    binding: BatchBinding,
) -> Option<&mut SpriteBatch> {
    match registry.batch_mut(binding.batch_idx) {
        Some(batch) if batch.occupant(binding.slot) == Some(entity) => Some(batch),
        _ => {
            tracing::warn!("Skipping {:?}: stale binding {:?}", entity, binding);
            None
        }
    }
}

impl SpriteWorld {
    /// Bind newly eligible sprites to a batch slot and write them in full.
    pub(crate) fn assign_pass(&mut self) {
        profile_function!();
        let mut processed = HashSet::new();
        let mut touched = HashSet::new();
        for &entity in &self.changes.membership {
            if !processed.insert(entity) {
                continue;
            }
            let Some(record) = self.entities.try_get_mut(entity.0) else {
                continue;
            };
            if record.binding.is_some() {
                continue;
            }
            let (Some(layer), Some(material)) = (record.state.layer, record.state.material.clone())
            else {
                tracing::trace!("{:?} is missing a layer or material", entity);
                continue;
            };
            if !record.state.visible {
                continue;
            }
            let Some(binding) = self.registry.allocate(entity, layer, &material) else {
                tracing::warn!("No slot available for {:?}", entity);
                continue;
            };
            if let Some(batch) = self.registry.batch_mut(binding.batch_idx) {
                write_sprite(batch, binding.slot, &record.state, &material.get(), &self.config);
                touched.insert(binding.batch_idx);
            }
            record.binding = Some(binding);
        }
        for idx in touched {
            if let Some(batch) = self.registry.batch_mut(idx) {
                batch.mark_all_dirty();
            }
        }
    }

    /// Move batched sprites whose layer or material changed run.
    pub(crate) fn reassign_pass(&mut self) {
        profile_function!();
        let mut processed = HashSet::new();
        let mut touched = HashSet::new();
        for &entity in &self.changes.sort {
            if !processed.insert(entity) {
                continue;
            }
            let Some(record) = self.entities.try_get_mut(entity.0) else {
                continue;
            };
            let Some(old) = record.binding else {
                continue;
            };
            if !record.state.is_eligible() {
                continue;
            }
            let (Some(layer), Some(material)) = (record.state.layer, record.state.material.clone())
            else {
                continue;
            };
            if RunKey::new(layer, material.id()) == old.run_key {
                tracing::trace!("{:?} stays in run {:#08x}", entity, old.run_key.packed());
                continue;
            }

            self.registry.release(old);
            record.binding = None;
            let Some(binding) = self.registry.allocate(entity, layer, &material) else {
                tracing::warn!("No slot available for {:?}", entity);
                continue;
            };
            if let Some(batch) = self.registry.batch_mut(binding.batch_idx) {
                write_sprite(batch, binding.slot, &record.state, &material.get(), &self.config);
                touched.insert(binding.batch_idx);
            }
            record.binding = Some(binding);
        }
        for idx in touched {
            if let Some(batch) = self.registry.batch_mut(idx) {
                batch.mark_all_dirty();
            }
        }
    }

    /// Unbind sprites that are no longer eligible.
    pub(crate) fn remove_pass(&mut self) {
        profile_function!();
        let mut processed = HashSet::new();
        for &entity in &self.changes.membership {
            if !processed.insert(entity) {
                continue;
            }
            let Some(record) = self.entities.try_get_mut(entity.0) else {
                continue;
            };
            if record.state.is_eligible() {
                continue;
            }
            if let Some(binding) = record.binding.take() {
                self.registry.release(binding);
            }
        }
    }

    pub(crate) fn color_pass(&mut self) {
        profile_function!();
        let mut processed = HashSet::new();
        let mut touched = HashSet::new();
        for &entity in &self.changes.color {
            if !processed.insert(entity) {
                continue;
            }
            let Some(record) = self.entities.try_get(entity.0) else {
                continue;
            };
            let Some(binding) = record.binding else {
                continue;
            };
            let Some(batch) = bound_batch(&mut self.registry, entity, binding) else {
                continue;
            };
            batch.write_color(binding.slot, record.state.color.to_array());
            touched.insert(binding.batch_idx);
        }
        for idx in touched {
            if let Some(batch) = self.registry.batch_mut(idx) {
                batch.mark_color_dirty();
            }
        }
    }

    pub(crate) fn flip_pass(&mut self) {
        profile_function!();
        let mut processed = HashSet::new();
        let mut touched = HashSet::new();
        for &entity in &self.changes.flip {
            if !processed.insert(entity) {
                continue;
            }
            let Some(record) = self.entities.try_get(entity.0) else {
                continue;
            };
            let Some(binding) = record.binding else {
                continue;
            };
            let Some(batch) = bound_batch(&mut self.registry, entity, binding) else {
                continue;
            };
            batch.write_flip(binding.slot, record.state.flip.signs());
            touched.insert(binding.batch_idx);
        }
        for idx in touched {
            if let Some(batch) = self.registry.batch_mut(idx) {
                batch.mark_flip_dirty();
            }
        }
    }

    /// Rebuild batches left behind by a tier upgrade, then rewrite the packed
    /// effect block of every sprite whose effects changed.
    pub(crate) fn effect_pass(&mut self) {
        profile_function!();
        let stale = self.registry.refresh_stale_batches();
        let mut processed = HashSet::new();
        let mut touched = HashSet::new();
        for &entity in stale.iter().chain(self.changes.effects.iter()) {
            if !processed.insert(entity) {
                continue;
            }
            let Some(record) = self.entities.try_get(entity.0) else {
                continue;
            };
            let (Some(binding), Some(material)) = (record.binding, record.state.material.as_ref())
            else {
                continue;
            };
            let Some(batch) = bound_batch(&mut self.registry, entity, binding) else {
                continue;
            };
            if batch.effect_tier() == 0 {
                continue;
            }
            write_effects(batch, binding.slot, &record.state, &material.get());
            touched.insert(binding.batch_idx);
        }
        for idx in touched {
            if let Some(batch) = self.registry.batch_mut(idx) {
                batch.mark_effects_dirty();
            }
        }
    }

    /// Write the transform and UV of every batched sprite, walking each
    /// batch in slot order so dirty ranges grow at the tail.
    pub(crate) fn transform_pass(&mut self) {
        profile_function!();
        let mut occupants = Vec::new();
        for i in 0..self.registry.active_indices().len() {
            let idx = self.registry.active_indices()[i];
            let Some(batch) = self.registry.batch_mut(idx) else {
                continue;
            };
            occupants.clear();
            occupants.extend(batch.occupants());
            if occupants.is_empty() {
                continue;
            }
            for &(slot, entity) in &occupants {
                let Some(record) = self.entities.try_get(entity.0) else {
                    continue;
                };
                write_transform(batch, slot, &record.state, &self.config);
                batch.write_uv(slot, record.state.uv);
            }
            batch.mark_matrix_dirty();
            batch.mark_uv_dirty();
        }
    }

    /// Make the render group hold exactly the active batches.
    pub(crate) fn scene_pass(&mut self) {
        profile_function!();
        self.registry.rebuild_batch_order();
        let active: HashSet<MeshId> = self
            .registry
            .active_batches()
            .map(|(_, batch)| batch.mesh().id())
            .collect();
        self.group.retain(|id| active.contains(id));
        for (_, batch) in self.registry.active_batches() {
            self.group.add(batch.mesh().id());
        }
    }
}
