//! Fixed-capacity instanced sprite batches.

use flatland_core::profiling::profile_function;
use flatland_render::{GpuBuffer, InstancedMesh, RenderContext};

use crate::material::{MaterialId, SpriteMaterial};
use crate::sheet::UvRect;
use crate::world::Entity;

const MATRIX: usize = 0;
const UV: usize = 1;
const COLOR: usize = 2;
const FLIP: usize = 3;
const EFFECT_BASE: usize = 4;

/// One instanced draw: up to `max_size` sprites sharing a layer and a
/// material.
///
/// Slots are handed out from a LIFO free list first, then sequentially.
/// Freed slots stay inside the drawn range with their alpha forced to zero,
/// so the instance count is the high-water mark rather than the live count.
///
/// The `write_*` methods only touch CPU data. Callers flag the attribute with
/// the matching `mark_*_dirty` once per pass.
#[derive(Debug)]
pub struct SpriteBatch {
    mesh: InstancedMesh,
    material_id: MaterialId,
    schema_version: u32,
    effect_vec4s: usize,
    max_size: u32,
    free: Vec<u32>,
    next_slot: u32,
    active: u32,
    live: Vec<bool>,
    occupants: Vec<Option<Entity>>,
}

fn build_mesh(material: &SpriteMaterial, max_size: u32) -> InstancedMesh {
    let mut mesh = InstancedMesh::new(
        format!("sprite batch ({})", material.name()),
        max_size as usize,
    );
    mesh.push_attribute("instance_matrix", 16, 0.0);
    mesh.push_attribute("uv", 4, 0.0);
    mesh.push_attribute("color", 4, 0.0);
    mesh.push_attribute("flip", 2, 1.0);
    for k in 0..material.schema().vec4_count() {
        mesh.push_attribute(format!("effect_buf{k}"), 4, 0.0);
    }
    mesh
}

impl SpriteBatch {
    pub fn new(material: &SpriteMaterial, max_size: u32) -> Self {
        Self {
            mesh: build_mesh(material, max_size),
            material_id: material.id(),
            schema_version: material.schema().version(),
            effect_vec4s: material.schema().vec4_count(),
            max_size,
            free: Vec::new(),
            next_slot: 0,
            active: 0,
            live: vec![false; max_size as usize],
            occupants: vec![None; max_size as usize],
        }
    }

    /// Take a free slot, or `None` when the batch is full.
    pub fn allocate_slot(&mut self) -> Option<u32> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.next_slot < self.max_size => {
                self.next_slot += 1;
                self.next_slot - 1
            }
            None => return None,
        };
        self.live[slot as usize] = true;
        self.active += 1;
        Some(slot)
    }

    /// Return `slot` to the free list and hide it by zeroing its alpha.
    pub fn free_slot(&mut self, slot: u32) {
        if !self.live.get(slot as usize).copied().unwrap_or(false) {
            tracing::warn!("Ignoring free of unallocated slot {}", slot);
            return;
        }
        let color = self.mesh.attribute_mut(COLOR);
        color.set_component(slot as usize, 3, 0.0);
        color.mark_needs_update();
        self.occupants[slot as usize] = None;
        self.live[slot as usize] = false;
        self.free.push(slot);
        self.active -= 1;
    }

    /// Set the drawn instance count to the high-water slot count.
    pub fn sync_count(&mut self) {
        self.mesh.set_instance_count(self.next_slot);
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty() && self.next_slot >= self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn active_count(&self) -> u32 {
        self.active
    }

    pub fn capacity(&self) -> u32 {
        self.max_size
    }

    /// Slots handed out sequentially so far.
    pub fn high_water(&self) -> u32 {
        self.next_slot
    }

    pub fn occupant(&self, slot: u32) -> Option<Entity> {
        self.occupants.get(slot as usize).copied().flatten()
    }

    pub(crate) fn set_occupant(&mut self, slot: u32, entity: Entity) {
        self.occupants[slot as usize] = Some(entity);
    }

    /// Live occupants with their slots.
    pub fn occupants(&self) -> impl Iterator<Item = (u32, Entity)> + '_ {
        self.occupants
            .iter()
            .take(self.next_slot as usize)
            .enumerate()
            .filter_map(|(slot, e)| e.map(|e| (slot as u32, e)))
    }

    #[inline]
    pub fn write_color(&mut self, slot: u32, rgba: [f32; 4]) {
        self.mesh.attribute_mut(COLOR).set(slot as usize, &rgba);
    }

    #[inline]
    pub fn write_uv(&mut self, slot: u32, uv: UvRect) {
        self.mesh.attribute_mut(UV).set(slot as usize, &uv.to_array());
    }

    #[inline]
    pub fn write_flip(&mut self, slot: u32, flip: [f32; 2]) {
        self.mesh.attribute_mut(FLIP).set(slot as usize, &flip);
    }

    #[inline]
    pub fn write_matrix(&mut self, slot: u32, matrix: &[f32; 16]) {
        self.mesh.attribute_mut(MATRIX).set(slot as usize, matrix);
    }

    /// Write a column-major 2D affine transform with depth `z`.
    ///
    /// An unrotated sprite skips the trig entirely.
    #[inline]
    pub fn write_transform(&mut self, slot: u32, translation: [f32; 3], rotation: f32, scale: [f32; 2]) {
        let [x, y, z] = translation;
        let [sx, sy] = scale;
        let matrix = if rotation == 0.0 {
            [
                sx, 0.0, 0.0, 0.0, //
                0.0, sy, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
                x, y, z, 1.0,
            ]
        } else {
            let (s, c) = rotation.sin_cos();
            [
                c * sx, s * sx, 0.0, 0.0, //
                -s * sy, c * sy, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
                x, y, z, 1.0,
            ]
        };
        self.write_matrix(slot, &matrix);
    }

    /// Write one packed effect float. Out-of-tier offsets are ignored.
    #[inline]
    pub fn write_effect_slot(&mut self, slot: u32, offset: usize, value: f32) {
        let k = offset / 4;
        if k >= self.effect_vec4s {
            tracing::trace!("Effect offset {} outside tier {}", offset, self.effect_vec4s * 4);
            return;
        }
        self.mesh
            .attribute_mut(EFFECT_BASE + k)
            .set_component(slot as usize, offset % 4, value);
    }

    /// Write a whole packed effect block, spread across the vec4 attributes.
    pub fn write_effects(&mut self, slot: u32, packed: &[f32]) {
        for (k, chunk) in packed.chunks(4).take(self.effect_vec4s).enumerate() {
            self.mesh.attribute_mut(EFFECT_BASE + k).set(slot as usize, chunk);
        }
    }

    pub fn color(&self, slot: u32) -> [f32; 4] {
        to_array(self.mesh.attribute(COLOR).get(slot as usize))
    }

    pub fn uv(&self, slot: u32) -> UvRect {
        UvRect::from(to_array(self.mesh.attribute(UV).get(slot as usize)))
    }

    pub fn flip(&self, slot: u32) -> [f32; 2] {
        to_array(self.mesh.attribute(FLIP).get(slot as usize))
    }

    pub fn matrix(&self, slot: u32) -> [f32; 16] {
        to_array(self.mesh.attribute(MATRIX).get(slot as usize))
    }

    /// The packed effect block of `slot`, `tier` floats long.
    pub fn effects(&self, slot: u32) -> Vec<f32> {
        (0..self.effect_vec4s)
            .flat_map(|k| self.mesh.attribute(EFFECT_BASE + k).get(slot as usize).to_vec())
            .collect()
    }

    pub fn effect_value(&self, slot: u32, offset: usize) -> Option<f32> {
        let k = offset / 4;
        (k < self.effect_vec4s)
            .then(|| self.mesh.attribute(EFFECT_BASE + k).get(slot as usize)[offset % 4])
    }

    pub fn mark_matrix_dirty(&mut self) {
        self.mesh.attribute_mut(MATRIX).mark_needs_update();
    }

    pub fn mark_uv_dirty(&mut self) {
        self.mesh.attribute_mut(UV).mark_needs_update();
    }

    pub fn mark_color_dirty(&mut self) {
        self.mesh.attribute_mut(COLOR).mark_needs_update();
    }

    pub fn mark_flip_dirty(&mut self) {
        self.mesh.attribute_mut(FLIP).mark_needs_update();
    }

    pub fn mark_effects_dirty(&mut self) {
        for k in 0..self.effect_vec4s {
            self.mesh.attribute_mut(EFFECT_BASE + k).mark_needs_update();
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.mark_matrix_dirty();
        self.mark_uv_dirty();
        self.mark_color_dirty();
        self.mark_flip_dirty();
        self.mark_effects_dirty();
    }

    pub fn material_id(&self) -> MaterialId {
        self.material_id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Floats in the packed effect block.
    pub fn effect_tier(&self) -> usize {
        self.effect_vec4s * 4
    }

    /// The batch was built for an older layout of `material`.
    pub fn is_stale(&self, material: &SpriteMaterial) -> bool {
        self.schema_version != material.schema().version()
    }

    /// The buffers can be reused as-is for `material`.
    pub fn is_compatible(&self, material: &SpriteMaterial) -> bool {
        self.material_id == material.id() && !self.is_stale(material)
    }

    /// Reallocate the effect attributes for the material's current tier.
    ///
    /// Packed effect data is lost; callers rewrite every occupant. Returns
    /// the GPU buffers of the dropped attributes.
    pub fn rebuild_effect_buffers(&mut self, material: &SpriteMaterial) -> Vec<GpuBuffer> {
        let schema = material.schema();
        let retired = self.mesh.truncate_attributes(EFFECT_BASE);
        for k in 0..schema.vec4_count() {
            let idx = self.mesh.push_attribute(format!("effect_buf{k}"), 4, 0.0);
            self.mesh.attribute_mut(idx).mark_needs_update();
        }
        tracing::debug!(
            "Rebuilt effect buffers of {:?}: tier {} -> {} (schema v{})",
            self.mesh.id(),
            self.effect_vec4s * 4,
            schema.tier(),
            schema.version()
        );
        self.effect_vec4s = schema.vec4_count();
        self.schema_version = schema.version();
        retired
    }

    /// Empty the batch for reuse by another run of the same material.
    pub(crate) fn reset(&mut self) {
        self.free.clear();
        self.next_slot = 0;
        self.active = 0;
        self.live.fill(false);
        self.occupants.fill(None);
        self.mesh.set_instance_count(0);
    }

    /// Empty the batch and rebuild its geometry for `material`. Returns the
    /// old GPU buffers.
    pub(crate) fn reinit(&mut self, material: &SpriteMaterial) -> Vec<GpuBuffer> {
        let retired = self.mesh.dispose();
        self.reset();
        self.mesh = build_mesh(material, self.max_size);
        self.material_id = material.id();
        self.schema_version = material.schema().version();
        self.effect_vec4s = material.schema().vec4_count();
        retired
    }

    pub fn mesh(&self) -> &InstancedMesh {
        &self.mesh
    }

    pub(crate) fn set_render_order(&mut self, order: i32) {
        self.mesh.set_render_order(order);
    }

    /// Upload flagged attributes. Returns the number written.
    pub fn upload(&mut self, ctx: &dyn RenderContext) -> usize {
        profile_function!();
        self.mesh.upload(ctx)
    }

    /// Release the GPU geometry. The material is not touched.
    pub fn dispose(&mut self) -> Vec<GpuBuffer> {
        self.mesh.dispose()
    }
}

fn to_array<const N: usize>(values: &[f32]) -> [f32; N] {
    let mut out = [0.0; N];
    out.copy_from_slice(&values[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectClass;

    fn material() -> SpriteMaterial {
        SpriteMaterial::new("test", 8)
    }

    #[test]
    fn test_sequential_then_full() {
        let mut batch = SpriteBatch::new(&material(), 2);
        assert_eq!(batch.allocate_slot(), Some(0));
        assert_eq!(batch.allocate_slot(), Some(1));
        assert!(batch.is_full());
        assert_eq!(batch.allocate_slot(), None);
    }

    #[test]
    fn test_freed_slots_reused_lifo_before_fresh_ones() {
        let mut batch = SpriteBatch::new(&material(), 8);
        for _ in 0..4 {
            batch.allocate_slot();
        }
        batch.free_slot(1);
        batch.free_slot(3);
        assert_eq!(batch.allocate_slot(), Some(3));
        assert_eq!(batch.allocate_slot(), Some(1));
        assert_eq!(batch.allocate_slot(), Some(4));
    }

    #[test]
    fn test_free_zeroes_alpha_until_rewritten() {
        let mut batch = SpriteBatch::new(&material(), 4);
        let slot = batch.allocate_slot().unwrap();
        batch.write_color(slot, [1.0, 0.5, 0.25, 1.0]);
        batch.free_slot(slot);
        assert_eq!(batch.color(slot)[3], 0.0);
        assert_eq!(batch.color(slot)[0], 1.0);

        let again = batch.allocate_slot().unwrap();
        assert_eq!(again, slot);
        assert_eq!(batch.color(slot)[3], 0.0);
        batch.write_color(slot, [1.0, 1.0, 1.0, 0.8]);
        assert_eq!(batch.color(slot)[3], 0.8);
    }

    #[test]
    fn test_count_tracks_high_water_not_live() {
        let mut batch = SpriteBatch::new(&material(), 4);
        for _ in 0..3 {
            batch.allocate_slot();
        }
        batch.free_slot(2);
        batch.free_slot(0);
        batch.sync_count();
        assert_eq!(batch.mesh().instance_count(), 3);
        assert_eq!(batch.active_count(), 1);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_double_free_ignored() {
        let mut batch = SpriteBatch::new(&material(), 4);
        let slot = batch.allocate_slot().unwrap();
        batch.free_slot(slot);
        batch.free_slot(slot);
        assert!(batch.is_empty());
        assert_eq!(batch.allocate_slot(), Some(0));
        assert_eq!(batch.allocate_slot(), Some(1));
    }

    #[test]
    fn test_transform_without_rotation() {
        let mut batch = SpriteBatch::new(&material(), 1);
        batch.write_transform(0, [3.0, 4.0, 5.0], 0.0, [2.0, 0.5]);
        let m = batch.matrix(0);
        assert_eq!(m[0], 2.0);
        assert_eq!(m[5], 0.5);
        assert_eq!(&m[12..15], &[3.0, 4.0, 5.0]);
        assert_eq!(m[1], 0.0);
    }

    #[test]
    fn test_transform_with_rotation() {
        let mut batch = SpriteBatch::new(&material(), 1);
        batch.write_transform(0, [0.0, 0.0, 0.0], std::f32::consts::FRAC_PI_2, [2.0, 1.0]);
        let m = batch.matrix(0);
        assert!(m[0].abs() < 1e-6);
        assert!((m[1] - 2.0).abs() < 1e-6);
        assert!((m[4] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_effect_buffers_follow_tier() {
        let mut material = material();
        let batch = SpriteBatch::new(&material, 4);
        assert_eq!(batch.effect_tier(), 0);

        let fx = EffectClass::builder("fx").float("a", 0.0).build();
        material.register_effect(&fx);
        let mut batch = batch;
        assert!(batch.is_stale(&material));
        batch.rebuild_effect_buffers(&material);
        assert!(!batch.is_stale(&material));
        assert_eq!(batch.effect_tier(), 8);

        batch.write_effects(0, &[1.0, 0.75, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(batch.effect_value(0, 1), Some(0.75));
        batch.write_effect_slot(0, 5, 2.0);
        assert_eq!(batch.effects(0)[5], 2.0);
        assert_eq!(batch.effect_value(0, 8), None);
    }

    #[test]
    fn test_reinit_for_other_material() {
        let a = material();
        let b = SpriteMaterial::new("other", 8);
        let mut batch = SpriteBatch::new(&a, 4);
        batch.allocate_slot();
        assert!(!batch.is_compatible(&b));
        batch.reinit(&b);
        assert!(batch.is_compatible(&b));
        assert!(batch.is_empty());
        assert_eq!(batch.high_water(), 0);
    }
}
