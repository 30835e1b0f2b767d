//! Grouping of sprites into runs and batches.
//!
//! A run is every batch sharing one `(layer, material)` pair. Runs are kept
//! in a sorted [`RunKey`] array so walking it yields the global draw order. Batches
//! live in a flat index-addressed array; sprites only ever hold a
//! [`BatchBinding`] into it.

use flatland_core::alloc::HashMap;
use flatland_core::profiling::profile_function;
use flatland_render::{GpuBuffer, RenderContext};

use crate::batch::SpriteBatch;
use crate::material::{MaterialHandle, MaterialId};
use crate::world::Entity;

/// Pack a layer and material id into a sortable run key.
#[inline]
pub fn run_key(layer: u8, material: MaterialId) -> u32 {
    ((layer as u32 & 0xFF) << 16) | (material.raw() & 0xFFFF)
}

/// Identity of a run.
///
/// Orders by the packed [`run_key`], then by the full material id, so two
/// materials whose ids agree in the low 16 bits still get separate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    packed: u32,
    layer: u8,
    material: MaterialId,
}

impl RunKey {
    pub fn new(layer: u8, material: MaterialId) -> Self {
        Self {
            packed: run_key(layer, material),
            layer,
            material,
        }
    }

    pub fn packed(self) -> u32 {
        self.packed
    }

    pub fn layer(self) -> u8 {
        self.layer
    }

    pub fn material(self) -> MaterialId {
        self.material
    }
}

/// Where a sprite lives: a batch index into the registry and a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchBinding {
    pub batch_idx: u32,
    pub slot: u32,
    pub run_key: RunKey,
}

#[derive(Debug)]
struct Run {
    material: MaterialHandle,
    /// Batch indices in insertion order.
    batches: Vec<u32>,
}

/// Owner of every batch container.
#[derive(Debug)]
pub struct BatchRegistry {
    max_batch_size: u32,
    pool_capacity: usize,
    runs: HashMap<RunKey, Run>,
    run_keys: Vec<RunKey>,
    batch_slots: Vec<Option<SpriteBatch>>,
    free_indices: Vec<u32>,
    pool: Vec<SpriteBatch>,
    active: Vec<u32>,
    order_dirty: bool,
    retired: Vec<GpuBuffer>,
    containers_built: usize,
    containers_reused: usize,
}

impl BatchRegistry {
    pub fn new(max_batch_size: u32, pool_capacity: usize) -> Self {
        Self {
            max_batch_size,
            pool_capacity,
            runs: HashMap::new(),
            run_keys: Vec::new(),
            batch_slots: Vec::new(),
            free_indices: Vec::new(),
            pool: Vec::new(),
            active: Vec::new(),
            order_dirty: false,
            retired: Vec::new(),
            containers_built: 0,
            containers_reused: 0,
        }
    }

    /// Look up the run for `(layer, material)`, creating it on a miss.
    pub fn get_or_create_run(&mut self, layer: u8, material: &MaterialHandle) -> RunKey {
        let key = RunKey::new(layer, material.id());
        if !self.runs.contains_key(&key) {
            if let Err(pos) = self.run_keys.binary_search(&key) {
                self.run_keys.insert(pos, key);
            }
            self.runs.insert(
                key,
                Run {
                    material: material.clone(),
                    batches: Vec::new(),
                },
            );
            tracing::debug!(
                "Created run {:#08x} (layer {}, material {:?})",
                key.packed(),
                layer,
                material.id()
            );
        }
        key
    }

    /// A batch of run `key` with a free slot, adding one if every batch is full.
    ///
    /// Returns `None` only if the run does not exist.
    pub fn find_or_create_batch(&mut self, key: RunKey) -> Option<u32> {
        let run = self.runs.get(&key)?;
        for &idx in &run.batches {
            if let Some(batch) = self.batch_slots[idx as usize].as_ref()
                && batch.material_id() == key.material()
                && !batch.is_full()
            {
                return Some(idx);
            }
        }

        let material = run.material.clone();
        let batch = self.take_container(&material);
        let idx = match self.free_indices.pop() {
            Some(idx) => {
                self.batch_slots[idx as usize] = Some(batch);
                idx
            }
            None => {
                self.batch_slots.push(Some(batch));
                self.batch_slots.len() as u32 - 1
            }
        };
        if let Some(run) = self.runs.get_mut(&key) {
            run.batches.push(idx);
        }
        self.active.push(idx);
        self.order_dirty = true;
        Some(idx)
    }

    /// Pop a pooled container, preferring one whose buffers already match
    /// `material`; otherwise build a new one.
    fn take_container(&mut self, material: &MaterialHandle) -> SpriteBatch {
        let material = material.get();
        if let Some(pos) = self.pool.iter().position(|b| b.is_compatible(&material)) {
            let mut batch = self.pool.swap_remove(pos);
            batch.reset();
            self.containers_reused += 1;
            tracing::debug!("Reused pooled batch {:?} as-is", batch.mesh().id());
            return batch;
        }
        if let Some(mut batch) = self.pool.pop() {
            let retired = batch.reinit(&material);
            self.retired.extend(retired);
            self.containers_reused += 1;
            tracing::debug!(
                "Reused pooled batch container with new buffers for '{}'",
                material.name()
            );
            return batch;
        }
        self.containers_built += 1;
        tracing::debug!("Created batch for '{}'", material.name());
        SpriteBatch::new(&material, self.max_batch_size)
    }

    /// Bind `entity` to a free slot of the `(layer, material)` run.
    pub fn allocate(&mut self, entity: Entity, layer: u8, material: &MaterialHandle) -> Option<BatchBinding> {
        let key = self.get_or_create_run(layer, material);
        let batch_idx = self.find_or_create_batch(key)?;
        let batch = self.batch_slots[batch_idx as usize].as_mut()?;
        let Some(slot) = batch.allocate_slot() else {
            tracing::warn!("Batch {} has no free slot", batch_idx);
            self.recycle_batch_if_empty(batch_idx, key);
            return None;
        };
        batch.set_occupant(slot, entity);
        batch.sync_count();
        Some(BatchBinding {
            batch_idx,
            slot,
            run_key: key,
        })
    }

    /// Free the slot named by `binding` and recycle its batch if it emptied.
    pub fn release(&mut self, binding: BatchBinding) {
        let Some(batch) = self.batch_mut(binding.batch_idx) else {
            tracing::warn!("Stale binding {:?}: batch is gone", binding);
            return;
        };
        batch.free_slot(binding.slot);
        batch.sync_count();
        self.recycle_batch_if_empty(binding.batch_idx, binding.run_key);
    }

    /// Move an empty batch out of its run and into the pool. Returns `true`
    /// if the batch was recycled.
    pub fn recycle_batch_if_empty(&mut self, batch_idx: u32, key: RunKey) -> bool {
        let Some(slot) = self.batch_slots.get_mut(batch_idx as usize) else {
            return false;
        };
        if !slot.as_ref().is_some_and(|batch| batch.is_empty()) {
            return false;
        }
        let Some(mut batch) = slot.take() else {
            return false;
        };
        self.free_indices.push(batch_idx);
        self.active.retain(|&idx| idx != batch_idx);
        self.order_dirty = true;

        let run_emptied = match self.runs.get_mut(&key) {
            Some(run) => {
                run.batches.retain(|&idx| idx != batch_idx);
                run.batches.is_empty()
            }
            None => false,
        };
        if run_emptied {
            self.runs.remove(&key);
            if let Ok(pos) = self.run_keys.binary_search(&key) {
                self.run_keys.remove(pos);
            }
            tracing::debug!("Removed empty run {:#08x}", key.packed());
        }

        if self.pool.len() < self.pool_capacity {
            batch.reset();
            tracing::debug!("Recycled batch {:?} into pool", batch.mesh().id());
            self.pool.push(batch);
        } else {
            self.retired.extend(batch.dispose());
            tracing::debug!("Pool full, disposed batch {:?}", batch.mesh().id());
        }
        true
    }

    /// Recompute render order by walking runs in key order and each run's
    /// batches in insertion order. Does nothing unless the order is dirty.
    pub fn rebuild_batch_order(&mut self) -> bool {
        if !self.order_dirty {
            return false;
        }
        profile_function!();
        self.active.clear();
        for key in &self.run_keys {
            if let Some(run) = self.runs.get(key) {
                self.active.extend_from_slice(&run.batches);
            }
        }
        for (order, &idx) in self.active.iter().enumerate() {
            if let Some(batch) = self.batch_slots[idx as usize].as_mut() {
                batch.set_render_order(order as i32);
            }
        }
        self.order_dirty = false;
        true
    }

    pub fn is_order_dirty(&self) -> bool {
        self.order_dirty
    }

    /// Rebuild the effect buffers of every batch whose material schema moved
    /// on. Returns the occupants whose effect data must be rewritten.
    pub fn refresh_stale_batches(&mut self) -> Vec<Entity> {
        let mut occupants = Vec::new();
        for run in self.runs.values() {
            let material = run.material.get();
            for &idx in &run.batches {
                let Some(batch) = self.batch_slots[idx as usize].as_mut() else {
                    continue;
                };
                if batch.is_stale(&material) {
                    self.retired.extend(batch.rebuild_effect_buffers(&material));
                    occupants.extend(batch.occupants().map(|(_, entity)| entity));
                }
            }
        }
        occupants
    }

    pub fn batch(&self, batch_idx: u32) -> Option<&SpriteBatch> {
        self.batch_slots.get(batch_idx as usize)?.as_ref()
    }

    pub fn batch_mut(&mut self, batch_idx: u32) -> Option<&mut SpriteBatch> {
        self.batch_slots.get_mut(batch_idx as usize)?.as_mut()
    }

    /// Active batch indices, in render order once
    /// [`rebuild_batch_order`](Self::rebuild_batch_order) has run.
    pub fn active_indices(&self) -> &[u32] {
        &self.active
    }

    pub fn active_batches(&self) -> impl Iterator<Item = (u32, &SpriteBatch)> + '_ {
        self.active
            .iter()
            .filter_map(|&idx| self.batch(idx).map(|batch| (idx, batch)))
    }

    pub fn batch_count(&self) -> usize {
        self.active.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Sorted run keys.
    pub fn run_keys(&self) -> &[RunKey] {
        &self.run_keys
    }

    /// Batch indices of run `key` in insertion order.
    pub fn run_batches(&self, key: RunKey) -> &[u32] {
        self.runs.get(&key).map(|run| run.batches.as_slice()).unwrap_or(&[])
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Batch containers built from scratch so far.
    pub fn containers_built(&self) -> usize {
        self.containers_built
    }

    /// Batch containers taken from the pool so far.
    pub fn containers_reused(&self) -> usize {
        self.containers_reused
    }

    pub(crate) fn retire(&mut self, buffers: impl IntoIterator<Item = GpuBuffer>) {
        self.retired.extend(buffers);
    }

    /// GPU buffers detached from recycled or rebuilt geometry, awaiting
    /// destruction.
    pub fn take_retired(&mut self) -> Vec<GpuBuffer> {
        std::mem::take(&mut self.retired)
    }

    /// Upload every active batch's flagged attributes, then destroy the
    /// retired buffers. Returns the number of attributes written.
    pub fn upload(&mut self, ctx: &dyn RenderContext) -> usize {
        profile_function!();
        let mut written = 0;
        for &idx in &self.active {
            if let Some(batch) = self.batch_slots[idx as usize].as_mut() {
                written += batch.upload(ctx);
            }
        }
        for buffer in self.retired.drain(..) {
            ctx.destroy_buffer(&buffer);
        }
        written
    }
}
