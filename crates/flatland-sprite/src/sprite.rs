//! The user-facing sprite handle.
//!
//! A [`Sprite2D`] is either standalone, owning its state and a one-slot
//! scratch batch that every setter writes immediately, or enrolled in a
//! [`SpriteWorld`], where setters only record state for the next
//! [`SpriteWorld::update`].

use std::cell::{OnceCell, Ref, RefCell, RefMut};
use std::rc::Rc;

use glam::{Vec2, Vec3};

use flatland_render::{Color, GpuBuffer, RenderContext};

use crate::batch::SpriteBatch;
use crate::config::SpriteConfig;
use crate::effect::{EffectClassId, EffectInstance};
use crate::error::{SpriteError, SpriteResult};
use crate::material::MaterialHandle;
use crate::sheet::UvRect;
use crate::snapshot::{FlipFlags, SpriteSnapshot};
use crate::systems::{write_effects, write_sprite, write_transform};
use crate::world::{DrawCall, Entity, SpriteWorld};

/// Shared handle to a [`SpriteWorld`]. Clones point at the same world.
#[derive(Debug, Clone, Default)]
pub struct WorldHandle(Rc<RefCell<SpriteWorld>>);

impl WorldHandle {
    pub fn new(world: SpriteWorld) -> Self {
        Self(Rc::new(RefCell::new(world)))
    }

    /// # Panics
    /// Panics if the world is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, SpriteWorld> {
        self.0.borrow()
    }

    /// # Panics
    /// Panics if the world is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, SpriteWorld> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &WorldHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn update(&self) {
        self.0.borrow_mut().update();
    }

    pub fn prepare(&self, ctx: &dyn RenderContext) -> usize {
        self.0.borrow_mut().prepare(ctx)
    }
}

/// Which part of the scratch slot a standalone write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScratchWrite {
    Color,
    Uv,
    Flip,
    Transform,
    Effects,
    Rebuild,
}

/// Hidden standalone sprites keep their slot but draw transparent.
fn scratch_color(state: &SpriteSnapshot) -> [f32; 4] {
    let mut rgba = state.color.to_array();
    if !state.visible {
        rgba[3] = 0.0;
    }
    rgba
}

#[derive(Debug)]
struct Standalone {
    state: SpriteSnapshot,
    scratch: Option<SpriteBatch>,
    config: SpriteConfig,
    retired: Vec<GpuBuffer>,
}

impl Standalone {
    fn new(state: SpriteSnapshot, config: SpriteConfig) -> Self {
        state.register_effects();
        let mut standalone = Self {
            state,
            scratch: None,
            config,
            retired: Vec::new(),
        };
        standalone.rebuild_scratch();
        standalone
    }

    fn rebuild_scratch(&mut self) {
        if let Some(mut old) = self.scratch.take() {
            self.retired.extend(old.dispose());
        }
        let Some(material) = &self.state.material else {
            return;
        };
        let material = material.get();
        let mut batch = SpriteBatch::new(&material, 1);
        if let Some(slot) = batch.allocate_slot() {
            write_sprite(&mut batch, slot, &self.state, &material, &self.config);
            batch.write_color(slot, scratch_color(&self.state));
            batch.sync_count();
            batch.mark_all_dirty();
        }
        self.scratch = Some(batch);
    }

    fn refresh(&mut self, write: ScratchWrite) {
        if write == ScratchWrite::Rebuild {
            self.rebuild_scratch();
            return;
        }
        let Some(batch) = self.scratch.as_mut() else {
            return;
        };
        let state = &self.state;
        match write {
            ScratchWrite::Color => {
                batch.write_color(0, scratch_color(state));
                batch.mark_color_dirty();
            }
            ScratchWrite::Uv => {
                batch.write_uv(0, state.uv);
                batch.mark_uv_dirty();
            }
            ScratchWrite::Flip => {
                batch.write_flip(0, state.flip.signs());
                batch.mark_flip_dirty();
            }
            ScratchWrite::Transform => {
                write_transform(batch, 0, state, &self.config);
                batch.mark_matrix_dirty();
            }
            ScratchWrite::Effects => {
                let Some(material) = &state.material else {
                    return;
                };
                let material = material.get();
                if batch.is_stale(&material) {
                    self.retired.extend(batch.rebuild_effect_buffers(&material));
                }
                write_effects(batch, 0, state, &material);
                batch.mark_effects_dirty();
            }
            ScratchWrite::Rebuild => {}
        }
    }
}

#[derive(Debug)]
enum SpriteState {
    Standalone(Box<Standalone>),
    Enrolled { world: WorldHandle, entity: Entity },
}

/// A sprite that can live on its own or inside a [`SpriteWorld`].
///
/// ```
/// use flatland_sprite::{MaterialHandle, Sprite2D, SpriteWorld, WorldHandle};
/// use flatland_render::Color;
///
/// let material = MaterialHandle::new("hero");
/// let mut sprite = Sprite2D::new(material);
/// sprite.set_color(Color::RED).unwrap();
/// // standalone writes are visible at once
/// assert_eq!(sprite.scratch().unwrap().color(0), [1.0, 0.0, 0.0, 1.0]);
///
/// let world = WorldHandle::new(SpriteWorld::default());
/// sprite.enroll(&world).unwrap();
/// sprite.set_color(Color::BLUE).unwrap();
/// world.update();
/// sprite.unenroll().unwrap();
/// assert_eq!(sprite.color().unwrap(), Color::BLUE);
/// ```
#[derive(Debug)]
pub struct Sprite2D {
    state: SpriteState,
}

impl Sprite2D {
    /// A standalone sprite on layer 0.
    pub fn new(material: MaterialHandle) -> Self {
        Self::from_snapshot(SpriteSnapshot::new(material))
    }

    pub fn from_snapshot(snapshot: SpriteSnapshot) -> Self {
        Self {
            state: SpriteState::Standalone(Box::new(Standalone::new(
                snapshot,
                SpriteConfig::default(),
            ))),
        }
    }

    pub fn is_enrolled(&self) -> bool {
        matches!(self.state, SpriteState::Enrolled { .. })
    }

    pub fn entity(&self) -> Option<Entity> {
        match &self.state {
            SpriteState::Enrolled { entity, .. } => Some(*entity),
            SpriteState::Standalone(_) => None,
        }
    }

    pub fn world(&self) -> Option<&WorldHandle> {
        match &self.state {
            SpriteState::Enrolled { world, .. } => Some(world),
            SpriteState::Standalone(_) => None,
        }
    }

    /// Move the sprite into `world`. Enrolling into the world it already
    /// belongs to returns the existing entity.
    ///
    /// # Errors
    /// [`SpriteError::AlreadyEnrolled`] if the sprite belongs to another world.
    pub fn enroll(&mut self, world: &WorldHandle) -> SpriteResult<Entity> {
        match &mut self.state {
            SpriteState::Enrolled {
                world: current,
                entity,
            } => {
                if current.ptr_eq(world) {
                    Ok(*entity)
                } else {
                    Err(SpriteError::AlreadyEnrolled)
                }
            }
            SpriteState::Standalone(standalone) => {
                let state = std::mem::take(&mut standalone.state);
                let mut retired = std::mem::take(&mut standalone.retired);
                if let Some(mut scratch) = standalone.scratch.take() {
                    retired.extend(scratch.dispose());
                }
                let entity = {
                    let mut w = world.borrow_mut();
                    w.retire(retired);
                    w.spawn(state)
                };
                tracing::trace!("Enrolled sprite as {:?}", entity);
                self.state = SpriteState::Enrolled {
                    world: world.clone(),
                    entity,
                };
                Ok(entity)
            }
        }
    }

    /// Take the sprite out of its world, keeping its current state.
    ///
    /// # Errors
    /// [`SpriteError::NotEnrolled`] for a standalone sprite, or
    /// [`SpriteError::UnknownEntity`] if the entity was despawned elsewhere.
    pub fn unenroll(&mut self) -> SpriteResult<()> {
        let SpriteState::Enrolled { world, entity } = &self.state else {
            return Err(SpriteError::NotEnrolled);
        };
        let (state, config) = {
            let mut w = world.borrow_mut();
            let config = w.config().clone();
            (w.despawn(*entity)?, config)
        };
        self.state = SpriteState::Standalone(Box::new(Standalone::new(state, config)));
        Ok(())
    }

    /// Read from whichever side owns the state.
    pub fn read<R>(&self, f: impl FnOnce(&SpriteSnapshot) -> R) -> SpriteResult<R> {
        match &self.state {
            SpriteState::Standalone(standalone) => Ok(f(&standalone.state)),
            SpriteState::Enrolled { world, entity } => world.borrow().get(*entity).map(f),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> SpriteResult<SpriteSnapshot> {
        self.read(SpriteSnapshot::clone)
    }

    fn write(
        &mut self,
        kind: ScratchWrite,
        enrolled: impl FnOnce(&mut SpriteWorld, Entity) -> SpriteResult<()>,
        standalone: impl FnOnce(&mut SpriteSnapshot),
    ) -> SpriteResult<()> {
        match &mut self.state {
            SpriteState::Enrolled { world, entity } => enrolled(&mut *world.borrow_mut(), *entity),
            SpriteState::Standalone(local) => {
                standalone(&mut local.state);
                local.refresh(kind);
                Ok(())
            }
        }
    }

    pub fn position(&self) -> SpriteResult<Vec3> {
        self.read(|s| s.position)
    }

    pub fn rotation(&self) -> SpriteResult<f32> {
        self.read(|s| s.rotation)
    }

    pub fn scale(&self) -> SpriteResult<Vec2> {
        self.read(|s| s.scale)
    }

    pub fn layer(&self) -> SpriteResult<Option<u8>> {
        self.read(|s| s.layer)
    }

    pub fn z_index(&self) -> SpriteResult<i32> {
        self.read(|s| s.z_index)
    }

    pub fn material(&self) -> SpriteResult<Option<MaterialHandle>> {
        self.read(|s| s.material.clone())
    }

    pub fn uv(&self) -> SpriteResult<UvRect> {
        self.read(|s| s.uv)
    }

    pub fn color(&self) -> SpriteResult<Color> {
        self.read(|s| s.color)
    }

    pub fn flip(&self) -> SpriteResult<FlipFlags> {
        self.read(|s| s.flip)
    }

    pub fn visible(&self) -> SpriteResult<bool> {
        self.read(|s| s.visible)
    }

    pub fn effect_field(&self, class: EffectClassId, field: &str) -> SpriteResult<Option<Vec<f32>>> {
        self.read(|s| s.effect(class).and_then(|fx| fx.get(field)).map(<[f32]>::to_vec))
    }

    pub fn set_position(&mut self, position: Vec3) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Transform,
            |w, e| w.set_position(e, position),
            |s| s.position = position,
        )
    }

    pub fn set_rotation(&mut self, rotation: f32) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Transform,
            |w, e| w.set_rotation(e, rotation),
            |s| s.rotation = rotation,
        )
    }

    pub fn set_scale(&mut self, scale: Vec2) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Transform,
            |w, e| w.set_scale(e, scale),
            |s| s.scale = scale,
        )
    }

    pub fn set_layer(&mut self, layer: u8) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Transform,
            |w, e| w.set_layer(e, layer),
            |s| s.layer = Some(layer),
        )
    }

    pub fn set_z_index(&mut self, z_index: i32) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Transform,
            |w, e| w.set_z_index(e, z_index),
            |s| s.z_index = z_index,
        )
    }

    pub fn set_material(&mut self, material: MaterialHandle) -> SpriteResult<()> {
        let local = material.clone();
        self.write(
            ScratchWrite::Rebuild,
            |w, e| w.set_material(e, material),
            |s| {
                s.material = Some(local);
                s.register_effects();
            },
        )
    }

    pub fn set_uv(&mut self, uv: UvRect) -> SpriteResult<()> {
        self.write(ScratchWrite::Uv, |w, e| w.set_uv(e, uv), |s| s.uv = uv)
    }

    /// Show an atlas frame. Same as [`set_uv`](Self::set_uv).
    pub fn set_frame(&mut self, frame: UvRect) -> SpriteResult<()> {
        self.set_uv(frame)
    }

    pub fn set_color(&mut self, color: Color) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Color,
            |w, e| w.set_color(e, color),
            |s| s.color = color,
        )
    }

    pub fn set_alpha(&mut self, alpha: f32) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Color,
            |w, e| w.set_alpha(e, alpha),
            |s| s.color = s.color.with_alpha(alpha),
        )
    }

    pub fn set_flip(&mut self, flip: FlipFlags) -> SpriteResult<()> {
        self.write(ScratchWrite::Flip, |w, e| w.set_flip(e, flip), |s| s.flip = flip)
    }

    pub fn set_visible(&mut self, visible: bool) -> SpriteResult<()> {
        self.write(
            ScratchWrite::Color,
            |w, e| w.set_visible(e, visible),
            |s| s.visible = visible,
        )
    }

    pub fn add_effect(&mut self, effect: EffectInstance) -> SpriteResult<()> {
        match &mut self.state {
            SpriteState::Enrolled { world, entity } => world.borrow_mut().add_effect(*entity, effect),
            SpriteState::Standalone(local) => {
                local.state.insert_effect(effect);
                local.refresh(ScratchWrite::Effects);
                Ok(())
            }
        }
    }

    pub fn remove_effect(&mut self, class: EffectClassId) -> SpriteResult<Option<EffectInstance>> {
        match &mut self.state {
            SpriteState::Enrolled { world, entity } => world.borrow_mut().remove_effect(*entity, class),
            SpriteState::Standalone(local) => {
                let removed = local.state.take_effect(class);
                if removed.is_some() {
                    local.refresh(ScratchWrite::Effects);
                }
                Ok(removed)
            }
        }
    }

    pub fn set_effect_field(&mut self, class: EffectClassId, field: &str, value: &[f32]) -> SpriteResult<bool> {
        match &mut self.state {
            SpriteState::Enrolled { world, entity } => {
                world.borrow_mut().set_effect_field(*entity, class, field, value)
            }
            SpriteState::Standalone(local) => {
                let written = local
                    .state
                    .effect_mut(class)
                    .is_some_and(|fx| fx.set(field, value));
                if written {
                    local.refresh(ScratchWrite::Effects);
                }
                Ok(written)
            }
        }
    }

    /// The scratch batch of a standalone sprite.
    pub fn scratch(&self) -> Option<&SpriteBatch> {
        match &self.state {
            SpriteState::Standalone(local) => local.scratch.as_ref(),
            SpriteState::Enrolled { .. } => None,
        }
    }

    /// Upload the scratch batch of a standalone sprite. Enrolled sprites are
    /// uploaded by their world.
    pub fn prepare(&mut self, ctx: &dyn RenderContext) -> usize {
        let SpriteState::Standalone(local) = &mut self.state else {
            return 0;
        };
        for buffer in local.retired.drain(..) {
            ctx.destroy_buffer(&buffer);
        }
        local.scratch.as_mut().map_or(0, |batch| batch.upload(ctx))
    }

    /// Draw call for a visible standalone sprite.
    pub fn draw_call(&self) -> Option<DrawCall> {
        let SpriteState::Standalone(local) = &self.state else {
            return None;
        };
        if !local.state.visible {
            return None;
        }
        local.scratch.as_ref().map(|batch| DrawCall {
            mesh: batch.mesh().id(),
            instance_count: batch.mesh().instance_count(),
            render_order: batch.mesh().render_order(),
        })
    }
}

/// Top-level owner of the default world used by sprites that are not
/// handed an explicit one.
#[derive(Debug, Default)]
pub struct SpriteRuntime {
    config: SpriteConfig,
    default_world: OnceCell<WorldHandle>,
}

impl SpriteRuntime {
    pub fn new(config: SpriteConfig) -> SpriteResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            default_world: OnceCell::new(),
        })
    }

    /// The default world, created on first use.
    pub fn default_world(&self) -> WorldHandle {
        self.default_world
            .get_or_init(|| {
                tracing::debug!("Initialising default sprite world");
                WorldHandle::new(SpriteWorld::with_valid_config(self.config.clone()))
            })
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.default_world.get().is_some()
    }

    /// Drop the default world. Sprites still enrolled in it keep it alive
    /// but the next [`default_world`](Self::default_world) call creates a
    /// fresh one.
    pub fn reset(&mut self) {
        self.default_world.take();
    }

    /// A sprite enrolled in the default world.
    pub fn spawn(&self, material: MaterialHandle) -> SpriteResult<Sprite2D> {
        let mut sprite = Sprite2D::new(material);
        sprite.enroll(&self.default_world())?;
        Ok(sprite)
    }
}
