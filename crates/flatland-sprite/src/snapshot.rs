use bitflags::bitflags;
use glam::{Vec2, Vec3};

use flatland_render::Color;

use crate::effect::{EffectClassId, EffectInstance};
use crate::material::MaterialHandle;
use crate::sheet::UvRect;

bitflags! {
    /// Mirroring applied to a sprite when drawn.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlipFlags: u8 {
        const HORIZONTAL = 1 << 0;
        const VERTICAL = 1 << 1;
    }
}

impl FlipFlags {
    /// Per-axis sign written to the flip buffer.
    pub fn signs(self) -> [f32; 2] {
        [
            if self.contains(FlipFlags::HORIZONTAL) { -1.0 } else { 1.0 },
            if self.contains(FlipFlags::VERTICAL) { -1.0 } else { 1.0 },
        ]
    }
}

/// Everything that describes one sprite.
///
/// Standalone sprites own one directly; enrolled sprites keep theirs inside
/// the [`SpriteWorld`](crate::SpriteWorld).
#[derive(Debug, Clone)]
pub struct SpriteSnapshot {
    pub position: Vec3,
    /// Rotation around Z in radians.
    pub rotation: f32,
    pub scale: Vec2,
    pub layer: Option<u8>,
    /// Fine depth order inside a layer.
    pub z_index: i32,
    pub material: Option<MaterialHandle>,
    pub uv: UvRect,
    pub color: Color,
    pub flip: FlipFlags,
    pub visible: bool,
    pub effects: Vec<EffectInstance>,
}

impl Default for SpriteSnapshot {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: 0.0,
            scale: Vec2::ONE,
            layer: None,
            z_index: 0,
            material: None,
            uv: UvRect::FULL,
            color: Color::WHITE,
            flip: FlipFlags::empty(),
            visible: true,
            effects: Vec::new(),
        }
    }
}

impl SpriteSnapshot {
    /// A visible sprite on layer 0 drawn with `material`.
    pub fn new(material: MaterialHandle) -> Self {
        Self {
            layer: Some(0),
            material: Some(material),
            ..Default::default()
        }
    }

    /// Visible with a layer and a material.
    pub fn is_eligible(&self) -> bool {
        self.visible && self.layer.is_some() && self.material.is_some()
    }

    pub fn effect(&self, class: EffectClassId) -> Option<&EffectInstance> {
        self.effects.iter().find(|fx| fx.class_id() == class)
    }

    pub fn effect_mut(&mut self, class: EffectClassId) -> Option<&mut EffectInstance> {
        self.effects.iter_mut().find(|fx| fx.class_id() == class)
    }

    /// Add `effect`, replacing the values of an active instance of the same
    /// class. Registers the class on the current material.
    pub(crate) fn insert_effect(&mut self, effect: EffectInstance) {
        if let Some(material) = &self.material {
            material.register_effect(effect.class());
        }
        match self.effect_mut(effect.class_id()) {
            Some(existing) => *existing = effect,
            None => self.effects.push(effect),
        }
    }

    pub(crate) fn take_effect(&mut self, class: EffectClassId) -> Option<EffectInstance> {
        let pos = self.effects.iter().position(|fx| fx.class_id() == class)?;
        Some(self.effects.remove(pos))
    }

    /// Register every active effect on the current material.
    pub(crate) fn register_effects(&self) {
        if let Some(material) = &self.material {
            for fx in &self.effects {
                material.register_effect(fx.class());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_signs() {
        assert_eq!(FlipFlags::empty().signs(), [1.0, 1.0]);
        assert_eq!(FlipFlags::HORIZONTAL.signs(), [-1.0, 1.0]);
        assert_eq!(FlipFlags::all().signs(), [-1.0, -1.0]);
    }

    #[test]
    fn test_eligibility() {
        let mut snapshot = SpriteSnapshot::default();
        assert!(!snapshot.is_eligible());
        snapshot.layer = Some(1);
        snapshot.material = Some(MaterialHandle::new("m"));
        assert!(snapshot.is_eligible());
        snapshot.visible = false;
        assert!(!snapshot.is_eligible());
    }
}
