//! Single-integer ordering for sprites drawn outside a world.

use crate::material::MaterialId;
use crate::sprite::Sprite2D;

const Z_BIAS: i32 = 2048;
const Z_MAX: i32 = 4095;

/// `layer << 24 | material << 12 | z`, where `z` is the z-index shifted into
/// `0..=4095` and the material id keeps its low 12 bits.
#[inline]
pub fn sort_key(layer: u8, material: MaterialId, z_index: i32) -> u32 {
    let z = z_index.saturating_add(Z_BIAS).clamp(0, Z_MAX) as u32;
    ((layer as u32) << 24) | ((material.raw() & 0xFFF) << 12) | z
}

/// Stable sort by [`sort_key`]. Sprites whose state cannot be read sort last.
pub fn sort_sprites_by_key(sprites: &mut [Sprite2D]) {
    sprites.sort_by_cached_key(|sprite| {
        sprite
            .read(|s| {
                sort_key(
                    s.layer.unwrap_or(0),
                    s.material.as_ref().map_or(MaterialId::from_raw(0), |m| m.id()),
                    s.z_index,
                )
            })
            .unwrap_or(u32::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialHandle;

    #[test]
    fn test_layer_dominates_material_and_z() {
        let low = sort_key(0, MaterialId::from_raw(0xFFF), 2047);
        let high = sort_key(1, MaterialId::from_raw(0), -2048);
        assert!(low < high);
    }

    #[test]
    fn test_z_index_is_clamped() {
        let m = MaterialId::from_raw(1);
        assert_eq!(sort_key(0, m, -5000) & 0xFFF, 0);
        assert_eq!(sort_key(0, m, 5000) & 0xFFF, 4095);
        assert_eq!(sort_key(0, m, 0) & 0xFFF, 2048);
        assert_eq!(sort_key(0, m, i32::MAX) & 0xFFF, 4095);
    }

    #[test]
    fn test_sort_sprites() {
        let material = MaterialHandle::new("m");
        let mut sprites: Vec<Sprite2D> = (0..3).map(|_| Sprite2D::new(material.clone())).collect();
        sprites[0].set_layer(2).unwrap();
        sprites[1].set_z_index(5).unwrap();
        sprites[2].set_z_index(-5).unwrap();
        sort_sprites_by_key(&mut sprites);
        let order: Vec<(Option<u8>, i32)> = sprites
            .iter()
            .map(|s| (s.layer().unwrap(), s.z_index().unwrap()))
            .collect();
        assert_eq!(order, vec![(Some(0), -5), (Some(0), 5), (Some(2), 0)]);
    }
}
