//! Assignment, reassignment and removal of sprites across batches.

use flatland_core::math::{Vec2, Vec3};
use flatland_render::Color;
use flatland_sprite::{
    BatchBinding, Entity, FlipFlags, MaterialHandle, RunKey, SpriteConfig, SpriteSnapshot,
    SpriteWorld, UvRect,
};

fn world(max_batch_size: u32) -> SpriteWorld {
    SpriteWorld::new(SpriteConfig::default().with_max_batch_size(max_batch_size)).unwrap()
}

fn binding(world: &SpriteWorld, entity: Entity) -> BatchBinding {
    world.binding(entity).unwrap().expect("sprite should be batched")
}

#[test]
fn test_three_sprites_two_batches_then_pool_reuse() {
    let mut world = world(2);
    let material = MaterialHandle::new("shared");
    let sprites: Vec<Entity> = (0..3)
        .map(|_| world.spawn(SpriteSnapshot::new(material.clone())))
        .collect();
    world.update();

    let b: Vec<BatchBinding> = sprites.iter().map(|&e| binding(&world, e)).collect();
    assert_eq!(world.registry().batch_count(), 2);
    assert_eq!(b[0].batch_idx, b[1].batch_idx);
    assert_eq!((b[0].slot, b[1].slot), (0, 1));
    assert_ne!(b[2].batch_idx, b[0].batch_idx);
    assert_eq!(b[2].slot, 0);

    // first batch keeps its slot-1 sprite
    world.set_visible(sprites[0], false).unwrap();
    world.update();
    assert_eq!(world.registry().batch_count(), 2);
    assert_eq!(world.binding(sprites[0]).unwrap(), None);
    let first = world.registry().batch(b[0].batch_idx).unwrap();
    assert_eq!(first.active_count(), 1);
    assert_eq!(first.color(0)[3], 0.0);
    assert_eq!(first.mesh().instance_count(), 2);

    world.set_visible(sprites[1], false).unwrap();
    world.set_visible(sprites[2], false).unwrap();
    world.update();
    assert_eq!(world.registry().batch_count(), 0);
    assert_eq!(world.registry().pool_len(), 2);
    assert_eq!(world.registry().containers_built(), 2);

    world.set_visible(sprites[0], true).unwrap();
    world.update();
    assert_eq!(world.registry().batch_count(), 1);
    assert_eq!(world.registry().containers_built(), 2);
    assert_eq!(world.registry().containers_reused(), 1);
    assert_eq!(world.registry().pool_len(), 1);
}

#[test]
fn test_sprites_in_one_batch_share_run_key() {
    let mut world = world(4);
    let a = MaterialHandle::new("a");
    let b = MaterialHandle::new("b");
    let mut entities = Vec::new();
    for i in 0..12u8 {
        let material = if i % 2 == 0 { a.clone() } else { b.clone() };
        let e = world.spawn(SpriteSnapshot::new(material));
        world.set_layer(e, i % 3).unwrap();
        entities.push(e);
    }
    world.update();

    for &x in &entities {
        for &y in &entities {
            let (bx, by) = (binding(&world, x), binding(&world, y));
            if bx.batch_idx == by.batch_idx {
                let sx = world.get(x).unwrap();
                let sy = world.get(y).unwrap();
                assert_eq!(
                    RunKey::new(sx.layer.unwrap(), sx.material.as_ref().unwrap().id()),
                    RunKey::new(sy.layer.unwrap(), sy.material.as_ref().unwrap().id())
                );
            }
        }
    }
    assert_eq!(world.registry().run_count(), 6);
}

/// A material whose id packs to the same 16-bit run key as `other`.
fn colliding_material(other: &MaterialHandle) -> MaterialHandle {
    loop {
        let candidate = MaterialHandle::new("collider");
        if candidate.id() != other.id()
            && (candidate.id().raw() & 0xFFFF) == (other.id().raw() & 0xFFFF)
        {
            return candidate;
        }
    }
}

#[test]
fn test_materials_with_colliding_packed_keys_get_separate_batches() {
    let mut world = world(8);
    let a = MaterialHandle::new("a");
    let b = colliding_material(&a);
    let ea = world.spawn(SpriteSnapshot::new(a.clone()));
    let eb = world.spawn(SpriteSnapshot::new(b.clone()));
    world.update();

    let (ba, bb) = (binding(&world, ea), binding(&world, eb));
    assert_eq!(ba.run_key.packed(), bb.run_key.packed());
    assert_ne!(ba.run_key, bb.run_key);
    assert_ne!(ba.batch_idx, bb.batch_idx);
    assert_eq!(world.registry().batch(ba.batch_idx).unwrap().material_id(), a.id());
    assert_eq!(world.registry().batch(bb.batch_idx).unwrap().material_id(), b.id());
    assert_eq!(world.registry().run_count(), 2);

    // switching between the two is a real move, not a no-op
    world.set_material(ea, b.clone()).unwrap();
    world.update();
    let moved = binding(&world, ea);
    assert_eq!(moved.batch_idx, bb.batch_idx);
    assert_eq!(world.registry().run_count(), 1);
}

#[test]
fn test_z_index_change_keeps_binding() {
    let mut world = world(8);
    let material = MaterialHandle::new("m");
    let e = world.spawn(SpriteSnapshot::new(material));
    world.update();
    let before = binding(&world, e);

    world.set_z_index(e, 40).unwrap();
    world.update();
    assert_eq!(binding(&world, e), before);

    let batch = world.registry().batch(before.batch_idx).unwrap();
    let z = batch.matrix(before.slot)[14];
    assert!((z - 0.04).abs() < 1e-6);
}

#[test]
fn test_layer_change_moves_and_fully_resyncs() {
    let mut world = world(8);
    let material = MaterialHandle::new("m");
    let stays = world.spawn(SpriteSnapshot::new(material.clone()));
    let moves = world.spawn(SpriteSnapshot::new(material.clone()));
    world.update();
    let old = binding(&world, moves);

    let uv = UvRect::new(0.5, 0.0, 0.25, 0.25);
    world.set_color(moves, Color::rgba(0.2, 0.4, 0.6, 0.8)).unwrap();
    world.set_flip(moves, FlipFlags::HORIZONTAL).unwrap();
    world.set_uv(moves, uv).unwrap();
    world.set_position(moves, Vec3::new(5.0, 6.0, 1.0)).unwrap();
    world.set_scale(moves, Vec2::new(2.0, 3.0)).unwrap();
    world.set_layer(moves, 3).unwrap();
    world.update();

    let new = binding(&world, moves);
    assert_ne!(new.batch_idx, old.batch_idx);
    assert_eq!(new.run_key, RunKey::new(3, material.id()));

    let old_batch = world.registry().batch(old.batch_idx).unwrap();
    assert_eq!(old_batch.color(old.slot)[3], 0.0);
    assert_eq!(old_batch.occupant(binding(&world, stays).slot), Some(stays));

    let batch = world.registry().batch(new.batch_idx).unwrap();
    assert_eq!(batch.color(new.slot), [0.2, 0.4, 0.6, 0.8]);
    assert_eq!(batch.flip(new.slot), [-1.0, 1.0]);
    assert_eq!(batch.uv(new.slot), uv);
    let m = batch.matrix(new.slot);
    assert_eq!((m[0], m[5]), (2.0, 3.0));
    assert_eq!((m[12], m[13]), (5.0, 6.0));
    assert!((m[14] - 31.0).abs() < 1e-5);
}

#[test]
fn test_material_change_recycles_emptied_run() {
    let mut world = world(8);
    let a = MaterialHandle::new("a");
    let b = MaterialHandle::new("b");
    let e = world.spawn(SpriteSnapshot::new(a.clone()));
    world.update();
    assert_eq!(world.registry().run_keys(), &[RunKey::new(0, a.id())]);

    world.set_material(e, b.clone()).unwrap();
    world.update();
    assert_eq!(world.registry().run_keys(), &[RunKey::new(0, b.id())]);
    assert_eq!(world.registry().batch_count(), 1);
    assert_eq!(world.registry().pool_len(), 0);
}

#[test]
fn test_bound_sprite_is_not_assigned_twice() {
    let mut world = world(8);
    let material = MaterialHandle::new("m");
    let e = world.spawn(SpriteSnapshot::new(material));
    world.update();
    let before = binding(&world, e);

    // toggles within one frame leave the sprite eligible and bound
    world.set_visible(e, false).unwrap();
    world.set_visible(e, true).unwrap();
    world.set_layer(e, 1).unwrap();
    world.set_layer(e, 0).unwrap();
    world.update();
    world.update();

    assert_eq!(binding(&world, e), before);
    let batch = world.registry().batch(before.batch_idx).unwrap();
    assert_eq!(batch.active_count(), 1);
    assert_eq!(batch.high_water(), 1);
}

#[test]
fn test_incomplete_sprite_waits_for_attributes() {
    let mut world = world(8);
    let e = world.spawn_empty();
    world.update();
    assert_eq!(world.binding(e).unwrap(), None);

    world.set_layer(e, 1).unwrap();
    world.update();
    assert_eq!(world.binding(e).unwrap(), None);

    world.set_material(e, MaterialHandle::new("late")).unwrap();
    world.update();
    assert!(world.binding(e).unwrap().is_some());
}

#[test]
fn test_despawn_releases_slot_immediately() {
    let mut world = world(8);
    let material = MaterialHandle::new("m");
    let a = world.spawn(SpriteSnapshot::new(material.clone()));
    let b = world.spawn(SpriteSnapshot::new(material.clone()));
    world.update();
    let ba = binding(&world, a);

    world.despawn(a).unwrap();
    assert!(!world.contains(a));
    let batch = world.registry().batch(ba.batch_idx).unwrap();
    assert_eq!(batch.color(ba.slot)[3], 0.0);
    assert_eq!(batch.active_count(), 1);
    assert!(world.despawn(a).is_err());

    let c = world.spawn(SpriteSnapshot::new(material));
    world.update();
    assert_eq!(binding(&world, c).slot, ba.slot);
    assert_eq!(binding(&world, b).slot, 1);
}

#[test]
fn test_render_order_follows_run_keys() {
    let mut world = world(1);
    let a = MaterialHandle::new("a");
    let b = MaterialHandle::new("b");
    let mut entities = Vec::new();
    for (layer, material) in [(2, &a), (0, &b), (1, &a), (0, &a), (2, &b), (0, &b)] {
        let e = world.spawn(SpriteSnapshot::new(material.clone()));
        world.set_layer(e, layer).unwrap();
        entities.push(e);
    }
    world.update();
    world.despawn(entities[3]).unwrap();
    world.set_layer(entities[0], 0).unwrap();
    world.update();

    let keyed: Vec<(RunKey, i32)> = entities
        .iter()
        .filter(|&&e| world.contains(e))
        .map(|&e| {
            let binding = binding(&world, e);
            let order = world
                .registry()
                .batch(binding.batch_idx)
                .unwrap()
                .mesh()
                .render_order();
            (binding.run_key, order)
        })
        .collect();
    for &(k1, o1) in &keyed {
        for &(k2, o2) in &keyed {
            if k1 < k2 {
                assert!(o1 < o2, "run {k1:?} drawn after {k2:?}");
            }
        }
    }

    let calls = world.draw_calls();
    assert_eq!(calls.len(), world.registry().batch_count());
    let orders: Vec<i32> = calls.iter().map(|call| call.render_order).collect();
    assert_eq!(orders, (0..calls.len() as i32).collect::<Vec<_>>());
    assert_eq!(world.render_group().len(), calls.len());
}

#[test]
fn test_stats() {
    let mut world = world(2);
    let material = MaterialHandle::new("m");
    for _ in 0..5 {
        world.spawn(SpriteSnapshot::new(material.clone()));
    }
    world.spawn_empty();
    world.update();
    let stats = world.stats();
    assert_eq!(stats.entities, 6);
    assert_eq!(stats.batched_sprites, 5);
    assert_eq!(stats.active_batches, 3);
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.draw_calls, 3);
}

#[test]
fn test_rotated_sprite_matrix() {
    let mut world = world(4);
    let e = world.spawn(SpriteSnapshot::new(MaterialHandle::new("m")));
    world
        .set_rotation(e, std::f32::consts::FRAC_PI_2)
        .unwrap();
    world.update();
    let b = binding(&world, e);
    let m = world.registry().batch(b.batch_idx).unwrap().matrix(b.slot);
    assert!(m[0].abs() < 1e-6);
    assert!((m[1] - 1.0).abs() < 1e-6);
    assert!((m[4] + 1.0).abs() < 1e-6);
}

#[test]
fn test_transform_sync_covers_slots_out_of_spawn_order() {
    let mut world = world(64);
    let material = MaterialHandle::new("m");
    let entities: Vec<Entity> = (0..16)
        .map(|_| {
            let e = world.spawn(SpriteSnapshot::new(material.clone()));
            world.set_layer(e, 1).unwrap();
            e
        })
        .collect();
    world.update();

    // moving in reverse hands out slots in reverse spawn order
    for &e in entities.iter().rev() {
        world.set_layer(e, 0).unwrap();
    }
    world.update();
    assert_eq!(binding(&world, entities[15]).slot, 0);
    assert_eq!(binding(&world, entities[0]).slot, 15);

    for (i, &e) in entities.iter().enumerate() {
        world.set_position(e, Vec3::new(i as f32, 2.0 * i as f32, 0.0)).unwrap();
    }
    world.update();

    let batch_idx = binding(&world, entities[0]).batch_idx;
    let batch = world.registry().batch(batch_idx).unwrap();
    let matrix = batch.mesh().attribute_by_name("instance_matrix").unwrap();
    assert_eq!(matrix.dirty_ranges().iter().cloned().collect::<Vec<_>>(), vec![0..16]);
    for (i, &e) in entities.iter().enumerate() {
        let m = batch.matrix(binding(&world, e).slot);
        assert_eq!((m[12], m[13]), (i as f32, 2.0 * i as f32));
    }
}
