//! Benchmarks for the per-frame sprite update passes.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flatland_core::math::Vec3;
use flatland_render::Color;
use flatland_sprite::{Entity, MaterialHandle, SpriteSnapshot, SpriteWorld};

fn populated_world(size: usize, materials: &[MaterialHandle]) -> (SpriteWorld, Vec<Entity>) {
    let mut world = SpriteWorld::default();
    let entities = (0..size)
        .map(|i| {
            let mut state = SpriteSnapshot::new(materials[i % materials.len()].clone());
            state.layer = Some((i % 4) as u8);
            state.position = Vec3::new(i as f32, (i / 100) as f32, 0.0);
            world.spawn(state)
        })
        .collect();
    world.update();
    (world, entities)
}

fn bench_initial_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("sprite_assign");
    let materials = [MaterialHandle::new("a"), MaterialHandle::new("b")];

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| black_box(populated_world(size, &materials)));
        });
    }

    group.finish();
}

fn bench_steady_state_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("sprite_update");
    let materials = [MaterialHandle::new("a"), MaterialHandle::new("b")];

    for size in [100, 1000, 10000] {
        let (mut world, entities) = populated_world(size, &materials);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::new("moving", size), |b| {
            let mut t = 0.0f32;
            b.iter(|| {
                t += 1.0;
                for &entity in &entities {
                    let _ = world.set_rotation(entity, t * 0.01);
                }
                world.update();
            });
        });
    }

    group.finish();
}

fn bench_color_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("sprite_color_churn");
    let materials = [MaterialHandle::new("a")];
    let (mut world, entities) = populated_world(10000, &materials);

    for changed in [10, 100, 1000] {
        group.throughput(Throughput::Elements(changed as u64));
        group.bench_with_input(BenchmarkId::from_parameter(changed), &changed, |b, &changed| {
            b.iter(|| {
                for &entity in entities.iter().take(changed) {
                    let _ = world.set_color(entity, Color::RED);
                }
                world.update();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_initial_assignment,
    bench_steady_state_update,
    bench_color_churn
);
criterion_main!(benches);
