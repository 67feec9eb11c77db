use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use observer_ecs::prelude::*;
use observer_ecs::Observer;

#[derive(Debug)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug)]
struct Velocity {
    dx: f32,
    dy: f32,
}

struct Frozen;

observer_ecs::components!(Position, Velocity, Frozen);

type Moving = Filter<(Position, Velocity), (Frozen,)>;

const AGENTS: u32 = 10_000;

fn make_world() -> (Arc<World>, Registry) {
    let world = World::new();
    let mut registry = Registry::new(world.clone());
    world.create_storage::<Position>();
    world.create_storage::<Velocity>();
    world.create_storage::<Frozen>();
    registry.init_new_systems();

    for i in 0..AGENTS {
        let e = world.create();
        world.emplace(
            e,
            Position {
                x: i as f32,
                y: 0.0,
            },
        );
        if i % 2 == 0 {
            world.emplace(
                e,
                Velocity {
                    dx: 1.0,
                    dy: -1.0,
                },
            );
        }
        if i % 16 == 0 {
            world.emplace(e, Frozen);
        }
    }
    (world, registry)
}

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    group.bench_function("tick_1_system_10k", |b| {
        let (_world, mut registry) = make_world();
        registry
            .register_function("bench::integrate", |observer: &Observer<Moving>| {
                for entity in observer {
                    let velocity = entity.get::<Velocity>();
                    let (dx, dy) = (velocity.dx, velocity.dy);
                    drop(velocity);
                    let mut position = entity.get_mut::<Position>();
                    position.x += dx;
                    position.y += dy;
                }
            })
            .unwrap();

        b.iter(|| {
            registry.prepare();
            registry.exec();
        });
    });

    group.finish();
}

fn refresh_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");

    group.bench_function("filter_eval_10k", |b| {
        let (world, _registry) = make_world();
        let observer = Observer::<Moving>::new(world);
        b.iter(|| {
            observer.refresh();
            black_box(observer.len())
        });
    });

    group.bench_function("emplace_erase_10k", |b| {
        let (world, _registry) = make_world();
        let entities: Vec<_> = world.entities().to_vec();
        b.iter_batched(
            || entities.clone(),
            |ids| {
                for &e in &ids {
                    world.emplace(e, Frozen);
                }
                world.erase_span::<Frozen>(&ids);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, tick_benchmark, refresh_benchmark);
criterion_main!(benches);
