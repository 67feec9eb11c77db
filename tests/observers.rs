use std::sync::Arc;

use observer_ecs::prelude::*;
use observer_ecs::{Entity, Observer};

#[derive(Debug, PartialEq)]
struct Hp {
    hp: i32,
}

#[derive(Debug)]
struct Damage {
    damage: i32,
}

struct Dead;
struct Shield;

observer_ecs::components!(Hp, Damage, Dead, Shield);

type Alive = Filter<(Hp,), (Dead,)>;
type Wounded = Filter<(Hp, Damage), (Dead,)>;
type FreshHp = Filter<(Updated<Hp>,), ()>;

fn world_with_storages() -> Arc<World> {
    let world = World::new();
    world.create_storage::<Hp>();
    world.create_storage::<Damage>();
    world.create_storage::<Dead>();
    world.create_storage::<Shield>();
    world
}

#[test]
fn require_and_exclude_combine() {
    let world = world_with_storages();
    let a = world.create();
    let b = world.create();
    world.emplace(a, Hp { hp: 5 });
    world.emplace(b, Hp { hp: 0 });
    world.emplace(b, Dead);

    let observer = Observer::<Alive>::new(world.clone());
    assert_eq!(observer.snapshot(), vec![a]);
    assert!(observer.contains(a));
    assert!(!observer.contains(b));
}

#[test]
fn update_tag_filters_track_mark_and_clear() {
    let world = world_with_storages();
    let a = world.create();
    world.emplace(a, Hp { hp: 5 });

    let observer = Observer::<FreshHp>::new(world.clone());
    assert!(observer.is_empty());

    world.mark_updated::<Hp>(a);
    observer.refresh();
    assert_eq!(observer.snapshot(), vec![a]);

    world.clear_update_tag::<Hp>(a);
    observer.refresh();
    assert!(observer.is_empty());
}

#[test]
fn empty_filter_matches_nothing_but_exists() {
    let world = world_with_storages();
    world.create();
    world.create();

    let observer = Observer::<RunEveryFrame>::new(world.clone());
    observer.refresh();
    assert!(observer.is_empty());
    assert_eq!(observer.len(), 0);
}

#[test]
fn single_require_matches_the_storage_list() {
    let world = world_with_storages();
    let mut bearers = Vec::new();
    for i in 0..8 {
        let e = world.create();
        if i % 2 == 0 {
            world.emplace(e, Hp { hp: i });
            bearers.push(e);
        }
    }

    let observer = Observer::<Filter<(Hp,), ()>>::new(world.clone());
    assert_eq!(observer.snapshot(), bearers);
    assert_eq!(
        observer.snapshot().as_slice(),
        &*world.component_entities::<Hp>()
    );
}

#[test]
fn filter_result_is_order_independent() {
    let world = world_with_storages();
    for i in 0..16 {
        let e = world.create();
        world.emplace(e, Hp { hp: i });
        if i % 3 == 0 {
            world.emplace(e, Damage { damage: 1 });
        }
        if i % 4 == 0 {
            world.emplace(e, Dead);
        }
    }

    let forward = Observer::<Filter<(Hp, Damage), (Dead,)>>::new(world.clone());
    let reversed = Observer::<Filter<(Damage, Hp), (Dead,)>>::new(world.clone());
    assert_eq!(forward.snapshot(), reversed.snapshot());
    assert!(!forward.snapshot().is_empty());
}

#[test]
fn snapshots_are_sorted_and_unique() {
    let world = world_with_storages();
    // Insert in a scrambled order.
    let ids: Vec<Entity> = (0..32).map(|_| world.create()).collect();
    for &e in ids.iter().rev() {
        world.emplace(e, Hp { hp: e as i32 });
    }

    let observer = Observer::<Filter<(Hp,), ()>>::new(world.clone());
    let snapshot = observer.snapshot();
    assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(snapshot.len(), ids.len());
}

#[test]
fn wrapper_components_follow_declaration_order() {
    let world = world_with_storages();
    let a = world.create();
    world.emplace(a, Hp { hp: 30 });
    world.emplace(a, Damage { damage: 4 });

    let observer = Observer::<Wounded>::new(world.clone());
    assert_eq!(observer.len(), 1);

    for entity in &observer {
        let (hp, damage) = entity.components();
        assert_eq!(hp.hp, 30);
        assert_eq!(damage.damage, 4);
    }
}

#[test]
fn wrapper_mutation_is_visible_through_the_world() {
    let world = world_with_storages();
    let a = world.create();
    world.emplace(a, Hp { hp: 1 });

    let observer = Observer::<Alive>::new(world.clone());
    for entity in &observer {
        entity.get_mut::<Hp>().hp = 42;
    }
    assert_eq!(world.get::<Hp>(a).hp, 42);
}

#[test]
fn updated_terms_fetch_the_underlying_component() {
    let world = world_with_storages();
    let a = world.create();
    world.emplace_tagged(a, Hp { hp: 7 });

    let observer = Observer::<FreshHp>::new(world.clone());
    for entity in &observer {
        let (hp,) = entity.components();
        assert_eq!(hp.hp, 7);
    }

    // Clearing across the snapshot empties the filter on the next refresh.
    observer.clear_update_tags::<Hp>();
    observer.refresh();
    assert!(observer.is_empty());
    assert!(world.has::<Hp>(a));
}

#[test]
fn bulk_erase_applies_to_the_snapshot() {
    let world = world_with_storages();
    for i in 0..4 {
        let e = world.create();
        world.emplace(e, Hp { hp: i });
        world.emplace(e, Damage { damage: i });
    }

    let observer = Observer::<Wounded>::new(world.clone());
    assert_eq!(observer.len(), 4);

    observer.erase_all::<Damage>();
    assert_eq!(world.count::<Damage>(), 0);
    assert_eq!(world.count::<Hp>(), 4);

    observer.refresh();
    assert!(observer.is_empty());
}

#[test]
fn create_with_attaches_a_bundle() {
    let world = world_with_storages();
    let observer = Observer::<Alive>::new(world.clone());

    let wrapper = observer.create_with((Hp { hp: 100 }, Damage { damage: 3 }, Shield));
    let e = wrapper.entity();
    assert!(world.has::<Hp>(e));
    assert!(world.has::<Damage>(e));
    assert!(world.has::<Shield>(e));
    assert_eq!(world.get::<Hp>(e).hp, 100);

    observer.refresh();
    assert_eq!(observer.snapshot(), vec![e]);
}

#[test]
fn snapshot_is_stable_while_storages_mutate() {
    let world = world_with_storages();
    let a = world.create();
    let b = world.create();
    world.emplace(a, Hp { hp: 1 });
    world.emplace(b, Hp { hp: 2 });

    let observer = Observer::<Alive>::new(world.clone());
    assert_eq!(observer.len(), 2);

    // Mutate membership without refreshing: the snapshot must not move.
    world.emplace(b, Dead);
    assert_eq!(observer.snapshot(), vec![a, b]);

    observer.refresh();
    assert_eq!(observer.snapshot(), vec![a]);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "Exclude list")]
fn excluded_access_is_rejected() {
    let world = world_with_storages();
    let a = world.create();
    world.emplace(a, Hp { hp: 1 });

    let observer = Observer::<Alive>::new(world.clone());
    let _ = observer.has::<Dead>(a);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "Require list")]
fn unrequired_get_is_rejected() {
    let world = world_with_storages();
    let a = world.create();
    world.emplace(a, Hp { hp: 1 });
    world.emplace(a, Damage { damage: 1 });

    let observer = Observer::<Alive>::new(world.clone());
    let _ = observer.get::<Damage>(a);
}
