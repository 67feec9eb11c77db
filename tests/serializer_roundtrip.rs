use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use observer_ecs::prelude::*;
use observer_ecs::{read_pod, write_pod, ComponentRegistrant, SerializeError};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Hp {
    hp: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Damage {
    damage: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Boss;

#[derive(Debug, Clone, PartialEq)]
struct Name(String);

observer_ecs::components!(Hp, Damage, Boss, Name);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Registers the same component set against a fresh world + registry.
fn build_side() -> (Arc<World>, Registry) {
    init_logging();
    let world = World::new();
    let mut registry = Registry::new(world.clone());
    registry.init_new_systems();

    ComponentRegistrant::<Hp>::new(&mut registry)
        .create_storage()
        .add_serialize();
    ComponentRegistrant::<Damage>::new(&mut registry)
        .create_storage()
        .add_serialize();
    ComponentRegistrant::<Boss>::new(&mut registry)
        .create_storage()
        .add_serialize();
    ComponentRegistrant::<Name>::new(&mut registry)
        .create_storage()
        .set_save_func(|name: &Name| {
            let mut bytes = write_pod(&(name.0.len() as u32));
            bytes.extend_from_slice(name.0.as_bytes());
            bytes
        })
        .set_load_func(|data: &mut &[u8]| {
            let length = read_pod::<u32>(data)? as usize;
            let text = String::from_utf8_lossy(&data[..length]).into_owned();
            *data = &data[length..];
            Ok(Name(text))
        });

    (world, registry)
}

/// Order-insensitive fingerprint of a world: one sorted record per entity.
fn fingerprint(world: &World) -> Vec<Vec<String>> {
    let entities: Vec<_> = world.entities().to_vec();
    let mut records: Vec<Vec<String>> = entities
        .iter()
        .map(|&e| {
            let mut record = Vec::new();
            if world.has::<Hp>(e) {
                record.push(format!("Hp={}", world.get::<Hp>(e).hp));
            }
            if world.has::<Damage>(e) {
                record.push(format!("Damage={}", world.get::<Damage>(e).damage));
            }
            if world.has::<Boss>(e) {
                record.push("Boss".to_string());
            }
            if world.has::<Name>(e) {
                record.push(format!("Name={}", world.get::<Name>(e).0));
            }
            record
        })
        .collect();
    records.sort();
    records
}

#[test]
fn load_of_save_preserves_components_up_to_renumbering() {
    let (source_world, mut source_registry) = build_side();

    for i in 0..5 {
        let e = source_world.create();
        source_world.emplace(e, Hp { hp: 10 * i });
        if i % 2 == 0 {
            source_world.emplace(e, Damage { damage: i });
        }
        if i == 4 {
            source_world.emplace(e, Boss);
            source_world.emplace(e, Name(format!("boss-{i}")));
        }
    }
    // A hole in the id range: destruction before saving.
    let doomed = source_world.create();
    source_world.destroy(doomed);
    source_world.flush();

    let data = source_registry.serializer().save();
    assert!(!data.is_empty());

    let (target_world, mut target_registry) = build_side();
    target_registry
        .serializer()
        .load(&data)
        .expect("stream produced by save must load");

    assert_eq!(fingerprint(&source_world), fingerprint(&target_world));
    assert_eq!(source_world.len(), target_world.len());
}

#[test]
fn loaded_components_carry_the_update_tag() {
    let (source_world, mut source_registry) = build_side();
    let e = source_world.create();
    source_world.emplace(e, Hp { hp: 3 });

    let data = source_registry.serializer().save();

    let (target_world, mut target_registry) = build_side();
    target_registry.serializer().load(&data).unwrap();

    let loaded = target_world.entities().to_vec();
    assert_eq!(loaded.len(), 1);
    assert!(target_world.has_updated::<Hp>(loaded[0]));
}

#[test]
fn save_is_deterministic_for_a_fixed_world() {
    let (world, mut registry) = build_side();
    let e = world.create();
    world.emplace(e, Hp { hp: 1 });
    world.emplace(e, Damage { damage: 2 });

    let first = registry.serializer().save();
    let second = registry.serializer().save();
    assert_eq!(first, second);
}

#[test]
fn empty_stream_loads_to_nothing() {
    let (world, mut registry) = build_side();
    registry.serializer().load(&[]).unwrap();
    assert!(world.is_empty());
}

#[test]
fn truncated_streams_are_rejected() {
    let (_world, mut registry) = build_side();
    let result = registry.serializer().load(&[0x01, 0x02]);
    assert!(matches!(result, Err(SerializeError::Truncated(_))));
}

#[test]
fn unknown_record_ids_are_rejected() {
    let (source_world, mut source_registry) = build_side();
    let e = source_world.create();
    source_world.emplace(e, Hp { hp: 1 });
    let mut data = source_registry.serializer().save();

    // Corrupt the component id of the first record after the sentinel.
    data[4] ^= 0xFF;
    let (_target_world, mut target_registry) = build_side();
    let result = target_registry.serializer().load(&data);
    assert!(matches!(
        result,
        Err(SerializeError::UnknownComponent { .. })
    ));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "matched pairs")]
fn one_sided_codecs_are_a_contract_violation() {
    init_logging();
    let world = World::new();
    let mut registry = Registry::new(world.clone());
    registry.init_new_systems();

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Orphan(u8);
    observer_ecs::components!(Orphan);

    ComponentRegistrant::<Orphan>::new(&mut registry)
        .create_storage()
        .set_save_func(|orphan: &Orphan| write_pod(&orphan.0));

    let _ = registry.serializer().save();
}
