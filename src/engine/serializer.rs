//! World save/load as an opaque byte stream.
//!
//! ## Stream layout
//!
//! For each live entity, the stream carries the entity sentinel id followed
//! by one record per registered component the entity bears:
//!
//! ```text
//! [ENTITY_SENTINEL] [comp id][payload] [comp id][payload] …  [ENTITY_SENTINEL] …
//! ```
//!
//! Ids are little-endian `u32` CRC-32 values; payload length is whatever
//! the component's codec wrote (zero bytes for tags). Loading creates a
//! fresh entity at each sentinel, so ids are renumbered; component
//! payloads and per-entity component sets are preserved.
//!
//! Plain-old-data components get their codecs generated from `bytemuck`;
//! anything else registers a custom save/load pair. Save and load
//! functions must be registered in matched pairs — checked at save and
//! load time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytemuck::Pod;

use crate::engine::error::{
    SerializeError, SerializeResult, TruncatedStreamError, UnmatchedCodecsError,
};
use crate::engine::types::{component_id_of, Component, ComponentTypeId, Entity, ENTITY_SENTINEL};
use crate::engine::world::World;
use crate::profiling::profiler;

type SaveFn = Box<dyn Fn(Entity, &mut Vec<u8>) + Send + Sync>;
type LoadFn = Box<dyn Fn(Entity, &mut &[u8]) -> SerializeResult<()> + Send + Sync>;

/// Registered component codecs plus the save/load entry points.
///
/// Savers run in ascending component-id order, so the stream is
/// deterministic for a given world state.
pub struct Serializer {
    world: Arc<World>,
    save_functions: BTreeMap<ComponentTypeId, SaveFn>,
    load_functions: BTreeMap<ComponentTypeId, LoadFn>,
}

impl Serializer {
    /// Creates a serializer over `world` with no codecs registered.
    pub fn new(world: Arc<World>) -> Self {
        Self {
            world,
            save_functions: BTreeMap::new(),
            load_functions: BTreeMap::new(),
        }
    }

    /// Registers the generated codec pair for a plain-old-data component.
    ///
    /// Tags serialize as their id with an empty payload.
    pub fn register_type<C: Component + Pod>(&mut self) {
        self.register_custom_saver::<C>(|component| bytemuck::bytes_of(component).to_vec());
        self.register_custom_loader::<C>(read_pod::<C>);
    }

    /// Registers a custom save function for `C`.
    ///
    /// Registering a second saver for the same component is a contract
    /// violation.
    pub fn register_custom_saver<C: Component>(
        &mut self,
        save: impl Fn(&C) -> Vec<u8> + Send + Sync + 'static,
    ) {
        let id = component_id_of::<C>();
        debug_assert!(
            !self.save_functions.contains_key(&id),
            "component `{}` already has a save function",
            std::any::type_name::<C>()
        );

        let world = self.world.clone();
        self.save_functions.insert(
            id,
            Box::new(move |e, out| {
                if world.has::<C>(e) {
                    let payload = save(&world.get::<C>(e));
                    out.extend_from_slice(&id.to_le_bytes());
                    out.extend_from_slice(&payload);
                }
            }),
        );
    }

    /// Registers a custom load function for `C`.
    ///
    /// The loader consumes its payload from the stream, emplaces the
    /// component, and marks it updated so first-frame filters see it.
    pub fn register_custom_loader<C: Component>(
        &mut self,
        load: impl Fn(&mut &[u8]) -> SerializeResult<C> + Send + Sync + 'static,
    ) {
        let id = component_id_of::<C>();
        debug_assert!(
            !self.load_functions.contains_key(&id),
            "component `{}` already has a load function",
            std::any::type_name::<C>()
        );

        let world = self.world.clone();
        self.load_functions.insert(
            id,
            Box::new(move |e, data| {
                let component = load(data)?;
                world.emplace(e, component);
                world.mark_updated::<C>(e);
                Ok(())
            }),
        );
    }

    /// Serializes every live entity into a byte stream.
    pub fn save(&self) -> Vec<u8> {
        let _span = profiler::span("Serializer::save");
        self.check_matched_pairs();

        let started = Instant::now();
        let entities: Vec<Entity> = self.world.entities().to_vec();

        let mut data = Vec::new();
        for &e in &entities {
            data.extend_from_slice(&ENTITY_SENTINEL.to_le_bytes());
            for save in self.save_functions.values() {
                save(e, &mut data);
            }
        }

        log::info!(
            "saved {} entities ({} bytes) in {:.3?}",
            entities.len(),
            data.len(),
            started.elapsed()
        );
        data
    }

    /// Replays a byte stream into the world.
    ///
    /// Each sentinel creates a fresh entity (ids are renumbered); every
    /// other record dispatches to its component's loader.
    pub fn load(&self, mut data: &[u8]) -> SerializeResult<()> {
        let _span = profiler::span("Serializer::load");
        self.check_matched_pairs();

        if data.is_empty() {
            return Ok(());
        }
        let started = Instant::now();

        let mut loaded = 0usize;
        let mut entity: Option<Entity> = None;
        while !data.is_empty() {
            let id = read_id(&mut data)?;
            if id == ENTITY_SENTINEL {
                entity = Some(self.world.create());
                loaded += 1;
                continue;
            }

            let Some(e) = entity else {
                return Err(SerializeError::ComponentBeforeEntity { id });
            };
            let load = self
                .load_functions
                .get(&id)
                .ok_or(SerializeError::UnknownComponent { id })?;
            load(e, &mut data)?;
        }

        log::info!("loaded {loaded} entities in {:.3?}", started.elapsed());
        Ok(())
    }

    /// Every save function must have its load counterpart and vice versa.
    fn check_matched_pairs(&self) {
        let matched = self.save_functions.len() == self.load_functions.len()
            && self
                .save_functions
                .keys()
                .all(|id| self.load_functions.contains_key(id));
        if !matched {
            let error = UnmatchedCodecsError {
                savers: self.save_functions.len(),
                loaders: self.load_functions.len(),
            };
            log::error!("{error}");
            debug_assert!(false, "{error}");
        }
    }
}

fn read_id(data: &mut &[u8]) -> SerializeResult<ComponentTypeId> {
    if data.len() < 4 {
        return Err(TruncatedStreamError {
            needed: 4,
            remaining: data.len(),
        }
        .into());
    }
    let (head, rest) = data.split_at(4);
    *data = rest;
    Ok(ComponentTypeId::from_le_bytes(
        head.try_into().expect("split_at guarantees four bytes"),
    ))
}

/// Reads `size_of::<C>()` bytes and reinterprets them as `C`.
pub fn read_pod<C: Pod>(data: &mut &[u8]) -> SerializeResult<C> {
    let size = std::mem::size_of::<C>();
    if data.len() < size {
        return Err(TruncatedStreamError {
            needed: size,
            remaining: data.len(),
        }
        .into());
    }
    let (head, rest) = data.split_at(size);
    let value = bytemuck::try_pod_read_unaligned(head).map_err(|_| {
        SerializeError::Truncated(TruncatedStreamError {
            needed: size,
            remaining: head.len(),
        })
    })?;
    *data = rest;
    Ok(value)
}

/// Serializes a plain-old-data value to bytes (custom-codec helper).
pub fn write_pod<C: Pod>(value: &C) -> Vec<u8> {
    bytemuck::bytes_of(value).to_vec()
}
