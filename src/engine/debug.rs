//! Introspection hooks for debug tooling.
//!
//! The rendering side of entity inspection lives outside the core; what
//! stays here is the data it needs: a bounded history of the entity count,
//! per-component *debug* callbacks that describe an entity's components,
//! and per-component *create* callbacks a UI can invoke to attach a
//! component by name. The system is installed automatically by
//! `Registry::new`, and component types opt in through the registrant
//! (`add_debugger`, `add_create_func`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::filter::RunEveryFrame;
use crate::engine::observer::Observer;
use crate::engine::registry::Registry;
use crate::engine::system::System;
use crate::engine::types::{pretty_type_name, Component, Entity};
use crate::engine::world::World;

const HISTORY_CAPACITY: usize = 4096;

type DebugFn = Box<dyn Fn(Entity) -> Option<String> + Send + Sync>;
type CreateFn = Box<dyn Fn(Entity) + Send + Sync>;

/// Ring buffer of `(tick, live-entity-count)` samples.
#[derive(Default)]
struct EntityHistory {
    samples: Vec<(u64, usize)>,
    offset: usize,
    tick: u64,
}

impl EntityHistory {
    fn record(&mut self, count: usize) {
        let sample = (self.tick, count);
        self.tick += 1;
        if self.samples.len() < HISTORY_CAPACITY {
            self.samples.push(sample);
        } else {
            self.samples[self.offset] = sample;
            self.offset = (self.offset + 1) % HISTORY_CAPACITY;
        }
    }

    fn in_order(&self) -> Vec<(u64, usize)> {
        let mut out = Vec::with_capacity(self.samples.len());
        out.extend_from_slice(&self.samples[self.offset..]);
        out.extend_from_slice(&self.samples[..self.offset]);
        out
    }
}

/// Core-side debug system: entity-count history plus component hooks.
pub struct DebugSystem {
    world: Arc<World>,
    debug_callbacks: Mutex<Vec<DebugFn>>,
    create_callbacks: Mutex<BTreeMap<String, CreateFn>>,
    history: Mutex<EntityHistory>,
}

impl DebugSystem {
    /// Creates the debug system over `world`.
    pub fn new(world: Arc<World>) -> Self {
        Self {
            world,
            debug_callbacks: Mutex::new(Vec::new()),
            create_callbacks: Mutex::new(BTreeMap::new()),
            history: Mutex::new(EntityHistory::default()),
        }
    }

    fn track_entities(&self, _observer: &Observer<RunEveryFrame>) {
        self.history.lock().record(self.world.len());
    }

    /// Registers the default debug description for `C`.
    pub fn register_debug_component<C: Component + fmt::Debug>(&self) {
        let world = self.world.clone();
        self.debug_callbacks.lock().push(Box::new(move |e| {
            world
                .try_get::<C>(e)
                .map(|c| format!("{}: {:?}", pretty_type_name::<C>(), &*c))
        }));
    }

    /// Registers a custom debug description for `C` under `title`.
    pub fn register_custom_debug<C: Component>(
        &self,
        title: &'static str,
        describe: impl Fn(Entity, &C) -> String + Send + Sync + 'static,
    ) {
        let world = self.world.clone();
        self.debug_callbacks.lock().push(Box::new(move |e| {
            world
                .try_get::<C>(e)
                .map(|c| format!("{title}: {}", describe(e, &c)))
        }));
    }

    /// Registers the default-constructed create hook for `C`.
    pub fn register_add_component<C: Component + Default>(&self) {
        let world = self.world.clone();
        self.create_callbacks.lock().insert(
            pretty_type_name::<C>(),
            Box::new(move |e| world.emplace(e, C::default())),
        );
    }

    /// Registers a custom create hook under `title`.
    pub fn register_custom_add_component(
        &self,
        title: &'static str,
        create: impl Fn(&World, Entity) + Send + Sync + 'static,
    ) {
        let world = self.world.clone();
        self.create_callbacks
            .lock()
            .insert(title.to_string(), Box::new(move |e| create(&world, e)));
    }

    /// Describes `e` through every registered debug callback.
    pub fn entity_report(&self, e: Entity) -> Vec<String> {
        let callbacks = self.debug_callbacks.lock();
        callbacks.iter().filter_map(|describe| describe(e)).collect()
    }

    /// Titles a UI can offer for attaching components.
    pub fn creatable_components(&self) -> Vec<String> {
        self.create_callbacks.lock().keys().cloned().collect()
    }

    /// Invokes the create hook registered under `title`.
    pub fn create_component(&self, title: &str, e: Entity) -> bool {
        let callbacks = self.create_callbacks.lock();
        match callbacks.get(title) {
            Some(create) => {
                create(e);
                true
            }
            None => false,
        }
    }

    /// The recorded `(tick, entity-count)` history, oldest first.
    pub fn entities_history(&self) -> Vec<(u64, usize)> {
        self.history.lock().in_order()
    }
}

impl System for DebugSystem {
    fn setup(self: Arc<Self>, registry: &mut Registry) {
        let this = self.clone();
        registry
            .register_function(
                "DebugSystem::track_entities",
                move |observer: &Observer<RunEveryFrame>| this.track_entities(observer),
            )
            .ok();
    }

    fn stop(&self, registry: &mut Registry) {
        registry
            .unregister_function("DebugSystem::track_entities")
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_wraps_in_order() {
        let mut history = EntityHistory::default();
        for i in 0..(HISTORY_CAPACITY + 3) {
            history.record(i);
        }
        let samples = history.in_order();
        assert_eq!(samples.len(), HISTORY_CAPACITY);
        assert_eq!(samples[0], (3, 3));
        let (last_tick, last_count) = samples[samples.len() - 1];
        assert_eq!(last_tick, (HISTORY_CAPACITY + 2) as u64);
        assert_eq!(last_count, HISTORY_CAPACITY + 2);
    }
}
