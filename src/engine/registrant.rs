//! Fluent one-shot registration of a component type.
//!
//! `ComponentRegistrant` bundles everything a component might need to hook
//! up — storage, serialization, lifecycle callbacks, debug hooks — behind
//! a chainable builder, so application setup reads as one statement per
//! component:
//!
//! ```ignore
//! ComponentRegistrant::<Hp>::new(&mut registry)
//!     .create_storage()
//!     .add_serialize()
//!     .add_destroy_callback(|e, hp| log::debug!("entity {e} died at {} hp", hp.hp))
//!     .add_debugger();
//! ```
//!
//! Every method after `create_storage` may be called in any order; only
//! the serialization hooks matter for persistence.

use std::sync::Arc;

use bytemuck::Pod;

use crate::engine::debug::DebugSystem;
use crate::engine::error::SerializeResult;
use crate::engine::registry::Registry;
use crate::engine::types::{Component, Entity};
use crate::engine::world::World;

/// Chainable registration handle for component type `C`.
pub struct ComponentRegistrant<'r, C: Component> {
    world: Arc<World>,
    registry: &'r mut Registry,
    _component: std::marker::PhantomData<fn() -> C>,
}

impl<'r, C: Component> ComponentRegistrant<'r, C> {
    /// Starts registering `C` against the registry's world.
    pub fn new(registry: &'r mut Registry) -> Self {
        Self {
            world: registry.world().clone(),
            registry,
            _component: std::marker::PhantomData,
        }
    }

    /// Creates the storage for `C` (and its `Updated<C>` tag storage).
    pub fn create_storage(self) -> Self {
        self.world.create_storage::<C>();
        self
    }

    /// Registers the generated plain-old-data codec pair for `C`.
    pub fn add_serialize(self) -> Self
    where
        C: Pod,
    {
        self.registry.serializer().register_type::<C>();
        self
    }

    /// Registers a custom save function for `C`.
    pub fn set_save_func(self, save: impl Fn(&C) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.registry.serializer().register_custom_saver::<C>(save);
        self
    }

    /// Registers a custom load function for `C`.
    pub fn set_load_func(
        self,
        load: impl Fn(&mut &[u8]) -> SerializeResult<C> + Send + Sync + 'static,
    ) -> Self {
        self.registry.serializer().register_custom_loader::<C>(load);
        self
    }

    /// Registers a callback invoked after a `C` is constructed.
    pub fn add_construct_callback(
        self,
        callback: impl Fn(Entity, &C) + Send + Sync + 'static,
    ) -> Self {
        self.world
            .with_storage::<C, _>(|s| s.add_construct_callback(callback));
        self
    }

    /// Registers a callback invoked before a `C` is destroyed.
    pub fn add_destroy_callback(
        self,
        callback: impl Fn(Entity, &C) + Send + Sync + 'static,
    ) -> Self {
        self.world
            .with_storage::<C, _>(|s| s.add_destroy_callback(callback));
        self
    }

    /// Registers the default debug description for `C`.
    pub fn add_debugger(self) -> Self
    where
        C: std::fmt::Debug,
    {
        match self.registry.get_system::<DebugSystem>() {
            Some(debug) => debug.register_debug_component::<C>(),
            None => log::warn!("can't find DebugSystem"),
        }
        self
    }

    /// Registers a custom debug description for `C` under `title`.
    pub fn add_custom_debugger(
        self,
        title: &'static str,
        describe: impl Fn(Entity, &C) -> String + Send + Sync + 'static,
    ) -> Self {
        match self.registry.get_system::<DebugSystem>() {
            Some(debug) => debug.register_custom_debug::<C>(title, describe),
            None => log::warn!("can't find DebugSystem"),
        }
        self
    }

    /// Registers the default-constructed create hook for `C`.
    pub fn add_create_func(self) -> Self
    where
        C: Default,
    {
        match self.registry.get_system::<DebugSystem>() {
            Some(debug) => debug.register_add_component::<C>(),
            None => log::warn!("can't find DebugSystem"),
        }
        self
    }

    /// Registers a custom create hook for `C` under `title`.
    pub fn add_custom_create_func(
        self,
        title: &'static str,
        create: impl Fn(&World, Entity) + Send + Sync + 'static,
    ) -> Self {
        match self.registry.get_system::<DebugSystem>() {
            Some(debug) => debug.register_custom_add_component(title, create),
            None => log::warn!("can't find DebugSystem"),
        }
        self
    }
}
