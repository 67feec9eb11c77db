//! Materialised entity lists for filters, and the scoped access API.
//!
//! An `Observer<F>` owns a cached, sorted snapshot of the entities matching
//! `F`, refreshed between frames by the observer manager's worker pool. It
//! re-exports the world's mutation API with the filter's access rules
//! applied:
//!
//! - `get`, `get_mut` and `mark_updated` demand the component be in
//!   `Require` and not in `Exclude`;
//! - everything else (`has`, `emplace`, `erase`, `try_get`,
//!   `clear_update_tag`, …) demands only that it not be in `Exclude`.
//!
//! `Updated<C>` in a filter list is stripped to `C` before the comparison.
//! The rules are checked as debug assertions and elided in release builds,
//! like every other precondition in the crate.
//!
//! ## Snapshot semantics
//!
//! The snapshot only changes in [`Observer::refresh`]. Mutations made by
//! system functions are visible to the *next* frame's refresh; iteration
//! within a frame is stable even while the underlying storages mutate.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::filter::{evaluate, FilterSpec, FilterTermList};
use crate::engine::scratch;
use crate::engine::storage::{ComponentMut, ComponentRef};
use crate::engine::types::{Component, Entity};
use crate::engine::world::{ComponentBundle, World};
use crate::profiling::profiler;

/// Fetches the `Require` components of an entity as a tuple of borrows.
///
/// Implemented for term tuples; each term contributes a shared borrow of
/// its tag-stripped component, in declaration order.
pub trait FetchRequire {
    /// Tuple of component borrows.
    type Refs;

    /// Borrows every required component of `e`.
    fn fetch(world: &World, e: Entity) -> Self::Refs;
}

macro_rules! impl_fetch {
    ($($term:ident),+) => {
        impl<$($term: crate::engine::filter::FilterTerm),+> FetchRequire for ($($term,)+) {
            type Refs = ($(ComponentRef<$term::Raw>,)+);

            fn fetch(world: &World, e: Entity) -> Self::Refs {
                ($(world.get::<$term::Raw>(e),)+)
            }
        }
    };
}

impl FetchRequire for () {
    type Refs = ();

    fn fetch(_world: &World, _e: Entity) -> Self::Refs {}
}

impl_fetch!(A);
impl_fetch!(A, B);
impl_fetch!(A, B, C);
impl_fetch!(A, B, C, D);
impl_fetch!(A, B, C, D, E);
impl_fetch!(A, B, C, D, E, F);
impl_fetch!(A, B, C, D, E, F, G);
impl_fetch!(A, B, C, D, E, F, G, H);

/// Type-erased face of an observer, held by the refresh slots.
pub trait AnyObserver: Send + Sync {
    /// Re-evaluates the filter and swaps in the fresh snapshot.
    fn refresh(&self);
}

/// Cached, refreshable list of entities matching `F`, plus the world API
/// scoped by `F`.
pub struct Observer<F: FilterSpec> {
    world: Arc<World>,
    entities: RwLock<Vec<Entity>>,
    _filter: std::marker::PhantomData<fn() -> F>,
}

impl<F: FilterSpec> Observer<F> {
    /// Creates the observer and runs an initial refresh.
    pub fn new(world: Arc<World>) -> Self {
        let observer = Self {
            world,
            entities: RwLock::new(Vec::new()),
            _filter: std::marker::PhantomData,
        };
        observer.refresh();
        observer
    }

    /// The world this observer views.
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Re-evaluates the filter against the world.
    ///
    /// Fires the notify pre-hook for the outgoing snapshot (so downstream
    /// caches know to invalidate), computes the fresh sorted list, and
    /// swaps it in under the exclusive lock.
    pub fn refresh(&self) {
        let _span = profiler::span("Observer::refresh");

        {
            let mut outgoing = scratch::acquire();
            outgoing.extend_from_slice(&self.entities.read());
            self.world.notify_span(&outgoing);
        }

        let fresh = evaluate::<F>(&self.world);
        let displaced = std::mem::replace(&mut *self.entities.write(), fresh);
        scratch::recycle(displaced);
    }

    // ── snapshot reads (shared lock) ──────────────────────────────────

    /// Iterates the snapshot, yielding [`EntityWrapper`]s.
    ///
    /// The iterator holds the snapshot's shared lock for its lifetime.
    pub fn iter(&self) -> ObserverIter<'_, F> {
        ObserverIter {
            guard: self.entities.read(),
            index: 0,
            observer: self,
        }
    }

    /// Number of matched entities as of the last refresh.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns `true` if the last refresh matched nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// The matched entity at `index`.
    pub fn at(&self, index: usize) -> EntityWrapper<'_, F> {
        let entities = self.entities.read();
        assert!(index < entities.len(), "observer index out of bounds");
        EntityWrapper {
            entity: entities[index],
            observer: self,
        }
    }

    /// Returns `true` if `e` is in the snapshot.
    pub fn contains(&self, e: Entity) -> bool {
        self.entities.read().binary_search(&e).is_ok()
    }

    /// Copies the snapshot out.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.read().clone()
    }

    // ── access-rule checks ────────────────────────────────────────────

    #[inline]
    fn check_required<C: Component>() {
        debug_assert!(
            F::Require::contains_raw(std::any::TypeId::of::<C>()),
            "component `{}` is not in the Require list",
            std::any::type_name::<C>()
        );
    }

    #[inline]
    fn check_not_excluded<C: Component>() {
        debug_assert!(
            !F::Exclude::contains_raw(std::any::TypeId::of::<C>()),
            "component `{}` is in the Exclude list",
            std::any::type_name::<C>()
        );
    }

    // ── lifecycle (unguarded: not component-scoped) ───────────────────

    /// Returns `true` if `e` is alive in the world.
    pub fn is_alive(&self, e: Entity) -> bool {
        self.world.is_alive(e)
    }

    /// Queues `e` for destruction at the end of the tick.
    pub fn destroy(&self, e: Entity) {
        self.world.destroy(e);
    }

    /// Queues a span of entities for destruction.
    pub fn destroy_span(&self, span: &[Entity]) {
        self.world.destroy_span(span);
    }

    /// Queues every entity of the snapshot for destruction.
    pub fn destroy_all(&self) {
        let entities = self.entities.read();
        self.world.destroy_span(&entities);
    }

    /// Creates a fresh entity.
    pub fn create(&self) -> EntityWrapper<'_, F> {
        EntityWrapper {
            entity: self.world.create(),
            observer: self,
        }
    }

    /// Creates an entity and attaches a bundle of components.
    pub fn create_with<B: ComponentBundle>(&self, bundle: B) -> EntityWrapper<'_, F> {
        let entity = self.world.create();
        bundle.attach(&self.world, entity);
        EntityWrapper {
            entity,
            observer: self,
        }
    }

    // ── component access (rule-guarded) ───────────────────────────────

    /// Returns `true` if `e` bears `C` (`C` must not be excluded).
    pub fn has<C: Component>(&self, e: Entity) -> bool {
        Self::check_not_excluded::<C>();
        self.world.has::<C>(e)
    }

    /// Shared borrow of a required component.
    pub fn get<C: Component>(&self, e: Entity) -> ComponentRef<C> {
        Self::check_required::<C>();
        Self::check_not_excluded::<C>();
        self.world.get::<C>(e)
    }

    /// Exclusive borrow of a required component.
    pub fn get_mut<C: Component>(&self, e: Entity) -> ComponentMut<C> {
        Self::check_required::<C>();
        Self::check_not_excluded::<C>();
        self.world.get_mut::<C>(e)
    }

    /// Shared borrow of a non-excluded component, or `None`.
    pub fn try_get<C: Component>(&self, e: Entity) -> Option<ComponentRef<C>> {
        Self::check_not_excluded::<C>();
        self.world.try_get::<C>(e)
    }

    /// Exclusive borrow of a non-excluded component, or `None`.
    pub fn try_get_mut<C: Component>(&self, e: Entity) -> Option<ComponentMut<C>> {
        Self::check_not_excluded::<C>();
        self.world.try_get_mut::<C>(e)
    }

    /// Attaches a component (`C` must not be excluded).
    pub fn emplace<C: Component>(&self, e: Entity, value: C) {
        Self::check_not_excluded::<C>();
        self.world.emplace(e, value);
    }

    /// Attaches a component and marks it updated.
    pub fn emplace_tagged<C: Component>(&self, e: Entity, value: C) {
        Self::check_not_excluded::<C>();
        self.world.emplace_tagged(e, value);
    }

    /// Marks a required component as updated.
    pub fn mark_updated<C: Component>(&self, e: Entity) {
        Self::check_required::<C>();
        Self::check_not_excluded::<C>();
        self.world.mark_updated::<C>(e);
    }

    /// Clears the update tag of a non-excluded component.
    pub fn clear_update_tag<C: Component>(&self, e: Entity) {
        Self::check_not_excluded::<C>();
        self.world.clear_update_tag::<C>(e);
    }

    /// Clears the update tag across the whole snapshot.
    pub fn clear_update_tags<C: Component>(&self) {
        Self::check_not_excluded::<C>();
        let snapshot = self.snapshot();
        self.world.clear_update_tag_span::<C>(&snapshot);
    }

    /// Removes a non-excluded component from `e`.
    pub fn erase<C: Component>(&self, e: Entity) {
        Self::check_not_excluded::<C>();
        self.world.erase::<C>(e);
    }

    /// Removes a non-excluded component from a span of entities.
    pub fn erase_span<C: Component>(&self, span: &[Entity]) {
        Self::check_not_excluded::<C>();
        self.world.erase_span::<C>(span);
    }

    /// Removes a non-excluded component from the whole snapshot.
    pub fn erase_all<C: Component>(&self) {
        Self::check_not_excluded::<C>();
        let snapshot = self.snapshot();
        self.world.erase_span::<C>(&snapshot);
    }
}

impl<F: FilterSpec> AnyObserver for Observer<F> {
    fn refresh(&self) {
        Observer::refresh(self);
    }
}

impl<'a, F: FilterSpec> IntoIterator for &'a Observer<F> {
    type Item = EntityWrapper<'a, F>;
    type IntoIter = ObserverIter<'a, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an observer's snapshot.
///
/// Holds the snapshot's shared lock; drop it (leave the loop) before
/// calling anything that refreshes the observer.
pub struct ObserverIter<'a, F: FilterSpec> {
    guard: parking_lot::RwLockReadGuard<'a, Vec<Entity>>,
    index: usize,
    observer: &'a Observer<F>,
}

impl<'a, F: FilterSpec> Iterator for ObserverIter<'a, F> {
    type Item = EntityWrapper<'a, F>;

    fn next(&mut self) -> Option<Self::Item> {
        let entity = *self.guard.get(self.index)?;
        self.index += 1;
        Some(EntityWrapper {
            entity,
            observer: self.observer,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.guard.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<F: FilterSpec> ExactSizeIterator for ObserverIter<'_, F> {}

/// Thin non-owning handle pairing an entity with its observer.
///
/// Forwards the observer's scoped API with the entity bound, and offers a
/// tuple accessor for the filter's required components.
pub struct EntityWrapper<'a, F: FilterSpec> {
    entity: Entity,
    observer: &'a Observer<F>,
}

impl<F: FilterSpec> Clone for EntityWrapper<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: FilterSpec> Copy for EntityWrapper<'_, F> {}

impl<'a, F: FilterSpec> EntityWrapper<'a, F> {
    /// The wrapped entity id.
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Borrows the filter's `Require` components as a tuple, in
    /// declaration order (`Updated<C>` terms yield `C`).
    pub fn components(&self) -> <F::Require as FetchRequire>::Refs
    where
        F::Require: FetchRequire,
    {
        <F::Require as FetchRequire>::fetch(self.observer.world(), self.entity)
    }

    /// Returns `true` if the entity is still alive.
    pub fn is_alive(&self) -> bool {
        self.observer.is_alive(self.entity)
    }

    /// Queues the entity for destruction at the end of the tick.
    pub fn destroy(&self) {
        self.observer.destroy(self.entity);
    }

    /// Returns `true` if the entity bears `C`.
    pub fn has<C: Component>(&self) -> bool {
        self.observer.has::<C>(self.entity)
    }

    /// Shared borrow of a required component.
    pub fn get<C: Component>(&self) -> ComponentRef<C> {
        self.observer.get::<C>(self.entity)
    }

    /// Exclusive borrow of a required component.
    pub fn get_mut<C: Component>(&self) -> ComponentMut<C> {
        self.observer.get_mut::<C>(self.entity)
    }

    /// Shared borrow of a non-excluded component, or `None`.
    pub fn try_get<C: Component>(&self) -> Option<ComponentRef<C>> {
        self.observer.try_get::<C>(self.entity)
    }

    /// Exclusive borrow of a non-excluded component, or `None`.
    pub fn try_get_mut<C: Component>(&self) -> Option<ComponentMut<C>> {
        self.observer.try_get_mut::<C>(self.entity)
    }

    /// Attaches a component to the entity.
    pub fn emplace<C: Component>(&self, value: C) {
        self.observer.emplace(self.entity, value);
    }

    /// Attaches a component and marks it updated.
    pub fn emplace_tagged<C: Component>(&self, value: C) {
        self.observer.emplace_tagged(self.entity, value);
    }

    /// Marks a required component as updated.
    pub fn mark_updated<C: Component>(&self) {
        self.observer.mark_updated::<C>(self.entity);
    }

    /// Clears the update tag of a non-excluded component.
    pub fn clear_update_tag<C: Component>(&self) {
        self.observer.clear_update_tag::<C>(self.entity);
    }

    /// Removes a non-excluded component from the entity.
    pub fn erase<C: Component>(&self) {
        self.observer.erase::<C>(self.entity);
    }
}

impl<F: FilterSpec> From<EntityWrapper<'_, F>> for Entity {
    fn from(wrapper: EntityWrapper<'_, F>) -> Entity {
        wrapper.entity
    }
}
