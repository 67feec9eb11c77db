//! The entity authority and storage owner.
//!
//! `World` tracks which ids are alive, owns one [`Storage`] per registered
//! component type (plus one per `Updated<C>` tag), queues deferred
//! destruction, and fans out structural-change notifications.
//!
//! ## Threading
//!
//! Every method takes `&self`; interior state is guarded by fine-grained
//! locks. Structural mutation is a main-thread affair by protocol — the
//! refresh workers only ever take shared locks on the sorted entity lists —
//! but nothing here is unsafe to call from another thread, it just
//! contends.
//!
//! ## Deferred destruction
//!
//! `destroy` only queues. `flush` (called by the registry at the end of
//! each tick) sorts and deduplicates the queue, removes the ids from every
//! storage (destroy callbacks fire per component), recycles the ids, and
//! notifies subscribers. Destroying an id twice in one tick destroys it
//! once.
//!
//! ## Id recycling
//!
//! Free ids live in a deque with an asymmetric policy: `create` pops the
//! back when the back is at least the front, otherwise the front; `flush`
//! pushes a recycled id to the back when the current front is larger than
//! it, otherwise to the front. The observable effect is that the lowest
//! free id is strongly preferred and the live set stays compact.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::engine::scratch;
use crate::engine::storage::{
    ComponentMut, ComponentRef, EntitiesRef, ErasedStorage, Storage,
};
use crate::engine::types::{
    component_id_of, pretty_type_name, Component, ComponentTypeId, Entity, Updated,
};
use crate::profiling::profiler;

static LIVE_WORLDS: AtomicUsize = AtomicUsize::new(0);

type NotifyFn = Box<dyn Fn(Entity) + Send + Sync>;

/// A value (or tuple of values) that can be attached to an entity in one go.
///
/// Implemented for tuples of up to eight components; tag components are
/// passed by value like any other:
///
/// ```ignore
/// let e = observer.create_with((Name("boss".into()), Hp { hp: 1000 }, Boss));
/// ```
pub trait ComponentBundle {
    /// Emplaces every component of the bundle on `e`.
    fn attach(self, world: &World, e: Entity);
}

macro_rules! impl_bundle {
    ($($name:ident : $index:tt),+) => {
        impl<$($name: Component),+> ComponentBundle for ($($name,)+) {
            fn attach(self, world: &World, e: Entity) {
                $(world.emplace::<$name>(e, self.$index);)+
            }
        }
    };
}

impl_bundle!(A: 0);
impl_bundle!(A: 0, B: 1);
impl_bundle!(A: 0, B: 1, C: 2);
impl_bundle!(A: 0, B: 1, C: 2, D: 3);
impl_bundle!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_bundle!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_bundle!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_bundle!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// The world: entity lifecycle, component storages, notification bus.
pub struct World {
    entities: Arc<RwLock<Vec<Entity>>>,
    free_entities: Mutex<VecDeque<Entity>>,
    entities_to_destroy: Mutex<Vec<Entity>>,
    storages: RwLock<Vec<Arc<dyn ErasedStorage>>>,
    storage_index: RwLock<HashMap<TypeId, usize>>,
    component_names: RwLock<BTreeMap<String, ComponentTypeId>>,
    notify_callbacks: RwLock<Vec<NotifyFn>>,
    optimise_cursor: AtomicUsize,
}

impl World {
    /// Creates the world.
    ///
    /// A process is expected to host exactly one world; constructing a
    /// second live one is logged as a warning in debug builds but not
    /// prevented (tests routinely build throwaway worlds).
    pub fn new() -> Arc<World> {
        if LIVE_WORLDS.fetch_add(1, Ordering::Relaxed) > 0 && cfg!(debug_assertions) {
            log::warn!("more than one live World in this process");
        }
        Arc::new(World {
            entities: Arc::new(RwLock::new(Vec::new())),
            free_entities: Mutex::new(VecDeque::new()),
            entities_to_destroy: Mutex::new(Vec::new()),
            storages: RwLock::new(Vec::new()),
            storage_index: RwLock::new(HashMap::new()),
            component_names: RwLock::new(BTreeMap::new()),
            notify_callbacks: RwLock::new(Vec::new()),
            optimise_cursor: AtomicUsize::new(0),
        })
    }

    // ── entity lifecycle ──────────────────────────────────────────────

    /// Creates an entity, reusing a recycled id when one is free.
    pub fn create(&self) -> Entity {
        let entity = {
            let mut entities = self.entities.write();
            let mut free = self.free_entities.lock();
            if free.is_empty() {
                free.push_back(entities.len() as Entity);
            }
            let entity = if free.front() > free.back() {
                free.pop_front()
            } else {
                free.pop_back()
            }
            .expect("free list cannot be empty here");

            let position = entities.partition_point(|&x| x < entity);
            entities.insert(position, entity);
            entity
        };

        self.notify(entity);
        entity
    }

    /// Queues `e` for destruction at the next [`World::flush`].
    pub fn destroy(&self, e: Entity) {
        self.entities_to_destroy.lock().push(e);
    }

    /// Queues every entity of `span` for destruction.
    pub fn destroy_span(&self, span: &[Entity]) {
        self.entities_to_destroy.lock().extend_from_slice(span);
    }

    /// Destroys every queued entity: removes it from all storages (destroy
    /// callbacks fire), recycles its id, and notifies subscribers.
    pub fn flush(&self) {
        let _span = profiler::span("World::flush");

        let mut doomed = std::mem::take(&mut *self.entities_to_destroy.lock());
        if doomed.is_empty() {
            return;
        }
        doomed.sort_unstable();
        doomed.dedup();
        debug_assert!(
            doomed.iter().all(|&e| self.is_alive(e)),
            "destroy queued for an entity that is not alive"
        );

        {
            let storages = self.storages.read();
            for storage in storages.iter() {
                storage.remove_span(&doomed);
            }
        }

        {
            let mut entities = self.entities.write();
            entities.retain(|e| doomed.binary_search(e).is_err());
            let mut free = self.free_entities.lock();
            for &e in &doomed {
                if free.front().is_some_and(|&front| front > e) {
                    free.push_back(e);
                } else {
                    free.push_front(e);
                }
            }
        }

        for &e in &doomed {
            self.notify(e);
        }
    }

    /// Returns `true` if `e` is currently alive.
    pub fn is_alive(&self, e: Entity) -> bool {
        self.entities.read().binary_search(&e).is_ok()
    }

    /// Shared borrow of the sorted list of live entities.
    pub fn entities(&self) -> EntitiesRef {
        EntitiesRef::new(self.entities.clone())
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns `true` if no entity is alive.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    // ── storages ──────────────────────────────────────────────────────

    /// Creates the storage for `C` and its `Updated<C>` tag storage.
    ///
    /// Must be called once per component type before any typed operation;
    /// double registration is a debug-checked precondition.
    pub fn create_storage<C: Component>(&self) {
        self.add_storage::<C>();
        self.add_storage::<Updated<C>>();
        self.component_names
            .write()
            .insert(pretty_type_name::<C>(), component_id_of::<C>());
    }

    fn add_storage<T: Send + Sync + 'static>(&self) {
        let ty = TypeId::of::<T>();
        let mut index = self.storage_index.write();
        debug_assert!(
            !index.contains_key(&ty),
            "storage for `{}` already exists",
            std::any::type_name::<T>()
        );
        let mut storages = self.storages.write();
        index.insert(ty, storages.len());
        storages.push(Arc::new(Storage::<T>::new()));
    }

    /// Storage lookup by `TypeId`; absence is a contract violation.
    pub(crate) fn erased_storage(&self, ty: TypeId, name: &str) -> Arc<dyn ErasedStorage> {
        let index = self.storage_index.read();
        let slot = *index
            .get(&ty)
            .unwrap_or_else(|| panic!("storage for `{name}` does not exist (create it first)"));
        self.storages.read()[slot].clone()
    }

    pub(crate) fn with_storage<T: Send + Sync + 'static, R>(
        &self,
        f: impl FnOnce(&Storage<T>) -> R,
    ) -> R {
        let arc = self.erased_storage(TypeId::of::<T>(), std::any::type_name::<T>());
        let storage = arc
            .as_any()
            .downcast_ref::<Storage<T>>()
            .expect("storage registered under a mismatched type");
        f(storage)
    }

    // ── component operations ──────────────────────────────────────────

    /// Attaches `value` to `e`. Re-emplacing an existing component is a
    /// no-op (construct callbacks do not fire a second time).
    pub fn emplace<C: Component>(&self, e: Entity, value: C) {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.emplace(e, value));
        self.notify(e);
    }

    /// Attaches `value` to `e` and marks `C` updated.
    pub fn emplace_tagged<C: Component>(&self, e: Entity, value: C) {
        self.emplace::<C>(e, value);
        self.mark_updated::<C>(e);
    }

    /// Replaces `e`'s component with `value`, erasing any previous one
    /// first so destroy and construct callbacks both fire.
    pub fn force_emplace<C: Component>(&self, e: Entity, value: C) {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| {
            s.erase(e);
            s.emplace(e, value);
        });
        self.notify(e);
    }

    /// Inserts the `Updated<C>` tag for `e`.
    ///
    /// `e` must already bear `C` (debug-checked precondition).
    pub fn mark_updated<C: Component>(&self, e: Entity) {
        debug_assert!(
            self.has::<C>(e),
            "entity {e} must have the component before it can be marked as updated"
        );
        self.with_storage::<Updated<C>, _>(|s| s.emplace(e, Updated::default()));
        self.notify(e);
    }

    /// Removes the `Updated<C>` tag from `e`, if set.
    pub fn clear_update_tag<C: Component>(&self, e: Entity) {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<Updated<C>, _>(|s| s.erase(e));
        self.notify(e);
    }

    /// Removes the `Updated<C>` tag from every entity in `span`.
    pub fn clear_update_tag_span<C: Component>(&self, span: &[Entity]) {
        self.erase_span_in::<Updated<C>>(span);
    }

    /// Removes `e`'s `C` component, if present.
    pub fn erase<C: Component>(&self, e: Entity) {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.erase(e));
        self.notify(e);
    }

    /// Removes `C` from every entity in `span` (in any order, duplicates
    /// tolerated).
    pub fn erase_span<C: Component>(&self, span: &[Entity]) {
        self.erase_span_in::<C>(span);
    }

    fn erase_span_in<T: Send + Sync + 'static>(&self, span: &[Entity]) {
        if span.is_empty() {
            return;
        }
        debug_assert!(
            span.iter().all(|&e| self.is_alive(e)),
            "span contains an entity that is not alive"
        );

        let mut sorted = scratch::acquire();
        sorted.extend_from_slice(span);
        sorted.sort_unstable();
        sorted.dedup();
        self.with_storage::<T, _>(|s| s.remove_span(&sorted));
        for &e in sorted.iter() {
            self.notify(e);
        }
    }

    /// Returns `true` if `e` bears `C`.
    pub fn has<C: Component>(&self, e: Entity) -> bool {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.contains(e))
    }

    /// Returns `true` if `e` bears the `Updated<C>` tag.
    pub fn has_updated<C: Component>(&self, e: Entity) -> bool {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<Updated<C>, _>(|s| s.contains(e))
    }

    /// Shared borrow of `e`'s `C` component (membership is a precondition).
    pub fn get<C: Component>(&self, e: Entity) -> ComponentRef<C> {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.get(e))
    }

    /// Exclusive borrow of `e`'s `C` component.
    pub fn get_mut<C: Component>(&self, e: Entity) -> ComponentMut<C> {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.get_mut(e))
    }

    /// Shared borrow of `e`'s `C` component, or `None` when absent.
    pub fn try_get<C: Component>(&self, e: Entity) -> Option<ComponentRef<C>> {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.try_get(e))
    }

    /// Exclusive borrow of `e`'s `C` component, or `None` when absent.
    pub fn try_get_mut<C: Component>(&self, e: Entity) -> Option<ComponentMut<C>> {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        self.with_storage::<C, _>(|s| s.try_get_mut(e))
    }

    /// Sorted list of entities bearing `C` — the canonical filter input.
    pub fn component_entities<C: Component>(&self) -> EntitiesRef {
        self.with_storage::<C, _>(|s| s.entities())
    }

    /// Number of entities bearing `C`.
    pub fn count<C: Component>(&self) -> usize {
        self.with_storage::<C, _>(|s| ErasedStorage::len(s))
    }

    // ── notifications ─────────────────────────────────────────────────

    /// Subscribes `f` to every structural change (create, destroy, any
    /// component emplace or erase).
    pub fn subscribe(&self, f: impl Fn(Entity) + Send + Sync + 'static) {
        self.notify_callbacks.write().push(Box::new(f));
    }

    pub(crate) fn notify(&self, e: Entity) {
        let callbacks = self.notify_callbacks.read();
        for callback in callbacks.iter() {
            callback(e);
        }
    }

    pub(crate) fn notify_span(&self, span: &[Entity]) {
        let callbacks = self.notify_callbacks.read();
        for callback in callbacks.iter() {
            for &e in span {
                callback(e);
            }
        }
    }

    // ── maintenance & introspection ───────────────────────────────────

    /// One incremental sort pass on one storage, round-robin across ticks.
    pub fn optimise(&self) {
        let _span = profiler::span("World::optimise");

        let storages = self.storages.read();
        if storages.is_empty() {
            return;
        }
        let index = self.optimise_cursor.fetch_add(1, Ordering::Relaxed) % storages.len();
        storages[index].optimise();
    }

    /// Name → stable id of every registered component type.
    pub fn registered_component_names(&self) -> BTreeMap<String, ComponentTypeId> {
        self.component_names.read().clone()
    }

    /// Names of the storages `e` currently appears in (tag storages
    /// included).
    pub fn component_names(&self, e: Entity) -> Vec<String> {
        debug_assert!(self.is_alive(e), "entity {e} is not alive");
        let storages = self.storages.read();
        storages
            .iter()
            .filter(|s| s.contains(e))
            .map(|s| crate::engine::types::pretty_name(s.name()))
            .collect()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        LIVE_WORLDS.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hp(i32);
    struct Dead;
    impl Component for Hp {}
    impl Component for Dead {}

    #[test]
    fn ids_start_at_zero_and_recycle() {
        let world = World::new();
        assert_eq!(world.create(), 0);
        assert_eq!(world.create(), 1);

        world.destroy(0);
        world.flush();
        assert_eq!(&*world.entities(), &[1]);
        assert!(!world.is_alive(0));

        assert_eq!(world.create(), 0);
        assert!(world.is_alive(0));
    }

    #[test]
    fn duplicate_destroys_collapse() {
        let world = World::new();
        let e = world.create();
        world.destroy(e);
        world.destroy(e);
        world.flush();
        assert!(world.is_empty());
        // The id is recycled exactly once.
        assert_eq!(world.create(), e);
        assert_eq!(world.create(), 1);
    }

    #[test]
    fn emplace_erase_round_trip() {
        let world = World::new();
        world.create_storage::<Hp>();
        let e = world.create();

        world.emplace(e, Hp(5));
        assert!(world.has::<Hp>(e));
        assert_eq!(world.get::<Hp>(e).0, 5);
        assert_eq!(world.count::<Hp>(), 1);

        world.erase::<Hp>(e);
        assert!(!world.has::<Hp>(e));
        assert!(world.try_get::<Hp>(e).is_none());
        assert_eq!(world.count::<Hp>(), 0);
        assert!(world.component_entities::<Hp>().is_empty());
    }

    #[test]
    fn update_tags_follow_their_component() {
        let world = World::new();
        world.create_storage::<Hp>();
        let e = world.create();

        world.emplace_tagged(e, Hp(1));
        assert!(world.has_updated::<Hp>(e));

        world.clear_update_tag::<Hp>(e);
        assert!(!world.has_updated::<Hp>(e));

        world.mark_updated::<Hp>(e);
        assert!(world.has_updated::<Hp>(e));
    }

    #[test]
    fn destroy_clears_all_storages() {
        let world = World::new();
        world.create_storage::<Hp>();
        world.create_storage::<Dead>();
        let e = world.create();
        world.emplace(e, Hp(0));
        world.emplace(e, Dead);

        world.destroy(e);
        world.flush();
        assert!(world.component_entities::<Hp>().is_empty());
        assert!(world.component_entities::<Dead>().is_empty());
    }

    #[test]
    fn notify_fires_on_every_structural_change() {
        use std::sync::atomic::AtomicUsize;

        let world = World::new();
        world.create_storage::<Hp>();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        world.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let e = world.create(); // 1
        world.emplace(e, Hp(1)); // 2
        world.erase::<Hp>(e); // 3
        world.destroy(e);
        world.flush(); // 4
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn force_emplace_replaces_payload() {
        let world = World::new();
        world.create_storage::<Hp>();
        let e = world.create();
        world.emplace(e, Hp(1));
        world.emplace(e, Hp(99)); // no-op
        assert_eq!(world.get::<Hp>(e).0, 1);

        world.force_emplace(e, Hp(99));
        assert_eq!(world.get::<Hp>(e).0, 99);
    }

    #[test]
    fn spawn_order_matches_scenario_after_interleaving() {
        let world = World::new();
        let a = world.create(); // 0
        let b = world.create(); // 1
        let c = world.create(); // 2
        assert_eq!((a, b, c), (0, 1, 2));

        world.destroy(b);
        world.flush();
        assert_eq!(&*world.entities(), &[0, 2]);

        // The freed id is preferred over extending the high-water mark.
        assert_eq!(world.create(), 1);
        assert_eq!(world.create(), 3);
    }
}
