//! Typed component storage over a sparse set.
//!
//! Each component type gets one [`Storage`]: a sparse set for O(1)
//! membership, a component vector aligned with the unsorted dense list, and
//! a **second, sorted** entity vector that filter evaluation reads. The
//! unsorted dense pair gives O(1) component access; the sorted list gives
//! O(n) two-pointer merges for set operations.
//!
//! ## Locking
//!
//! The sorted `entities` vector is the only storage state touched by
//! refresh workers, and it has its own lock: workers take it shared, the
//! main thread's mutations take it exclusive. The sparse set + component
//! vector live behind a second lock whose guards back [`Storage::get`] and
//! [`Storage::get_mut`]; those use `try_*` acquisition so an aliasing
//! misuse (holding a component borrow while mutating the same storage)
//! panics with a clear message instead of deadlocking.
//!
//! ## Callbacks
//!
//! Construct callbacks fire after a component is built; destroy callbacks
//! fire *before* physical destruction and see a still-valid reference.

use std::any::Any;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::engine::scratch;
use crate::engine::sparse_set::SparseSet;
use crate::engine::types::{component_id_of, ComponentTypeId, Entity};

type Callback<T> = Box<dyn Fn(Entity, &T) + Send + Sync>;

/// Sparse set plus the component vector it indexes, under one lock.
struct Channel<T> {
    set: SparseSet,
    components: Vec<T>,
    optimised: bool,
}

/// Shared read guard over a component slot.
///
/// Owns its lock, so it can be returned from accessors and held across
/// statements; dereferences to the component.
pub struct ComponentRef<T> {
    guard: ArcRwLockReadGuard<RawRwLock, Channel<T>>,
    slot: usize,
}

impl<T> std::ops::Deref for ComponentRef<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard.components[self.slot]
    }
}

/// Exclusive write guard over a component slot.
pub struct ComponentMut<T> {
    guard: ArcRwLockWriteGuard<RawRwLock, Channel<T>>,
    slot: usize,
}

impl<T> std::ops::Deref for ComponentMut<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard.components[self.slot]
    }
}

impl<T> std::ops::DerefMut for ComponentMut<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard.components[self.slot]
    }
}

/// Shared read guard over a sorted entity list.
pub struct EntitiesRef {
    guard: ArcRwLockReadGuard<RawRwLock, Vec<Entity>>,
}

impl EntitiesRef {
    pub(crate) fn new(lock: Arc<RwLock<Vec<Entity>>>) -> Self {
        Self {
            guard: lock.read_arc(),
        }
    }
}

impl std::ops::Deref for EntitiesRef {
    type Target = [Entity];

    #[inline]
    fn deref(&self) -> &[Entity] {
        &self.guard
    }
}

/// Typed component storage for `T`.
pub struct Storage<T> {
    data: Arc<RwLock<Channel<T>>>,
    entities: Arc<RwLock<Vec<Entity>>>,
    on_construct: RwLock<Vec<Callback<T>>>,
    on_destroy: RwLock<Vec<Callback<T>>>,
    id: ComponentTypeId,
    name: &'static str,
}

impl<T: Send + Sync + 'static> Default for Storage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Storage<T> {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(Channel {
                set: SparseSet::new(),
                components: Vec::new(),
                optimised: true,
            })),
            entities: Arc::new(RwLock::new(Vec::new())),
            on_construct: RwLock::new(Vec::new()),
            on_destroy: RwLock::new(Vec::new()),
            id: component_id_of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Registers a callback invoked after a component is constructed.
    pub fn add_construct_callback(&self, f: impl Fn(Entity, &T) + Send + Sync + 'static) {
        self.on_construct.write().push(Box::new(f));
    }

    /// Registers a callback invoked before a component is destroyed.
    pub fn add_destroy_callback(&self, f: impl Fn(Entity, &T) + Send + Sync + 'static) {
        self.on_destroy.write().push(Box::new(f));
    }

    /// Inserts a component for `e`.
    ///
    /// Returns `false` (a no-op, callbacks not fired) when `e` already has
    /// the component. Keeps the sorted entity list in lock-step and clears
    /// the optimised flag when the insert position is not the end.
    pub fn emplace(&self, e: Entity, value: T) -> bool {
        let slot = {
            let mut data = self.data.write();
            if !data.set.emplace(e) {
                return false;
            }
            data.components.push(value);
            if data
                .set
                .dense()
                .len()
                .checked_sub(2)
                .is_some_and(|prev| data.set.dense()[prev] > e)
            {
                data.optimised = false;
            }
            data.components.len() - 1
        };

        {
            let mut entities = self.entities.write();
            let position = entities.partition_point(|&x| x < e);
            entities.insert(position, e);
        }

        let data = self.data.read();
        let callbacks = self.on_construct.read();
        for callback in callbacks.iter() {
            callback(e, &data.components[slot]);
        }
        true
    }

    /// Removes the component of `e`, if present. Returns `true` on removal.
    ///
    /// Destroy callbacks fire first and observe the component intact.
    pub fn erase(&self, e: Entity) -> bool {
        if !self.contains(e) {
            return false;
        }
        self.destroy_one(e);

        let mut entities = self.entities.write();
        let position = entities.partition_point(|&x| x < e);
        debug_assert!(entities.get(position) == Some(&e));
        entities.remove(position);
        true
    }

    /// Removes the components of every entity in `span` that has one.
    ///
    /// `span` must be sorted ascending and free of duplicates; the world
    /// guarantees this at flush and sorts user-supplied spans first.
    pub fn remove_span(&self, span: &[Entity]) {
        debug_assert!(span.windows(2).all(|w| w[0] < w[1]), "span must be sorted and unique");
        if span.is_empty() {
            return;
        }

        let mut touched = false;
        for &e in span {
            if self.contains(e) {
                self.destroy_one(e);
                touched = true;
            }
        }
        if !touched {
            return;
        }

        let mut remaining = scratch::acquire();
        let mut entities = self.entities.write();
        crate::engine::filter::difference_into(&entities, span, &mut remaining);
        let displaced = std::mem::replace(&mut *entities, remaining.into_vec());
        drop(entities);
        scratch::recycle(displaced);
    }

    /// Fires destroy callbacks for `e` and swap-pops its component.
    fn destroy_one(&self, e: Entity) {
        {
            let data = self.data.read();
            let slot = data.set.slot_of(e).expect("destroy_one on an absent entity");
            let callbacks = self.on_destroy.read();
            for callback in callbacks.iter() {
                callback(e, &data.components[slot]);
            }
        }

        let mut data = self.data.write();
        let slot = data.set.erase(e);
        data.components.swap_remove(slot);
        // The swap relocated the former tail unless we popped the tail itself.
        if slot < data.components.len() {
            data.optimised = false;
        }
    }

    /// One adjacent-swap pass over the dense list.
    ///
    /// After each swap the sparse map and component vector are fixed up, so
    /// the storage stays coherent mid-pass. Returns `true` iff the pass
    /// performed no swaps, i.e. the dense list is fully sorted; subsequent
    /// calls are then no-ops until an insert or erase disturbs the order.
    pub fn optimise(&self) -> bool {
        let mut data = self.data.write();
        if data.optimised {
            return true;
        }

        let mut swaps = 0usize;
        for i in 1..data.set.len() {
            let (a, b) = (data.set.dense()[i - 1], data.set.dense()[i]);
            if a > b {
                data.set.swap_dense(i - 1, i);
                data.components.swap(i - 1, i);
                swaps += 1;
            }
        }
        if swaps == 0 {
            data.optimised = true;
        }
        swaps == 0
    }

    /// Returns `true` if `e` has the component.
    #[inline]
    pub fn contains(&self, e: Entity) -> bool {
        self.data.read().set.has(e)
    }

    /// Shared borrow of `e`'s component.
    ///
    /// Membership is a debug-checked precondition; panics (rather than
    /// deadlocks) if the storage is exclusively borrowed on this thread.
    pub fn get(&self, e: Entity) -> ComponentRef<T> {
        let guard = self
            .data
            .try_read_arc()
            .unwrap_or_else(|| panic!("component storage `{}` is exclusively borrowed", self.name));
        let slot = guard
            .set
            .slot_of(e)
            .unwrap_or_else(|| panic!("entity {e} does not have `{}`", self.name));
        ComponentRef { guard, slot }
    }

    /// Exclusive borrow of `e`'s component.
    pub fn get_mut(&self, e: Entity) -> ComponentMut<T> {
        let guard = self
            .data
            .try_write_arc()
            .unwrap_or_else(|| panic!("component storage `{}` is already borrowed", self.name));
        let slot = guard
            .set
            .slot_of(e)
            .unwrap_or_else(|| panic!("entity {e} does not have `{}`", self.name));
        ComponentMut { guard, slot }
    }

    /// Shared borrow of `e`'s component, or `None` when absent.
    pub fn try_get(&self, e: Entity) -> Option<ComponentRef<T>> {
        let guard = self
            .data
            .try_read_arc()
            .unwrap_or_else(|| panic!("component storage `{}` is exclusively borrowed", self.name));
        let slot = guard.set.slot_of(e)?;
        Some(ComponentRef { guard, slot })
    }

    /// Exclusive borrow of `e`'s component, or `None` when absent.
    pub fn try_get_mut(&self, e: Entity) -> Option<ComponentMut<T>> {
        let guard = self
            .data
            .try_write_arc()
            .unwrap_or_else(|| panic!("component storage `{}` is already borrowed", self.name));
        let slot = guard.set.slot_of(e)?;
        Some(ComponentMut { guard, slot })
    }

    /// Shared borrow of the sorted list of entities bearing `T`.
    pub fn entities(&self) -> EntitiesRef {
        EntitiesRef::new(self.entities.clone())
    }
}

/// Object-safe face of a storage, used by the world.
///
/// The world keeps `Arc<dyn ErasedStorage>` and downcasts through
/// [`ErasedStorage::as_any`] when a typed operation is requested; the
/// erased surface is exactly what entity destruction, the per-tick
/// optimise step, and filter evaluation need.
pub trait ErasedStorage: Send + Sync {
    /// Removes `e`'s component, if present.
    fn remove(&self, e: Entity);

    /// Removes the components of a sorted, deduplicated span.
    fn remove_span(&self, span: &[Entity]);

    /// One incremental sort pass; `true` iff already sorted.
    fn optimise(&self) -> bool;

    /// Membership test.
    fn contains(&self, e: Entity) -> bool;

    /// Number of entities bearing the component.
    fn len(&self) -> usize;

    /// Returns `true` if no entity bears the component.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current length of the sorted entity list.
    fn entities_len(&self) -> usize;

    /// Calls `f` with the sorted entity list under a shared lock.
    fn with_entities(&self, f: &mut dyn FnMut(&[Entity]));

    /// Stable component-type id (CRC-32 of the type name).
    fn component_id(&self) -> ComponentTypeId;

    /// Full type name of the component.
    fn name(&self) -> &'static str;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + Sync + 'static> ErasedStorage for Storage<T> {
    fn remove(&self, e: Entity) {
        self.erase(e);
    }

    fn remove_span(&self, span: &[Entity]) {
        Storage::remove_span(self, span);
    }

    fn optimise(&self) -> bool {
        Storage::optimise(self)
    }

    fn contains(&self, e: Entity) -> bool {
        Storage::contains(self, e)
    }

    fn len(&self) -> usize {
        self.data.read().set.len()
    }

    fn entities_len(&self) -> usize {
        self.entities.read().len()
    }

    fn with_entities(&self, f: &mut dyn FnMut(&[Entity])) {
        let entities = self.entities.read();
        f(&entities);
    }

    fn component_id(&self) -> ComponentTypeId {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emplace_is_idempotent_and_sorted() {
        let storage = Storage::<i32>::new();
        assert!(storage.emplace(4, 40));
        assert!(storage.emplace(1, 10));
        assert!(!storage.emplace(4, 99));

        assert_eq!(&*storage.entities(), &[1, 4]);
        assert_eq!(*storage.get(4), 40);
        assert_eq!(ErasedStorage::len(&storage), 2);
    }

    #[test]
    fn erase_restores_prior_state() {
        let storage = Storage::<i32>::new();
        storage.emplace(2, 20);
        storage.emplace(6, 60);

        assert!(storage.erase(6));
        assert!(!storage.erase(6));
        assert_eq!(&*storage.entities(), &[2]);
        assert!(storage.try_get(6).is_none());
        assert_eq!(*storage.get(2), 20);
    }

    #[test]
    fn destroy_callbacks_fire_before_removal() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);

        let storage = Storage::<i32>::new();
        storage.add_destroy_callback(|e, value| {
            assert_eq!(e, 3);
            assert_eq!(*value, 30);
            SEEN.fetch_add(1, Ordering::SeqCst);
        });
        storage.emplace(3, 30);
        storage.erase(3);
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn construct_callbacks_fire_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let storage = Storage::<i32>::new();
        let seen = count.clone();
        storage.add_construct_callback(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        storage.emplace(1, 5);
        storage.emplace(1, 5);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_span_rebuilds_sorted_list() {
        let storage = Storage::<i32>::new();
        for e in [1, 3, 5, 7] {
            storage.emplace(e, e as i32);
        }
        storage.remove_span(&[3, 7, 9]);
        assert_eq!(&*storage.entities(), &[1, 5]);
        assert!(!storage.contains(3));
        assert!(storage.contains(5));
    }

    #[test]
    fn optimise_sorts_dense_incrementally() {
        let storage = Storage::<i32>::new();
        for e in [9, 1, 5] {
            storage.emplace(e, e as i32);
        }

        // Bubble passes until sorted, bounded by the element count.
        let mut passes = 0;
        while !storage.optimise() {
            passes += 1;
            assert!(passes < 8);
        }
        assert!(storage.optimise());
        assert_eq!(storage.data.read().set.dense(), &[1, 5, 9]);
        assert_eq!(*storage.get(9), 9);
        assert_eq!(*storage.get(1), 1);
    }

    #[test]
    fn tag_storage_tracks_membership_only() {
        #[derive(Clone, Copy)]
        struct Tag;

        let storage = Storage::<Tag>::new();
        storage.emplace(2, Tag);
        assert!(storage.contains(2));
        assert_eq!(&*storage.entities(), &[2]);
        storage.erase(2);
        assert!(storage.is_empty());
    }
}
