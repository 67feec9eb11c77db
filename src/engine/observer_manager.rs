//! Observer de-duplication and the background refresh pool.
//!
//! Every distinct filter type gets exactly one observer, held in an
//! append-only slot list so worker iteration order stays stable. Each
//! registered function holds refcounts on the observers it touches; a slot
//! whose refcount has returned to zero is skipped by the workers (the slot
//! itself is never removed).
//!
//! ## Worker pool
//!
//! `N = available_parallelism` threads park on a condition variable
//! guarding a monotonically increasing epoch. [`ObserverManager::prepare`]
//! resets the claim cursor and completion counter, bumps the epoch, and
//! wakes everyone; workers claim slots with an atomic fetch-increment over
//! `[0, n_slots)`, refresh them, and bump the completion counter.
//! [`ObserverManager::sync`] spin-yields until the counter reaches the
//! slot count. Refreshes within a frame are unordered with respect to each
//! other; everything completes before `sync` returns.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::engine::filter::FilterSpec;
use crate::engine::observer::{AnyObserver, Observer};
use crate::engine::world::World;
use crate::profiling::profiler;

struct RefreshSlot {
    observer: Arc<dyn AnyObserver>,
    refcount: usize,
}

/// State shared between the manager and its workers.
struct PoolShared {
    slots: RwLock<Vec<RefreshSlot>>,
    epoch: Mutex<u64>,
    wake: Condvar,
    cursor: AtomicUsize,
    finished: AtomicUsize,
    target: AtomicUsize,
    stop: AtomicBool,
}

/// Owns the live observers and the worker pool that refreshes them.
pub struct ObserverManager {
    shared: Arc<PoolShared>,
    by_filter: HashMap<TypeId, usize>,
    typed: HashMap<TypeId, Arc<dyn std::any::Any + Send + Sync>>,
    workers: Vec<JoinHandle<()>>,
}

impl ObserverManager {
    /// Spawns the refresh workers (one per available core, at least one).
    pub fn new() -> Self {
        let shared = Arc::new(PoolShared {
            slots: RwLock::new(Vec::new()),
            epoch: Mutex::new(0),
            wake: Condvar::new(),
            cursor: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            target: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        });

        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let workers = (0..worker_count)
            .map(|index| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("observer-refresh-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn an observer refresh worker")
            })
            .collect();

        Self {
            shared,
            by_filter: HashMap::new(),
            typed: HashMap::new(),
            workers,
        }
    }

    /// Returns the observer for `F`, creating it on first use, plus its
    /// slot index for refcounting.
    ///
    /// Observers are never destroyed; a slot with no registered functions
    /// is refreshed as a no-op.
    pub fn get_or_create<F: FilterSpec>(&mut self, world: &Arc<World>) -> (Arc<Observer<F>>, usize) {
        let filter = TypeId::of::<F>();
        if let Some(&slot) = self.by_filter.get(&filter) {
            let observer = self.typed[&filter]
                .clone()
                .downcast::<Observer<F>>()
                .expect("observer slot registered under a mismatched filter");
            return (observer, slot);
        }

        let observer = Arc::new(Observer::<F>::new(world.clone()));
        let mut slots = self.shared.slots.write();
        let slot = slots.len();
        slots.push(RefreshSlot {
            observer: observer.clone(),
            refcount: 0,
        });
        drop(slots);

        self.by_filter.insert(filter, slot);
        self.typed.insert(filter, observer.clone());
        (observer, slot)
    }

    /// Increments the refcount of a slot.
    pub fn retain(&self, slot: usize) {
        self.shared.slots.write()[slot].refcount += 1;
    }

    /// Decrements the refcount of a slot; releasing an already-idle slot
    /// is a no-op.
    pub fn release(&self, slot: usize) {
        let mut slots = self.shared.slots.write();
        let refcount = &mut slots[slot].refcount;
        *refcount = refcount.saturating_sub(1);
    }

    /// Wakes the workers to refresh every slot once.
    pub fn prepare(&self) {
        let _span = profiler::span("ObserverManager::prepare");

        let target = self.shared.slots.read().len();
        self.shared.cursor.store(0, Ordering::Relaxed);
        self.shared.finished.store(0, Ordering::Release);
        self.shared.target.store(target, Ordering::Release);
        {
            let mut epoch = self.shared.epoch.lock();
            *epoch += 1;
        }
        self.shared.wake.notify_all();
    }

    /// Blocks until the refresh round started by [`prepare`](Self::prepare)
    /// has completed.
    pub fn sync(&self) {
        let _span = profiler::span("ObserverManager::sync");

        let target = self.shared.target.load(Ordering::Acquire);
        while self.shared.finished.load(Ordering::Acquire) < target {
            std::thread::yield_now();
        }
    }

    /// Number of live observer slots.
    pub fn observer_count(&self) -> usize {
        self.shared.slots.read().len()
    }
}

impl Default for ObserverManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObserverManager {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let mut epoch = self.shared.epoch.lock();
            *epoch += 1;
        }
        self.shared.wake.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    let mut seen_epoch = 0u64;
    loop {
        {
            let mut epoch = shared.epoch.lock();
            while *epoch == seen_epoch && !shared.stop.load(Ordering::Acquire) {
                shared.wake.wait(&mut epoch);
            }
            seen_epoch = *epoch;
        }
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let target = shared.target.load(Ordering::Acquire);
        loop {
            let index = shared.cursor.fetch_add(1, Ordering::Relaxed);
            if index >= target {
                break;
            }
            {
                let slots = shared.slots.read();
                let slot = &slots[index];
                // Idle filters keep their slot but elide the work.
                if slot.refcount > 0 {
                    slot.observer.refresh();
                }
            }
            shared.finished.fetch_add(1, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::filter::Filter;
    use crate::engine::types::Component;

    struct Marker;
    impl Component for Marker {}
    impl crate::engine::filter::FilterTerm for Marker {
        type Raw = Marker;

        fn storage_type() -> TypeId {
            TypeId::of::<Marker>()
        }

        fn term_name() -> &'static str {
            "Marker"
        }
    }

    type MarkerFilter = Filter<(Marker,), ()>;

    #[test]
    fn observers_are_deduplicated_by_filter() {
        let world = World::new();
        world.create_storage::<Marker>();
        let mut manager = ObserverManager::new();

        let (first, slot_a) = manager.get_or_create::<MarkerFilter>(&world);
        let (second, slot_b) = manager.get_or_create::<MarkerFilter>(&world);
        assert_eq!(slot_a, slot_b);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.observer_count(), 1);
    }

    #[test]
    fn refresh_round_covers_every_slot() {
        let world = World::new();
        world.create_storage::<Marker>();
        let e = world.create();
        world.emplace(e, Marker);

        let mut manager = ObserverManager::new();
        let (observer, slot) = manager.get_or_create::<MarkerFilter>(&world);
        manager.retain(slot);

        // The constructor refresh ran before the component existed.
        manager.prepare();
        manager.sync();
        assert_eq!(observer.snapshot(), vec![e]);
    }

    #[test]
    fn idle_slots_are_skipped() {
        let world = World::new();
        world.create_storage::<Marker>();
        let mut manager = ObserverManager::new();
        let (observer, slot) = manager.get_or_create::<MarkerFilter>(&world);

        let e = world.create();
        world.emplace(e, Marker);

        // Refcount is zero: the round completes but the snapshot is stale.
        manager.prepare();
        manager.sync();
        assert!(observer.snapshot().is_empty());

        manager.retain(slot);
        manager.prepare();
        manager.sync();
        assert_eq!(observer.snapshot(), vec![e]);

        manager.release(slot);
        manager.release(slot); // extra release is a no-op
    }
}
