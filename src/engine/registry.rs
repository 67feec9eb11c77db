//! The frame scheduler: system registry, function registry, tick driver,
//! and periodic background jobs.
//!
//! ## Tick protocol
//!
//! ```ignore
//! registry.prepare();           // refresh workers start re-evaluating filters
//! host_work();                  // e.g. render, in parallel with the refresh
//! registry.exec();              // barrier, run functions, flush, optimise
//! ```
//!
//! `exec` blocks until every observer refresh has completed, then invokes
//! the registered functions **in registration order**, drains the cleanup
//! queue (deferred system removals and function unregistrations), flushes
//! deferred entity destruction, runs one storage-optimise step, and raises
//! the frame-ready flag.
//!
//! ## Function identity
//!
//! Functions are identified by their textual name in debug builds and by
//! the name's CRC-32 in release builds (see
//! [`FunctionId`](crate::engine::types::FunctionId)). Duplicate
//! registration and unknown unregistration are logged and debug-asserted.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::engine::debug::DebugSystem;
use crate::engine::error::{EcsResult, JobError, RegistryError};
use crate::engine::filter::FilterSpec;
use crate::engine::observer::Observer;
use crate::engine::observer_manager::ObserverManager;
use crate::engine::serializer::Serializer;
use crate::engine::system::{JobControl, System};
use crate::engine::types::{function_id, pretty_type_name, FunctionId};
use crate::engine::world::World;
use crate::profiling::profiler;

/// Minimum period accepted by [`Registry::run_parallel_job`].
pub const MIN_JOB_PERIOD: Duration = Duration::from_millis(100);

struct RegisteredFunction {
    id: FunctionId,
    call: Box<dyn Fn()>,
    observer_slots: Vec<usize>,
    #[cfg(debug_assertions)]
    last_exec_seconds: std::cell::Cell<f64>,
}

impl RegisteredFunction {
    fn invoke(&self) {
        #[cfg(debug_assertions)]
        {
            let started = Instant::now();
            (self.call)();
            self.last_exec_seconds.set(started.elapsed().as_secs_f64());
        }
        #[cfg(not(debug_assertions))]
        {
            (self.call)();
        }
    }
}

struct SystemEntry {
    system: Arc<dyn System>,
    as_any: Arc<dyn Any + Send + Sync>,
    name: String,
    /// Set when the deferred `setup` has run; `stop` only fires for
    /// initialised systems.
    initialised: bool,
}

struct JobHandle {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl JobHandle {
    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// A closure registrable as a system function over one or more observers.
///
/// Implemented for `Fn(&Observer<F1>)` through `Fn(&Observer<F1>, …,
/// &Observer<F4>)`; the filter tuple is inferred from the closure's
/// parameters at the `register_function` call site.
pub trait ObserverFunction<Filters> {
    /// Resolves the filters to observers and packages the call.
    fn bind(self, registry: &mut Registry) -> BoundFunction;
}

/// A function closure bound to its observers.
pub struct BoundFunction {
    call: Box<dyn Fn()>,
    observer_slots: Vec<usize>,
}

macro_rules! impl_observer_function {
    ($($filter:ident : $observer:ident),+) => {
        impl<Func, $($filter),+> ObserverFunction<($($filter,)+)> for Func
        where
            Func: Fn($(&Observer<$filter>),+) + 'static,
            $($filter: FilterSpec),+
        {
            fn bind(self, registry: &mut Registry) -> BoundFunction {
                let mut observer_slots = Vec::new();
                $(
                    let ($observer, slot) =
                        registry.observers.get_or_create::<$filter>(&registry.world);
                    observer_slots.push(slot);
                )+
                BoundFunction {
                    call: Box::new(move || self($(&$observer),+)),
                    observer_slots,
                }
            }
        }
    };
}

impl_observer_function!(F1: o1);
impl_observer_function!(F1: o1, F2: o2);
impl_observer_function!(F1: o1, F2: o2, F3: o3);
impl_observer_function!(F1: o1, F2: o2, F3: o3, F4: o4);

type DeferredCallback = Box<dyn FnOnce(&mut Registry)>;

/// Registers systems and their functions, owns the observer manager and
/// background jobs, and drives the per-tick schedule.
pub struct Registry {
    world: Arc<World>,
    functions: Vec<RegisteredFunction>,
    init_callbacks: VecDeque<DeferredCallback>,
    cleanup_callbacks: VecDeque<DeferredCallback>,
    systems: HashMap<TypeId, SystemEntry>,
    jobs: HashMap<TypeId, Vec<JobHandle>>,
    observers: ObserverManager,
    serializer: Serializer,
    frame_ready: AtomicBool,
}

impl Registry {
    /// Creates the registry for `world` and installs the debug system.
    pub fn new(world: Arc<World>) -> Self {
        let mut registry = Self {
            world: world.clone(),
            functions: Vec::new(),
            init_callbacks: VecDeque::new(),
            cleanup_callbacks: VecDeque::new(),
            systems: HashMap::new(),
            jobs: HashMap::new(),
            observers: ObserverManager::new(),
            serializer: Serializer::new(world.clone()),
            frame_ready: AtomicBool::new(false),
        };
        registry.add_system(DebugSystem::new(world));
        registry
    }

    /// The world this registry schedules.
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// The serializer attached to this registry.
    pub fn serializer(&mut self) -> &mut Serializer {
        &mut self.serializer
    }

    // ── function registry ─────────────────────────────────────────────

    /// Registers `function` under `name`; its filters are inferred from
    /// the observer parameters.
    ///
    /// Functions run in registration order each tick. Registering the same
    /// name twice is a contract violation: logged, debug-asserted, and
    /// surfaced as [`RegistryError::DuplicateFunction`].
    pub fn register_function<Filters, Func>(
        &mut self,
        name: &'static str,
        function: Func,
    ) -> EcsResult<()>
    where
        Func: ObserverFunction<Filters>,
    {
        let _span = profiler::span("Registry::register_function");

        let id = function_id(name);
        if self.functions.iter().any(|f| f.id == id) {
            log::error!("{name} function is already registered");
            debug_assert!(false, "{name} function is already registered");
            return Err(RegistryError::DuplicateFunction { name }.into());
        }
        log::debug!("{name} function was registered");

        let bound = function.bind(self);
        for &slot in &bound.observer_slots {
            self.observers.retain(slot);
        }
        self.functions.push(RegisteredFunction {
            id,
            call: bound.call,
            observer_slots: bound.observer_slots,
            #[cfg(debug_assertions)]
            last_exec_seconds: std::cell::Cell::new(0.0),
        });
        Ok(())
    }

    /// Queues the function registered under `name` for removal at the next
    /// cleanup drain, releasing its observer refcounts.
    ///
    /// Naming an unknown function is a contract violation: logged,
    /// debug-asserted, and surfaced as [`RegistryError::UnknownFunction`].
    pub fn unregister_function(&mut self, name: &'static str) -> EcsResult<()> {
        let _span = profiler::span("Registry::unregister_function");

        let id = function_id(name);
        if !self.functions.iter().any(|f| f.id == id) {
            log::error!("{name} function is already unregistered");
            debug_assert!(false, "{name} function is already unregistered");
            return Err(RegistryError::UnknownFunction { name }.into());
        }
        log::debug!("{name} function was unregistered");

        self.cleanup_callbacks.push_back(Box::new(move |registry| {
            if let Some(position) = registry.functions.iter().position(|f| f.id == id) {
                let function = registry.functions.remove(position);
                for slot in function.observer_slots {
                    registry.observers.release(slot);
                }
            }
        }));
        Ok(())
    }

    /// Last execution time and name of every registered function, in
    /// registration order. Empty in release builds, which keep only the
    /// CRC ids.
    pub fn registered_functions_info(&self) -> Vec<(f64, &'static str)> {
        #[cfg(debug_assertions)]
        {
            self.functions
                .iter()
                .map(|f| (f.last_exec_seconds.get(), f.id))
                .collect()
        }
        #[cfg(not(debug_assertions))]
        {
            Vec::new()
        }
    }

    // ── system registry ───────────────────────────────────────────────

    /// Stores `system` and queues its `setup` for the next
    /// [`init_new_systems`](Self::init_new_systems) boundary.
    ///
    /// Adding a system type twice is a contract violation.
    pub fn add_system<S: System>(&mut self, system: S) -> Arc<S> {
        let _span = profiler::span("Registry::add_system");

        let ty = TypeId::of::<S>();
        let name = pretty_type_name::<S>();
        debug_assert!(
            !self.systems.contains_key(&ty),
            "system `{name}` is already registered"
        );
        log::debug!("register: {name}");

        let system = Arc::new(system);
        self.systems.insert(
            ty,
            SystemEntry {
                system: system.clone(),
                as_any: system.clone(),
                name,
                initialised: false,
            },
        );

        let for_init = system.clone();
        self.init_callbacks.push_back(Box::new(move |registry| {
            // The system may have been removed again before the init drain.
            let Some(entry) = registry.systems.get_mut(&ty) else {
                return;
            };
            entry.initialised = true;
            log::debug!("init: {}", pretty_type_name::<S>());
            for_init.setup(registry);
        }));
        system
    }

    /// Queues the removal of system `S`: at the next cleanup drain its
    /// `stop` runs, its background jobs are joined, and it is erased.
    pub fn remove_system<S: System>(&mut self) {
        let _span = profiler::span("Registry::remove_system");

        let ty = TypeId::of::<S>();
        debug_assert!(
            self.systems.contains_key(&ty),
            "system `{}` is already unregistered",
            pretty_type_name::<S>()
        );

        self.cleanup_callbacks.push_back(Box::new(move |registry| {
            if let Some(entry) = registry.systems.remove(&ty) {
                log::debug!("remove: {}", entry.name);
                if entry.initialised {
                    entry.system.stop(registry);
                }
                if let Some(mut jobs) = registry.jobs.remove(&ty) {
                    for job in &mut jobs {
                        job.stop_and_join();
                    }
                }
            }
        }));
    }

    /// Returns the registered system of type `S`, if any.
    pub fn get_system<S: System>(&self) -> Option<Arc<S>> {
        let entry = self.systems.get(&TypeId::of::<S>())?;
        entry.as_any.clone().downcast::<S>().ok()
    }

    /// Drains queued `setup` callbacks in FIFO order.
    ///
    /// `setup` may itself add systems; the loop re-reads the queue until
    /// it is empty.
    pub fn init_new_systems(&mut self) {
        let _span = profiler::span("Registry::init_new_systems");

        while let Some(init) = self.init_callbacks.pop_front() {
            init(self);
        }
    }

    // ── background jobs ───────────────────────────────────────────────

    /// Spawns a worker invoking `job` every `period` until it returns
    /// [`JobControl::Stop`], the owning system `S` is removed, or the
    /// registry is torn down.
    ///
    /// Periods below 100 ms are rejected (debug-checked precondition).
    /// A worker the OS refuses to spawn surfaces as [`JobError::Spawn`].
    pub fn run_parallel_job<S: System>(
        &mut self,
        mut job: impl FnMut() -> JobControl + Send + 'static,
        period: Duration,
    ) -> Result<(), JobError> {
        let _span = profiler::span("Registry::run_parallel_job");

        debug_assert!(
            period >= MIN_JOB_PERIOD,
            "job periods below {MIN_JOB_PERIOD:?} are not supported"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let worker = std::thread::Builder::new()
            .name(format!("job-{}", pretty_type_name::<S>()))
            .spawn(move || {
                let mut since_run = Instant::now();
                while !stop_flag.load(Ordering::Acquire) {
                    if since_run.elapsed() >= period {
                        since_run = Instant::now();
                        if job() == JobControl::Stop {
                            return;
                        }
                    }
                    // Sleep out the remainder; the stop token is checked
                    // between sleeps, so removal takes effect within one
                    // period.
                    let elapsed = since_run.elapsed();
                    if elapsed < period {
                        std::thread::sleep(period - elapsed);
                    }
                }
            })
            .map_err(|source| JobError::Spawn {
                system: pretty_type_name::<S>(),
                source,
            })?;

        self.jobs.entry(TypeId::of::<S>()).or_default().push(JobHandle {
            stop,
            worker: Some(worker),
        });
        log::debug!("job for {} was started", pretty_type_name::<S>());
        Ok(())
    }

    // ── tick driver ───────────────────────────────────────────────────

    /// Starts the background refresh of every observer.
    pub fn prepare(&self) {
        let _span = profiler::span("Registry::prepare");
        self.observers.prepare();
    }

    /// Runs one tick: waits for the refresh barrier, invokes every
    /// registered function in registration order, drains the cleanup
    /// queue, flushes deferred destroys, runs one optimise step, and
    /// raises the frame-ready flag.
    pub fn exec(&mut self) {
        let _span = profiler::span("Registry::exec");

        debug_assert!(
            self.init_callbacks.is_empty(),
            "all systems must be initialized before exec (call init_new_systems)"
        );

        self.observers.sync();

        for function in &self.functions {
            function.invoke();
        }

        while let Some(cleanup) = self.cleanup_callbacks.pop_front() {
            cleanup(self);
        }

        self.world.flush();
        self.world.optimise();

        self.frame_ready.store(true, Ordering::Relaxed);
    }

    /// Spins until the frame-ready flag is raised by [`exec`](Self::exec).
    pub fn wait_frame(&self) {
        let _span = profiler::span("Registry::wait_frame");
        while !self.frame_ready.load(Ordering::Relaxed) {
            std::hint::spin_loop();
        }
    }

    /// Spins until the host has consumed the frame (flag lowered).
    pub fn sync_with_render(&self) {
        let _span = profiler::span("Registry::sync_with_render");
        while self.frame_ready.load(Ordering::Relaxed) {
            std::hint::spin_loop();
        }
    }

    /// Lowers the frame-ready flag after the host consumed the frame.
    pub fn frame_synchronized(&self) {
        self.frame_ready.store(false, Ordering::Relaxed);
    }

    /// Number of live observers (one per distinct filter ever referenced).
    pub fn observer_count(&self) -> usize {
        self.observers.observer_count()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let _span = profiler::span("Registry::drop");

        // Teardown order: jobs, then system stop hooks, then the deferred
        // cleanups they queued. The observer pool joins when the manager
        // field drops.
        for (_, mut jobs) in self.jobs.drain() {
            for job in &mut jobs {
                job.stop_and_join();
            }
        }

        let entries: Vec<SystemEntry> = self.systems.drain().map(|(_, entry)| entry).collect();
        for entry in entries.iter().filter(|entry| entry.initialised) {
            entry.system.stop(self);
        }

        while let Some(cleanup) = self.cleanup_callbacks.pop_front() {
            cleanup(self);
        }
    }
}
