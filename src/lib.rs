//! # observer-ecs
//!
//! Sparse-set Entity–Component–System runtime with background-refreshed
//! filter observers.
//!
//! State lives in a [`World`]: entities are small integer ids, components
//! are plain data records attached to them at runtime. Logic is expressed
//! as functions over [`Observer`]s — cached entity lists matching a
//! compile-time [`Filter`] of required and excluded component types —
//! registered with a [`Registry`] that drives the per-tick schedule.
//!
//! ## Design Goals
//! - O(matched entities) iteration: filters are re-evaluated concurrently
//!   between frames by a worker pool, never during system execution
//! - Deterministic scheduling: functions run in registration order
//! - Deferred structural mutation: destroys flush at the tick boundary
//! - Safe, explicit data access scoped by each observer's filter
//!
//! ## A tick
//!
//! ```ignore
//! registry.prepare();   // observer refresh starts in the background
//! /* host work (render, input) overlaps the refresh */
//! registry.exec();      // barrier; run functions; flush; optimise
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;
pub mod profiling;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core ECS types

pub use engine::world::{ComponentBundle, World};

pub use engine::types::{
    component_id_of, crc32, function_id, pretty_type_name, Component, ComponentTypeId, Entity,
    FunctionId, Updated, ENTITY_SENTINEL,
};

pub use engine::filter::{Filter, FilterSpec, FilterTerm, FilterTermList, RunEveryFrame};

pub use engine::observer::{EntityWrapper, FetchRequire, Observer, ObserverIter};

pub use engine::storage::{ComponentMut, ComponentRef, EntitiesRef, ErasedStorage, Storage};

pub use engine::registry::{ObserverFunction, Registry, MIN_JOB_PERIOD};

pub use engine::registrant::ComponentRegistrant;

pub use engine::system::{JobControl, System};

pub use engine::serializer::{read_pod, write_pod, Serializer};

pub use engine::debug::DebugSystem;

pub use engine::error::{
    EcsError, EcsResult, JobError, RegistryError, SerializeError, SerializeResult,
    TruncatedStreamError, UnmatchedCodecsError,
};

pub use profiling::profiler;

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use observer_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Component, ComponentRegistrant, Entity, EntityWrapper, Filter, FilterSpec, JobControl,
        Observer, Registry, RunEveryFrame, System, Updated, World,
    };
}
