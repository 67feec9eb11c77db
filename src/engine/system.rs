//! The system abstraction.
//!
//! A system is an object that owns one or more registered functions and,
//! optionally, background jobs. The registry constructs it eagerly but
//! defers `setup` to the next [`Registry::init_new_systems`] boundary, and
//! defers `stop` to the cleanup drain after `remove_system`.
//!
//! [`Registry::init_new_systems`]: crate::engine::registry::Registry::init_new_systems

use std::sync::Arc;

use crate::engine::registry::Registry;

/// A unit of gameplay/simulation logic registered with the [`Registry`].
///
/// Systems are shared (`Arc`) between the registry and the function
/// closures they register, so `setup` receives the `Arc` to clone from and
/// state mutated at runtime lives behind interior mutability (atomics in
/// practice).
pub trait System: Send + Sync + 'static {
    /// Registers the system's functions and jobs. Runs at the next
    /// `init_new_systems` boundary after `add_system`.
    fn setup(self: Arc<Self>, registry: &mut Registry);

    /// Unregisters whatever `setup` registered. Runs at the cleanup drain
    /// after `remove_system`, and at registry teardown.
    fn stop(&self, registry: &mut Registry) {
        let _ = registry;
    }
}

/// Return value of a background-job body: keep the job alive or end it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobControl {
    /// Run again after the next period.
    Continue,

    /// Terminate the job's worker thread.
    Stop,
}
