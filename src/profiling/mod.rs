//! Chrome Trace (flame-style) execution profiler.
//!
//! A **feature-gated, zero-overhead (when disabled)** profiling API for the
//! ECS runtime. When enabled, it records structured execution spans and
//! emits a **Chrome Trace Event JSON** file that can be inspected using:
//!
//! - `chrome://tracing`
//! - <https://ui.perfetto.dev>
//!
//! ## Feature flag
//!
//! The recording backend is only compiled when the `profiling` feature is
//! enabled:
//!
//! ```bash
//! cargo test --features profiling
//! ```
//!
//! When the feature is disabled, all profiling calls compile to no-ops and
//! impose no runtime overhead.
//!
//! ## Usage
//!
//! ```no_run
//! use observer_ecs::profiler;
//!
//! profiler::init("profile/trace.json");
//!
//! {
//!     let _g = profiler::span("Registry::exec");
//!     // run a simulation tick
//! }
//!
//! profiler::shutdown();
//! ```
//!
//! Every public operation of the core (tick driver, observer refresh,
//! flush, optimise, save/load) is wrapped in such a span.

pub mod profiler;
