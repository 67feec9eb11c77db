//! Core identifiers and component markers.
//!
//! This module defines the fundamental types shared by every subsystem:
//! entity ids, stable component-type ids, function ids, and the component
//! marker traits the typed APIs are built on.
//!
//! ## Identity model
//!
//! - An [`Entity`] is a plain unsigned integer, dense in
//!   `[0, high-water-mark]`. Aliveness is a property of the world, not of
//!   the id itself; destroyed ids are recycled.
//! - A [`ComponentTypeId`] is the CRC-32 of the component's type name. It is
//!   stable across processes and builds for the same type path, which is
//!   what serialization and the debug name map rely on. Storage containers
//!   are *not* keyed by it; they use `core::any::TypeId` lookups resolved to
//!   slot indices.
//! - A [`FunctionId`] identifies a registered system function: the textual
//!   function name in debug builds, its CRC-32 in release builds.

use std::any::type_name;
use std::marker::PhantomData;

/// Unsigned integer identity of a live object in the world.
pub type Entity = u32;

/// Stable identity of a component type (CRC-32 of the type name).
pub type ComponentTypeId = u32;

/// Identity of a registered system function.
///
/// Debug builds keep the textual name so logs and
/// `Registry::registered_functions_info` stay readable; release builds
/// collapse it to the CRC-32 of that name.
#[cfg(debug_assertions)]
pub type FunctionId = &'static str;

/// Identity of a registered system function (CRC-32 in release builds).
#[cfg(not(debug_assertions))]
pub type FunctionId = u32;

/// Record id that precedes each entity's components in a serialized stream.
pub const ENTITY_SENTINEL: ComponentTypeId = crc32(b"Entity");

/// CRC-32 (IEEE) over a byte string, usable in const contexts.
pub const fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    let mut i = 0;
    while i < bytes.len() {
        crc ^= bytes[i] as u32;
        let mut bit = 0;
        while bit < 8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            bit += 1;
        }
        i += 1;
    }
    !crc
}

/// Returns the stable [`ComponentTypeId`] of `T`.
#[inline]
pub fn component_id_of<T: 'static>() -> ComponentTypeId {
    crc32(type_name::<T>().as_bytes())
}

/// Converts a function name into its [`FunctionId`] for the current build.
#[inline]
#[must_use]
pub fn function_id(name: &'static str) -> FunctionId {
    #[cfg(debug_assertions)]
    {
        name
    }
    #[cfg(not(debug_assertions))]
    {
        crc32(name.as_bytes())
    }
}

/// Type name of `T` with module paths stripped, including inside generics
/// (`engine::types::Updated<game::Hp>` becomes `Updated<Hp>`).
///
/// Display-only; identity always uses the full path.
pub fn pretty_type_name<T: ?Sized>() -> String {
    pretty_name(type_name::<T>())
}

/// Strips module paths from a type-name string, including inside generics.
pub fn pretty_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;

    for (i, ch) in full.char_indices() {
        if matches!(ch, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&') {
            let segment = &full[segment_start..i];
            out.push_str(segment.rsplit("::").next().unwrap_or(segment));
            out.push(ch);
            segment_start = i + ch.len_utf8();
        }
    }
    let tail = &full[segment_start..];
    out.push_str(tail.rsplit("::").next().unwrap_or(tail));
    out
}

/// Marker trait for component types.
///
/// A component is a plain data record attached to an entity. Zero-sized
/// components act as *tags*: membership is tracked but no data is stored
/// (a `Vec` of a zero-sized type never allocates).
///
/// Implement it with the [`components!`](crate::components) macro, which
/// also wires the type into the filter machinery:
///
/// ```ignore
/// struct Hp { hp: i32 }
/// struct Dead;
/// observer_ecs::components!(Hp, Dead);
/// ```
pub trait Component: Send + Sync + 'static {}

/// Tag component marking that `C` was modified this frame.
///
/// Every storage created for `C` gets a parallel `Updated<C>` storage.
/// `World::emplace_tagged` and `World::mark_updated` insert into it;
/// `World::clear_update_tag` removes from it. Filters may require or
/// exclude `Updated<C>` like any other component; access-rule checks see
/// through the wrapper to `C`.
pub struct Updated<C>(PhantomData<fn() -> C>);

impl<C> Default for Updated<C> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<C> Clone for Updated<C> {
    fn clone(&self) -> Self {
        Self(PhantomData)
    }
}

impl<C> Copy for Updated<C> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_reference_vectors() {
        // Standard IEEE CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn sentinel_is_stable() {
        assert_eq!(ENTITY_SENTINEL, crc32(b"Entity"));
        assert_ne!(ENTITY_SENTINEL, 0);
    }

    #[test]
    fn pretty_names_strip_paths() {
        struct Local;
        let name = pretty_type_name::<Updated<Local>>();
        assert_eq!(name, "Updated<Local>");
    }
}
