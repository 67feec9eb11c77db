//! Compile-time filters and the set algebra that evaluates them.
//!
//! A filter is a pair of component lists: `Require` (all must be present)
//! and `Exclude` (none may be present). Evaluation produces
//! `(R₀ ∩ R₁ ∩ …) ∖ (E₀ ∪ E₁ ∪ …)` over the storages' sorted entity
//! lists, using two-pointer merges and pooled scratch buffers only.
//!
//! Filters are ordinary types, so observers can be de-duplicated by the
//! filter's `TypeId`:
//!
//! ```ignore
//! type ApplyDamage = Filter<(Hp, Damage), (Dead,)>;
//! type FreshHp     = Filter<(Updated<Hp>,)>;
//! ```
//!
//! `Updated<C>` is a distinct component type for matching purposes (it has
//! its own storage) but unwraps to `C` when access rules compare a
//! requested component against the filter's lists.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::scratch::{self, ScratchBuf};
use crate::engine::storage::ErasedStorage;
use crate::engine::types::{Component, Entity, Updated};
use crate::engine::world::World;

/// One term of a filter list: a component type, or `Updated<C>`.
///
/// Implementations are generated by the [`components!`](crate::components)
/// macro; `Updated<C>` is covered by a generic impl.
pub trait FilterTerm: Send + Sync + 'static {
    /// Component the term resolves to for access-rule checks.
    type Raw: Component;

    /// `TypeId` keying the term's storage.
    fn storage_type() -> TypeId;

    /// `TypeId` of the tag-stripped component.
    fn raw_type() -> TypeId {
        TypeId::of::<Self::Raw>()
    }

    /// Full type name of the term, for diagnostics.
    fn term_name() -> &'static str;
}

impl<C: Component> FilterTerm for Updated<C> {
    type Raw = C;

    fn storage_type() -> TypeId {
        TypeId::of::<Updated<C>>()
    }

    fn term_name() -> &'static str {
        std::any::type_name::<Updated<C>>()
    }
}

/// Marks component types and wires them into the filter machinery.
///
/// ```ignore
/// struct Hp { hp: i32 }
/// struct Dead;
/// observer_ecs::components!(Hp, Dead);
/// ```
#[macro_export]
macro_rules! components {
    ($($component:ty),+ $(,)?) => {
        $(
            impl $crate::Component for $component {}

            impl $crate::FilterTerm for $component {
                type Raw = $component;

                fn storage_type() -> ::std::any::TypeId {
                    ::std::any::TypeId::of::<$component>()
                }

                fn term_name() -> &'static str {
                    ::std::any::type_name::<$component>()
                }
            }
        )+
    };
}

/// A tuple of [`FilterTerm`]s forming one side of a filter.
pub trait FilterTermList: Send + Sync + 'static {
    /// Number of terms.
    const LEN: usize;

    /// Storages of every term, in declaration order.
    fn storages(world: &World) -> Vec<Arc<dyn ErasedStorage>>;

    /// Returns `true` if the tag-stripped `ty` appears in the list.
    fn contains_raw(ty: TypeId) -> bool;

    /// Term names, for diagnostics.
    fn term_names() -> Vec<&'static str>;
}

macro_rules! impl_term_list {
    ($($term:ident),*) => {
        impl<$($term: FilterTerm),*> FilterTermList for ($($term,)*) {
            const LEN: usize = 0 $(+ {
                let _ = stringify!($term);
                1
            })*;

            fn storages(world: &World) -> Vec<Arc<dyn ErasedStorage>> {
                vec![$(world.erased_storage($term::storage_type(), $term::term_name())),*]
            }

            fn contains_raw(ty: TypeId) -> bool {
                false $(|| $term::raw_type() == ty)*
            }

            fn term_names() -> Vec<&'static str> {
                vec![$($term::term_name()),*]
            }
        }
    };
}

impl_term_list!();
impl_term_list!(A);
impl_term_list!(A, B);
impl_term_list!(A, B, C);
impl_term_list!(A, B, C, D);
impl_term_list!(A, B, C, D, E);
impl_term_list!(A, B, C, D, E, F);
impl_term_list!(A, B, C, D, E, F, G);
impl_term_list!(A, B, C, D, E, F, G, H);

/// A (Require, Exclude) pair identifying which entities an observer
/// matches.
pub trait FilterSpec: Send + Sync + 'static {
    /// Components an entity must bear.
    type Require: FilterTermList;

    /// Components an entity must not bear.
    type Exclude: FilterTermList;
}

/// The standard filter type: `Filter<(Required…), (Excluded…)>`.
pub struct Filter<R = (), E = ()>(PhantomData<fn() -> (R, E)>);

impl<R: FilterTermList, E: FilterTermList> FilterSpec for Filter<R, E> {
    type Require = R;
    type Exclude = E;
}

/// The empty filter: matches no entities, but a function registered on it
/// still runs every frame.
pub type RunEveryFrame = Filter<(), ()>;

// ── sorted-vector set operations ──────────────────────────────────────

/// `a ∩ b` into `out`; inputs sorted ascending, output sorted.
pub(crate) fn intersect_into(a: &[Entity], b: &[Entity], out: &mut Vec<Entity>) {
    out.clear();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
}

/// `a ∪ b` into `out`; inputs sorted ascending, output sorted unique.
pub(crate) fn union_into(a: &[Entity], b: &[Entity], out: &mut Vec<Entity>) {
    out.clear();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
}

/// `a ∖ b` into `out`; inputs sorted ascending, output sorted.
pub(crate) fn difference_into(a: &[Entity], b: &[Entity], out: &mut Vec<Entity>) {
    out.clear();
    let mut j = 0;
    for &x in a {
        while j < b.len() && b[j] < x {
            j += 1;
        }
        if j == b.len() || b[j] != x {
            out.push(x);
        }
    }
}

// ── evaluation ────────────────────────────────────────────────────────

/// Intersection of every storage's entity list, smallest list first.
///
/// Ordering by length bounds every intermediate result by the smallest
/// input; it does not change the set result.
fn intersect_all(mut storages: Vec<Arc<dyn ErasedStorage>>) -> ScratchBuf {
    let mut result = scratch::acquire();
    if storages.is_empty() {
        return result;
    }
    storages.sort_by_key(|s| s.entities_len());

    storages[0].with_entities(&mut |list| result.extend_from_slice(list));

    let mut swap = scratch::acquire();
    for storage in &storages[1..] {
        if result.is_empty() {
            break;
        }
        storage.with_entities(&mut |list| intersect_into(&result, list, &mut swap));
        std::mem::swap(&mut *result, &mut *swap);
    }
    result
}

/// Union of every storage's entity list, smallest list first.
fn union_all(mut storages: Vec<Arc<dyn ErasedStorage>>) -> ScratchBuf {
    let mut result = scratch::acquire();
    if storages.is_empty() {
        return result;
    }
    storages.sort_by_key(|s| s.entities_len());

    storages[0].with_entities(&mut |list| result.extend_from_slice(list));

    let mut swap = scratch::acquire();
    for storage in &storages[1..] {
        storage.with_entities(&mut |list| union_into(&result, list, &mut swap));
        std::mem::swap(&mut *result, &mut *swap);
    }
    result
}

/// Evaluates `F` against the world's canonical per-storage lists.
///
/// Returns a freshly owned, sorted, duplicate-free vector (taken from the
/// scratch pool; callers swap it into a snapshot and recycle the one it
/// displaces). An empty `Require` matches the empty set.
pub(crate) fn evaluate<F: FilterSpec>(world: &World) -> Vec<Entity> {
    if F::Require::LEN == 0 {
        return Vec::new();
    }

    let required = intersect_all(F::Require::storages(world));
    if F::Exclude::LEN == 0 || required.is_empty() {
        return required.into_vec();
    }

    let excluded = union_all(F::Exclude::storages(world));
    let mut result = scratch::acquire();
    difference_into(&required, &excluded, &mut result);
    result.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_is_two_pointer() {
        let mut out = Vec::new();
        intersect_into(&[1, 3, 5, 7], &[2, 3, 4, 7, 9], &mut out);
        assert_eq!(out, vec![3, 7]);

        intersect_into(&[], &[1], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn union_deduplicates() {
        let mut out = Vec::new();
        union_into(&[1, 4, 6], &[2, 4, 8], &mut out);
        assert_eq!(out, vec![1, 2, 4, 6, 8]);
    }

    #[test]
    fn difference_keeps_left_only() {
        let mut out = Vec::new();
        difference_into(&[1, 2, 3, 4], &[2, 4, 5], &mut out);
        assert_eq!(out, vec![1, 3]);

        difference_into(&[1, 2], &[], &mut out);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn operations_commute_with_input_order() {
        // The set result must not depend on which list is "left".
        let a = [1, 3, 5, 9];
        let b = [3, 4, 9];
        let (mut ab, mut ba) = (Vec::new(), Vec::new());

        intersect_into(&a, &b, &mut ab);
        intersect_into(&b, &a, &mut ba);
        assert_eq!(ab, ba);

        union_into(&a, &b, &mut ab);
        union_into(&b, &a, &mut ba);
        assert_eq!(ab, ba);
    }
}
