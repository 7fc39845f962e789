use crate::sync::UnsafeCell;
use core::fmt;
use derive_more::{Deref, Display};
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;
use std::collections::HashMap as _HashMap;

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Sync`.
///
/// Used internally for slot storage and processor state. Correctness is
/// ensured by scheduling: a slot is written only while its publication state
/// is claimed by exactly one writer, and a processor runs only inside the
/// single dispatch its vertex gets per run.
#[derive(Deref)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

impl<T> fmt::Debug for SyncUnsafeCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncUnsafeCell { .. }")
    }
}

/// Stable index of a data slot inside a built graph.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("slot#{_0}")]
#[repr(transparent)]
pub struct SlotId(pub(crate) u32);

/// Stable index of a vertex inside a built graph.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("vertex#{_0}")]
#[repr(transparent)]
pub struct VertexId(pub(crate) u32);

/// Stable index of a dependency edge inside a built graph.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("edge#{_0}")]
#[repr(transparent)]
pub struct EdgeId(pub(crate) u32);

macro_rules! impl_index {
    ($($id:ident),*) => {$(
        impl $id {
            #[inline]
            pub(crate) fn new(idx: usize) -> Self {
                Self(u32::try_from(idx).expect(concat!(stringify!($id), "::new")))
            }

            /// Position of the item in its arena.
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

impl_index!(SlotId, VertexId, EdgeId);

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
