use crate::{
    error::SlotError,
    graph::RunScope,
    sync::{AtomicU8, Ordering},
    types::{EdgeId, SyncUnsafeCell, VertexId},
    value::AnyValue,
};
use core::any::{Any, type_name};
use tracing::{trace, warn};

const UNPUBLISHED: u8 = 0;
/// Claimed by exactly one writer; nobody else touches the storage.
const WRITING: u8 = 1;
const PUBLISHED: u8 = 2;
/// Published by a producer that finished without writing the slot.
const PUBLISHED_ABSENT: u8 = 3;

/// A named, type-erased value exchanged between vertices.
///
/// Written once per run (by its producer or the caller), read any number of
/// times after publication. The storage survives `reset`, so the next run can
/// refill it in place.
#[derive(Debug)]
pub(crate) struct DataSlot {
    name: String,
    state: AtomicU8,
    value: SyncUnsafeCell<Option<AnyValue>>,
    producer: Option<VertexId>,
    /// Edges that consume this slot as data.
    data_edges: Vec<EdgeId>,
    /// Edges gated on this slot's value.
    gate_edges: Vec<EdgeId>,
}

impl DataSlot {
    pub(crate) fn new(
        name: String,
        producer: Option<VertexId>,
        data_edges: Vec<EdgeId>,
        gate_edges: Vec<EdgeId>,
    ) -> Self {
        Self {
            name,
            state: AtomicU8::new(UNPUBLISHED),
            value: SyncUnsafeCell::new(None),
            producer,
            data_edges,
            gate_edges,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_published(&self) -> bool {
        self.state.load(Ordering::Acquire) >= PUBLISHED
    }

    /// Claims the slot for writing.
    ///
    /// # Errors
    /// [`SlotError::AlreadyPublished`] if the slot is published or claimed by
    /// another writer in this run.
    pub(crate) fn begin_write(&self) -> Result<(), SlotError> {
        self.state
            .compare_exchange(UNPUBLISHED, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .map(drop)
            .map_err(|_| SlotError::AlreadyPublished {
                slot: self.name.clone(),
            })
    }

    /// # Safety
    /// The caller must hold the write claim taken by [`DataSlot::begin_write`]
    /// and must not keep the reference past `commit` or `rollback`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn storage_mut(&self) -> &mut Option<AnyValue> {
        // SAFETY: the `WRITING` state excludes every other reader and writer.
        self.value.with_mut(|ptr| unsafe { &mut *ptr })
    }

    /// Publishes the value written under the current claim and notifies the
    /// downstream edges.
    pub(crate) fn commit(&self, scope: RunScope<'_>) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), WRITING, "DataSlot::commit");
        self.state.store(PUBLISHED, Ordering::Release);
        trace!(slot = %self.name, "slot published");
        self.notify(scope, false);
    }

    /// Gives up the write claim without publishing.
    pub(crate) fn rollback(&self) {
        self.state.store(UNPUBLISHED, Ordering::Release);
        trace!(slot = %self.name, "slot write rolled back");
    }

    /// Publishes the slot without a value, unless it is already published.
    pub(crate) fn publish_absent(&self, scope: RunScope<'_>) {
        if self
            .state
            .compare_exchange(
                UNPUBLISHED,
                PUBLISHED_ABSENT,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            trace!(slot = %self.name, "slot published as absent");
            self.notify(scope, true);
        }
    }

    fn notify(&self, scope: RunScope<'_>, absent: bool) {
        for &edge in &self.data_edges {
            scope.graph.edge(edge).data_arrived(scope);
        }
        if self.gate_edges.is_empty() {
            return;
        }
        let open = if absent {
            false
        } else {
            match self.value().and_then(AnyValue::as_number) {
                Some(v) => v != 0,
                None => {
                    warn!(slot = %self.name, "condition value is not a number, gate stays closed");
                    false
                }
            }
        };
        for &edge in &self.gate_edges {
            scope.graph.edge(edge).condition_arrived(scope, open);
        }
    }

    /// The published value, if any.
    fn value(&self) -> Option<&AnyValue> {
        if self.state.load(Ordering::Acquire) != PUBLISHED {
            return None;
        }
        // SAFETY: a published slot is never written until `reset`, which
        // requires exclusive access to the graph.
        self.value.with(|ptr| unsafe { (*ptr).as_ref() })
    }

    pub(crate) fn read_any(&self) -> Result<&AnyValue, SlotError> {
        match self.state.load(Ordering::Acquire) {
            PUBLISHED => Ok(self.value().expect("DataSlot::read_any")),
            PUBLISHED_ABSENT => Err(SlotError::Absent {
                slot: self.name.clone(),
            }),
            _ => Err(SlotError::NotReady {
                slot: self.name.clone(),
            }),
        }
    }

    pub(crate) fn read<T: Any>(&self) -> Result<&T, SlotError> {
        let value = self.read_any()?;
        value.read_as().ok_or_else(|| SlotError::TypeMismatch {
            slot: self.name.clone(),
            expected: type_name::<T>(),
            found: value.type_name(),
        })
    }

    /// Pulls the slot into the current run: activates its producer unless
    /// the value is already there.
    pub(crate) fn activate(&self, scope: RunScope<'_>, frontier: &mut Vec<VertexId>) {
        if self.is_published() {
            return;
        }
        match self.producer {
            Some(vertex) => scope.graph.vertex(vertex).activate(vertex, scope, frontier),
            None => trace!(slot = %self.name, "slot has no producer, waiting for the caller"),
        }
    }

    pub(crate) fn reset(&self) {
        self.state.store(UNPUBLISHED, Ordering::Release);
    }
}
