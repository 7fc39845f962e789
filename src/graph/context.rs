use crate::{
    error::SlotError,
    graph::{RunScope, SlotKey},
    slot::DataSlot,
    types::{SlotId, VertexId},
    value,
    vertex::Vertex,
};
use core::{
    any::Any,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr,
};

/// What a processor sees while it runs: its inputs, its outputs, and the
/// rest of the graph's slots.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    scope: RunScope<'a>,
    vertex: VertexId,
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(scope: RunScope<'a>, vertex: VertexId) -> Self {
        Self { scope, vertex }
    }

    fn this(&self) -> &'a Vertex {
        self.scope.graph.vertex(self.vertex)
    }

    /// Name of the running vertex.
    #[must_use]
    pub fn vertex_name(&self) -> &'a str {
        self.this().name()
    }

    /// Generation of the current run.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.scope.run.generation()
    }

    /// Resolves a slot name.
    ///
    /// # Errors
    /// [`SlotError::UnknownSlot`] if the graph has no such slot.
    pub fn slot(&self, name: &str) -> Result<SlotId, SlotError> {
        self.scope.graph.resolve(name)
    }

    /// Data slots of this vertex's optional inputs, in declaration order.
    pub fn optional_inputs(&self) -> impl Iterator<Item = SlotId> + 'a {
        let graph = self.scope.graph;
        self.this()
            .edges()
            .iter()
            .map(move |&edge| graph.edge(edge))
            .filter(|edge| edge.is_optional())
            .map(|edge| edge.data())
    }

    /// Whether a gate closed this vertex's input on `slot` in this run.
    fn input_closed(&self, slot: SlotId) -> bool {
        let graph = self.scope.graph;
        self.this()
            .edges()
            .iter()
            .map(|&edge| graph.edge(edge))
            .any(|edge| edge.data() == slot && edge.is_closed())
    }

    fn readable(&self, slot: SlotId) -> Result<&'a DataSlot, SlotError> {
        let data = self.scope.graph.slot(slot);
        if self.input_closed(slot) {
            return Err(SlotError::GatedOff {
                slot: data.name().to_owned(),
            });
        }
        Ok(data)
    }

    /// Reads a published slot.
    ///
    /// An input whose gate evaluated to false reads as
    /// [`SlotError::GatedOff`], even if another vertex pulled the value.
    ///
    /// # Errors
    /// If the slot is unknown, unpublished, absent, gated off, or holds
    /// another type.
    pub fn read<'k, T: Any>(&self, slot: impl Into<SlotKey<'k>>) -> Result<&'a T, SlotError> {
        let id = self.scope.graph.resolve(slot)?;
        self.readable(id)?.read()
    }

    /// Like [`ProcessContext::read`], but an unpublished, absent or gated
    /// off slot gives `None`.
    ///
    /// # Errors
    /// If the slot is unknown or holds another type.
    pub fn get<'k, T: Any>(
        &self,
        slot: impl Into<SlotKey<'k>>,
    ) -> Result<Option<&'a T>, SlotError> {
        optional(self.read(slot))
    }

    /// Reads an integer or boolean slot as `i64`.
    ///
    /// # Errors
    /// If the slot cannot be read or does not hold a number.
    pub fn read_number<'k>(&self, slot: impl Into<SlotKey<'k>>) -> Result<i64, SlotError> {
        let id = self.scope.graph.resolve(slot)?;
        let data = self.readable(id)?;
        let value = data.read_any()?;
        value.as_number().ok_or_else(|| SlotError::TypeMismatch {
            slot: data.name().to_owned(),
            expected: "integer or bool",
            found: value.type_name(),
        })
    }

    fn check_producer(&self, slot: SlotId) -> Result<(), SlotError> {
        if self.this().emits(slot) {
            Ok(())
        } else {
            Err(SlotError::NotProducer {
                slot: self.scope.graph.slot(slot).name().to_owned(),
                vertex: self.vertex_name().to_owned(),
            })
        }
    }

    /// Publishes `value` into one of this vertex's outputs.
    ///
    /// # Errors
    /// If the slot is unknown, not emitted by this vertex, or already
    /// published in this run.
    pub fn publish<'k, T: Any + Send + Sync>(
        &self,
        slot: impl Into<SlotKey<'k>>,
        value: T,
    ) -> Result<(), SlotError> {
        let id = self.scope.graph.resolve(slot)?;
        self.check_producer(id)?;
        publish(self.scope, id, value)
    }

    /// Claims one of this vertex's outputs for in-place writing.
    ///
    /// # Errors
    /// If the slot is unknown, not emitted by this vertex, or already
    /// published in this run.
    pub fn write<'k, T: Any + Default + Send + Sync>(
        &self,
        slot: impl Into<SlotKey<'k>>,
    ) -> Result<SlotWriter<'a, T>, SlotError> {
        let id = self.scope.graph.resolve(slot)?;
        self.check_producer(id)?;
        SlotWriter::claim(self.scope, id)
    }
}

/// Exclusive access to a slot's storage; publishes the slot on drop.
///
/// Storage left by an earlier run is reused when it holds a `T`, so it
/// usually needs clearing first. A writer dropped while its thread panics
/// leaves the slot unpublished.
#[derive(Debug)]
#[must_use = "the slot is published when the writer is dropped"]
pub struct SlotWriter<'a, T> {
    scope: RunScope<'a>,
    slot: &'a DataSlot,
    value: &'a mut T,
}

impl<'a, T: Any + Default + Send + Sync> SlotWriter<'a, T> {
    pub(crate) fn claim(scope: RunScope<'a>, id: SlotId) -> Result<Self, SlotError> {
        let slot = scope.graph.slot(id);
        slot.begin_write()?;
        // SAFETY: `begin_write` succeeded, the claim lasts until this writer
        // is dropped, and so does the borrow.
        let value = value::make_as(unsafe { slot.storage_mut() });
        Ok(Self { scope, slot, value })
    }
}

impl<'a, T> SlotWriter<'a, T> {
    /// Publishes the slot now. Same as dropping the writer.
    pub fn commit(self) {}

    /// Publishes the slot now and keeps shared access to the value.
    ///
    /// Downstream vertices may start reading as soon as this returns, so
    /// further changes need interior mutability, as with a
    /// [`Channel`](crate::channel::Channel) that is filled after publication.
    pub fn publish(self) -> &'a T {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the reference is moved out once.
        let value: &'a mut T = unsafe { ptr::read(&this.value) };
        let value: &'a T = value;
        this.slot.commit(this.scope);
        value
    }
}

impl<T> Deref for SlotWriter<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.value
    }
}

impl<T> DerefMut for SlotWriter<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.value
    }
}

impl<T> Drop for SlotWriter<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.slot.rollback();
        } else {
            self.slot.commit(self.scope);
        }
    }
}

pub(crate) fn publish<T: Any + Send + Sync>(
    scope: RunScope<'_>,
    id: SlotId,
    value: T,
) -> Result<(), SlotError> {
    let slot = scope.graph.slot(id);
    slot.begin_write()?;
    // SAFETY: the claim is held until `commit` below.
    value::write_as(unsafe { slot.storage_mut() }, value);
    slot.commit(scope);
    Ok(())
}

/// Turns "no value in this run" into `None`, keeping real errors.
pub(crate) fn optional<T>(result: Result<T, SlotError>) -> Result<Option<T>, SlotError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SlotError::NotReady { .. } | SlotError::Absent { .. } | SlotError::GatedOff { .. }) => {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
