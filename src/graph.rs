/// Declaring vertices, slots, and edges, and validating them into a [`Graph`].
pub mod build;
/// What a processor sees while it runs.
pub mod context;

pub use crate::graph::{
    build::{EdgeHandle, GraphBuilder, SetupContext, VertexHandle},
    context::{ProcessContext, SlotWriter},
};
use crate::{
    completion::RunCompletion,
    edge::Edge,
    error::{GraphError, SlotError},
    executor::{Executor, VertexTask},
    slot::DataSlot,
    sync::{AtomicU64, Ordering},
    types::{EdgeId, HashMap, SlotId, VertexId},
    vertex::Vertex,
};
use core::any::Any;
use std::sync::Arc;
use tracing::{debug, trace};

/// Names a data slot either by name or by its resolved id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotKey<'a> {
    /// Slot name as declared in the builder.
    Name(&'a str),
    /// Id returned by the builder or [`Graph::slot`].
    Id(SlotId),
}

impl<'a> From<&'a str> for SlotKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for SlotKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl From<SlotId> for SlotKey<'_> {
    fn from(id: SlotId) -> Self {
        Self::Id(id)
    }
}

/// Built graph state shared with in-flight vertex tasks.
#[derive(derive_more::Debug)]
pub(crate) struct GraphInner {
    slots: Vec<DataSlot>,
    slot_index: HashMap<String, SlotId>,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    #[debug(skip)]
    executor: Arc<dyn Executor>,
    generation: AtomicU64,
}

impl GraphInner {
    pub(crate) fn new(
        slots: Vec<DataSlot>,
        vertices: Vec<Vertex>,
        edges: Vec<Edge>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let slot_index = slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (slot.name().to_owned(), SlotId::new(idx)))
            .collect();
        Self {
            slots,
            slot_index,
            vertices,
            edges,
            executor,
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn slot(&self, id: SlotId) -> &DataSlot {
        &self.slots[id.index()]
    }

    pub(crate) fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    pub(crate) fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn resolve<'k>(&self, key: impl Into<SlotKey<'k>>) -> Result<SlotId, SlotError> {
        match key.into() {
            SlotKey::Name(name) => {
                self.slot_index
                    .get(name)
                    .copied()
                    .ok_or_else(|| SlotError::UnknownSlot {
                        name: name.to_owned(),
                    })
            }
            SlotKey::Id(id) if id.index() < self.slots.len() => Ok(id),
            SlotKey::Id(id) => Err(SlotError::UnknownSlot {
                name: id.to_string(),
            }),
        }
    }
}

/// The graph and run a protocol transition belongs to.
#[derive(Debug, Copy, Clone)]
pub(crate) struct RunScope<'a> {
    pub(crate) graph: &'a Arc<GraphInner>,
    pub(crate) run: &'a Arc<RunCompletion>,
}

impl RunScope<'_> {
    /// Resolves one edge of `vertex`, dispatching it if that was the last.
    pub(crate) fn fire(self, vertex: VertexId) {
        if self.graph.vertex(vertex).decrement_waiting() {
            self.dispatch(vertex);
        }
    }

    fn dispatch(self, vertex: VertexId) {
        trace!(vertex = %self.graph.vertex(vertex).name(), "vertex ready");
        let task = VertexTask::new(self.graph.clone(), vertex, self.run.clone());
        self.graph.executor.dispatch(task);
    }

    /// Pulls `slot` into the run and dispatches every newly activated vertex
    /// that is already ready. Returns the number of activated vertices.
    pub(crate) fn activate_and_dispatch(self, slot: SlotId) -> usize {
        let mut frontier = Vec::new();
        self.graph.slot(slot).activate(self, &mut frontier);
        if frontier.is_empty() {
            return 0;
        }
        // Registered before any activated vertex can be dispatched.
        self.run.add_wait(frontier.len());
        for &vertex in &frontier {
            if self.graph.vertex(vertex).decrement_waiting() {
                self.dispatch(vertex);
            }
        }
        frontier.len()
    }
}

/// A built, reusable dataflow graph.
///
/// Each [`Graph::run`] computes one target slot by activating exactly the
/// vertices upstream of it. Between runs the graph must be [`Graph::reset`],
/// which clears every publication but keeps slot storage and processor state.
///
/// Inputs without a producer are published by the caller with
/// [`Graph::publish`] or [`Graph::writer`], before or during the run they
/// belong to.
#[derive(Debug)]
pub struct Graph {
    inner: Arc<GraphInner>,
    /// Completion of the current run, or of the next one if not started.
    run: Arc<RunCompletion>,
    started: bool,
}

impl Graph {
    pub(crate) fn new(inner: GraphInner) -> Self {
        let run = Arc::new(inner.executor.create_completion(inner.generation()));
        Self {
            inner: Arc::new(inner),
            run,
            started: false,
        }
    }

    fn scope(&self) -> RunScope<'_> {
        RunScope {
            graph: &self.inner,
            run: &self.run,
        }
    }

    /// Resolves a slot name.
    ///
    /// # Errors
    /// [`SlotError::UnknownSlot`] if the graph has no such slot.
    pub fn slot(&self, name: &str) -> Result<SlotId, SlotError> {
        self.inner.resolve(name)
    }

    /// Names of all slots, in declaration order.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.inner.slots.iter().map(DataSlot::name)
    }

    /// Number of vertices, including the ones evaluating gate conditions.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.inner.vertices.len()
    }

    /// Publishes `value` into a slot for the current run.
    ///
    /// # Errors
    /// If the slot is unknown or already published in this run.
    pub fn publish<'k, T: Any + Send + Sync>(
        &self,
        slot: impl Into<SlotKey<'k>>,
        value: T,
    ) -> Result<(), SlotError> {
        let id = self.inner.resolve(slot)?;
        context::publish(self.scope(), id, value)
    }

    /// Claims a slot for in-place writing; the value is published when the
    /// writer is dropped.
    ///
    /// The slot's storage from earlier runs is reused if it holds a `T`.
    ///
    /// # Errors
    /// If the slot is unknown or already published in this run.
    pub fn writer<'k, T: Any + Default + Send + Sync>(
        &self,
        slot: impl Into<SlotKey<'k>>,
    ) -> Result<SlotWriter<'_, T>, SlotError> {
        let id = self.inner.resolve(slot)?;
        SlotWriter::claim(self.scope(), id)
    }

    /// Reads a published slot.
    ///
    /// # Errors
    /// If the slot is unknown, unpublished, absent, or holds another type.
    pub fn read<'k, T: Any>(&self, slot: impl Into<SlotKey<'k>>) -> Result<&T, SlotError> {
        let id = self.inner.resolve(slot)?;
        self.inner.slot(id).read()
    }

    /// Like [`Graph::read`], but an unpublished or absent slot gives `None`.
    ///
    /// # Errors
    /// If the slot is unknown or holds another type.
    pub fn get<'k, T: Any>(&self, slot: impl Into<SlotKey<'k>>) -> Result<Option<&T>, SlotError> {
        context::optional(self.read(slot))
    }

    /// Starts a run computing `target` and returns its completion.
    ///
    /// Vertices that are ready are dispatched before this returns; with an
    /// inline executor the whole run happens inside this call.
    ///
    /// # Errors
    /// If `target` is unknown, or the graph already ran since the last
    /// [`Graph::reset`].
    pub fn run<'k>(
        &mut self,
        target: impl Into<SlotKey<'k>>,
    ) -> Result<Arc<RunCompletion>, GraphError> {
        if self.started {
            return Err(GraphError::NotReset);
        }
        let target = self.inner.resolve(target)?;
        self.started = true;
        debug!(
            generation = self.run.generation(),
            target = %self.inner.slot(target).name(),
            "run started"
        );
        if self.scope().activate_and_dispatch(target) == 0 {
            // The target is published already or has no producer.
            self.run.finish_empty();
        }
        Ok(self.run.clone())
    }

    /// Prepares the graph for the next run.
    ///
    /// Blocks until every task of the current run has returned, including
    /// tasks that were still running when the run failed. Must not be called
    /// from inside a processor.
    pub fn reset(&mut self) {
        self.run.drain();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for vertex in &self.inner.vertices {
            vertex.reset();
        }
        for edge in &self.inner.edges {
            edge.reset();
        }
        for slot in &self.inner.slots {
            slot.reset();
        }
        self.run = Arc::new(self.inner.executor.create_completion(generation));
        self.started = false;
        debug!(generation, "graph reset");
    }

    /// Generation of the current (or next) run; bumped by every reset.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.run.generation()
    }
}
