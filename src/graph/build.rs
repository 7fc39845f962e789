use crate::{
    condition::ConditionProcessor,
    config::GraphConfig,
    edge::Edge,
    error::{BuildError, SetupFailure},
    executor::Executor,
    expr::Expr,
    graph::{Graph, GraphInner},
    processor::{Processor, Registry},
    slot::DataSlot,
    types::{EdgeId, IndexMap, IndexSet, SlotId, VertexId},
    vertex::Vertex,
};
use core::any::Any;
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

/// Declarative description of a graph before materialization.
#[derive(Debug, Default)]
pub(crate) struct Layout {
    slots: IndexMap<String, SlotDecl>,
    vertices: Vec<VertexDecl>,
    edges: Vec<EdgeDecl>,
    /// First binding conflict; `build` refuses to continue past it.
    fatal: Option<BuildError>,
}

#[derive(Debug, Default)]
struct SlotDecl {
    producer: Option<VertexId>,
    data_edges: Vec<EdgeId>,
    gate_edges: Vec<EdgeId>,
}

#[derive(Debug)]
struct VertexDecl {
    name: String,
    edges: Vec<EdgeId>,
    emits: Vec<SlotId>,
}

#[derive(Debug)]
struct EdgeDecl {
    consumer: VertexId,
    data: SlotId,
    condition: Option<SlotId>,
    optional: bool,
}

impl Layout {
    fn ensure_slot(&mut self, name: &str) -> SlotId {
        let idx = match self.slots.get_index_of(name) {
            Some(idx) => idx,
            None => self.slots.insert_full(name.to_owned(), SlotDecl::default()).0,
        };
        SlotId::new(idx)
    }

    fn slot_name(&self, slot: SlotId) -> &str {
        self.slots
            .get_index(slot.index())
            .map(|(name, _)| name.as_str())
            .expect("Layout::slot_name")
    }

    fn slot_mut(&mut self, slot: SlotId) -> &mut SlotDecl {
        &mut self.slots[slot.index()]
    }

    fn push_vertex(&mut self, name: &str) -> VertexId {
        let id = VertexId::new(self.vertices.len());
        let name = if self.vertices.iter().any(|v| v.name == name) {
            format!("{name}#{}", id.index())
        } else {
            name.to_owned()
        };
        self.vertices.push(VertexDecl {
            name,
            edges: Vec::new(),
            emits: Vec::new(),
        });
        id
    }

    /// Edge of `vertex` on slot `name`; one per (vertex, slot) pair.
    fn depend(&mut self, vertex: VertexId, name: &str, optional: bool) -> EdgeId {
        let data = self.ensure_slot(name);
        let existing = self.vertices[vertex.index()]
            .edges
            .iter()
            .copied()
            .find(|edge| self.edges[edge.index()].data == data);
        if let Some(edge) = existing {
            self.edges[edge.index()].optional |= optional;
            return edge;
        }
        let edge = EdgeId::new(self.edges.len());
        self.edges.push(EdgeDecl {
            consumer: vertex,
            data,
            condition: None,
            optional,
        });
        self.vertices[vertex.index()].edges.push(edge);
        self.slot_mut(data).data_edges.push(edge);
        edge
    }

    fn emit(&mut self, vertex: VertexId, name: &str) -> Result<SlotId, BuildError> {
        let slot = self.ensure_slot(name);
        match self.slots[slot.index()].producer {
            Some(producer) if producer == vertex => Ok(slot),
            Some(producer) => {
                let detail = format!(
                    "emitted by both `{}` and `{}`",
                    self.vertices[producer.index()].name,
                    self.vertices[vertex.index()].name
                );
                Err(self.conflict(slot, &detail))
            }
            None => {
                self.slot_mut(slot).producer = Some(vertex);
                self.vertices[vertex.index()].emits.push(slot);
                Ok(slot)
            }
        }
    }

    /// Records an error as fatal for `build` and returns a copy of it.
    ///
    /// The first recorded error wins.
    fn record_fatal(&mut self, error: impl Fn() -> BuildError) -> BuildError {
        if self.fatal.is_none() {
            self.fatal = Some(error());
        }
        error()
    }

    /// Records a binding conflict as fatal and returns it.
    fn conflict(&mut self, slot: SlotId, detail: &str) -> BuildError {
        let slot = self.slot_name(slot).to_owned();
        self.record_fatal(|| BuildError::DuplicateBinding {
            slot: slot.clone(),
            detail: detail.to_owned(),
        })
    }

    /// Rejects layouts whose vertices cannot be ordered.
    fn check_acyclic(&self) -> Result<(), BuildError> {
        // Phase 1: Vertex-level dependencies.
        // A vertex depends on the producers of its data slots and of the
        // condition slots gating them. Inputs without a producer come from
        // the caller and do not constrain the order.
        let num_vertices = self.vertices.len();
        let mut children = vec![IndexSet::<VertexId>::default(); num_vertices];
        for edge in &self.edges {
            for slot in core::iter::once(edge.data).chain(edge.condition) {
                if let Some(producer) = self.slots[slot.index()].producer {
                    children[producer.index()].insert(edge.consumer);
                }
            }
        }
        let mut parents_left = vec![0_usize; num_vertices];
        for child in children.iter().flatten() {
            parents_left[child.index()] += 1;
        }

        // Phase 2: Kahn's algorithm, seeded with the vertices that depend on
        // nothing produced inside the graph.
        let mut queue: VecDeque<_> = parents_left
            .iter()
            .enumerate()
            .filter(|&(_, &left)| left == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut num_ordered = 0_usize;
        while let Some(idx) = queue.pop_front() {
            num_ordered += 1;
            for child in &children[idx] {
                let left = &mut parents_left[child.index()];
                *left = left.checked_sub(1).expect("Layout::check_acyclic: [1]");
                if *left == 0 {
                    queue.push_back(child.index());
                }
            }
        }

        // Phase 3: Whatever was never released sits on or behind a cycle.
        if num_ordered == num_vertices {
            return Ok(());
        }
        let vertices = parents_left
            .iter()
            .enumerate()
            .filter(|&(_, &left)| left > 0)
            .map(|(idx, _)| self.vertices[idx].name.clone())
            .collect();
        Err(BuildError::Cycle { vertices })
    }
}

/// Assembles a [`Graph`] from vertices created through a [`Registry`].
///
/// ```
/// use gateflow::{graph::GraphBuilder, processor::Registry};
///
/// let mut registry = Registry::new();
/// registry
///     .register_fn("double", |ctx| {
///         let x: &i64 = ctx.read("x")?;
///         ctx.publish("y", x * 2)?;
///         Ok(())
///     })
///     .unwrap();
///
/// let mut builder = GraphBuilder::new(&registry);
/// let mut double = builder.add_vertex("double").unwrap();
/// double.depend("x");
/// double.emit("y").unwrap();
/// let mut graph = builder.build().unwrap();
///
/// graph.publish("x", 21_i64).unwrap();
/// graph.run("y").unwrap().wait().unwrap();
/// assert_eq!(graph.read::<i64>("y"), Ok(&42));
/// ```
#[derive(derive_more::Debug)]
pub struct GraphBuilder<'r> {
    registry: &'r Registry,
    layout: Layout,
    #[debug(skip)]
    processors: Vec<Box<dyn Processor>>,
    #[debug(skip)]
    options: Vec<Option<Box<dyn Any>>>,
    config: GraphConfig,
    #[debug(skip)]
    executor: Option<Arc<dyn Executor>>,
    gates: usize,
}

impl<'r> GraphBuilder<'r> {
    /// Starts an empty graph whose vertices come from `registry`.
    #[must_use]
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            layout: Layout::default(),
            processors: Vec::new(),
            options: Vec::new(),
            config: GraphConfig::default(),
            executor: None,
            gates: 0,
        }
    }

    /// Sets the configuration used to create the executor.
    #[must_use]
    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `executor` instead of creating one from the configuration.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Adds a vertex running the processor registered as `processor`.
    ///
    /// The vertex is named after the processor, with a `#index` suffix if
    /// that name is taken.
    ///
    /// # Errors
    /// [`BuildError::UnknownProcessor`] if nothing is registered under
    /// `processor`.
    pub fn add_vertex(&mut self, processor: &str) -> Result<VertexHandle<'_, 'r>, BuildError> {
        let instance = self.registry.create(processor)?;
        Ok(self.push_vertex(processor, instance))
    }

    /// Adds a vertex running a processor instance that is not registered.
    pub fn add_vertex_with(
        &mut self,
        name: &str,
        processor: impl Processor,
    ) -> VertexHandle<'_, 'r> {
        self.push_vertex(name, Box::new(processor))
    }

    fn push_vertex(&mut self, name: &str, processor: Box<dyn Processor>) -> VertexHandle<'_, 'r> {
        let vertex = self.layout.push_vertex(name);
        self.processors.push(processor);
        self.options.push(None);
        VertexHandle {
            builder: self,
            vertex,
        }
    }

    /// Declares a slot, e.g. a caller-provided input nobody depends on yet.
    pub fn ensure_data(&mut self, name: &str) -> SlotId {
        self.layout.ensure_slot(name)
    }

    /// Runs every processor's `setup`, checks the graph, and materializes it.
    ///
    /// # Errors
    /// - The first binding conflict recorded while building.
    /// - [`BuildError::Setup`] with every failing `setup`.
    /// - [`BuildError::Cycle`] if the vertices cannot be ordered.
    /// - [`BuildError::ThreadPool`] if the configured pool cannot start.
    pub fn build(self) -> Result<Graph, BuildError> {
        let Self {
            registry: _,
            mut layout,
            mut processors,
            options,
            config,
            executor,
            gates,
        } = self;

        // Phase 1: Conflicts recorded by the builder calls.
        if let Some(err) = layout.fatal.take() {
            return Err(err);
        }

        // Phase 2: Processor setup, in vertex order. Setup may add edges and
        // outputs but no vertices. Every failure is collected.
        let mut failures = Vec::new();
        for (idx, processor) in processors.iter_mut().enumerate() {
            let mut ctx = SetupContext {
                layout: &mut layout,
                vertex: VertexId::new(idx),
                option: options[idx].as_deref(),
            };
            if let Err(error) = processor.setup(&mut ctx) {
                failures.push(SetupFailure {
                    vertex: layout.vertices[idx].name.clone(),
                    error,
                });
            }
        }
        if !failures.is_empty() {
            return Err(BuildError::Setup { failures });
        }
        if let Some(err) = layout.fatal.take() {
            return Err(err);
        }
        drop(options);

        // Phase 3: Cycle detection.
        layout.check_acyclic()?;

        // Phase 4: Executor.
        let executor = match executor {
            Some(executor) => executor,
            None => config.create_executor()?,
        };

        // Phase 5: Materialize the arenas. Ids were assigned as positions in
        // the layout, so they stay valid.
        let Layout {
            slots,
            vertices,
            edges,
            fatal: _,
        } = layout;
        assert_eq!(vertices.len(), processors.len(), "GraphBuilder::build: [1]");
        let slots: Vec<_> = slots
            .into_iter()
            .map(|(name, decl)| DataSlot::new(name, decl.producer, decl.data_edges, decl.gate_edges))
            .collect();
        let vertices: Vec<_> = vertices
            .into_iter()
            .zip(processors)
            .map(|(decl, processor)| Vertex::new(decl.name, processor, decl.edges, decl.emits))
            .collect();
        let edges: Vec<_> = edges
            .into_iter()
            .map(|decl| Edge::new(decl.consumer, decl.data, decl.condition, decl.optional))
            .collect();
        debug!(
            slots = slots.len(),
            vertices = vertices.len(),
            edges = edges.len(),
            gates,
            "graph built"
        );
        Ok(Graph::new(GraphInner::new(slots, vertices, edges, executor)))
    }
}

/// Handle to a vertex being declared.
#[derive(Debug)]
pub struct VertexHandle<'g, 'r> {
    builder: &'g mut GraphBuilder<'r>,
    vertex: VertexId,
}

impl<'r> VertexHandle<'_, 'r> {
    /// Id of the vertex in the built graph.
    #[must_use]
    pub fn id(&self) -> VertexId {
        self.vertex
    }

    /// Unique name of the vertex.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.builder.layout.vertices[self.vertex.index()].name
    }

    /// Declares a required input.
    ///
    /// Declaring the same slot twice returns the existing edge.
    pub fn depend(&mut self, slot: &str) -> EdgeHandle<'_, 'r> {
        let edge = self.builder.layout.depend(self.vertex, slot, false);
        EdgeHandle {
            builder: self.builder,
            edge,
        }
    }

    /// Declares an input listed by `ProcessContext::optional_inputs`.
    ///
    /// Optional inputs are still waited for; combined with a gate they let
    /// the processor merge whatever is enabled in a run.
    pub fn optional_depend(&mut self, slot: &str) -> EdgeHandle<'_, 'r> {
        let edge = self.builder.layout.depend(self.vertex, slot, true);
        EdgeHandle {
            builder: self.builder,
            edge,
        }
    }

    /// Declares an output.
    ///
    /// # Errors
    /// [`BuildError::DuplicateBinding`] if another vertex emits the slot.
    /// The conflict also makes `build` fail.
    pub fn emit(&mut self, slot: &str) -> Result<SlotId, BuildError> {
        self.builder.layout.emit(self.vertex, slot)
    }

    /// Attaches a value the processor can fetch in `setup` with
    /// [`SetupContext::option`].
    pub fn option<T: Any>(&mut self, value: T) -> &mut Self {
        self.builder.options[self.vertex.index()] = Some(Box::new(value));
        self
    }
}

/// Handle to an input edge being declared.
#[derive(Debug)]
pub struct EdgeHandle<'g, 'r> {
    builder: &'g mut GraphBuilder<'r>,
    edge: EdgeId,
}

impl EdgeHandle<'_, '_> {
    /// Id of the edge in the built graph.
    #[must_use]
    pub fn id(&self) -> EdgeId {
        self.edge
    }

    /// Gates the edge on a condition expression over other slots.
    ///
    /// A hidden vertex evaluates `expr` from the slots it names. When the
    /// result is zero the edge resolves without the data, and the data's
    /// producer is not run on this edge's behalf; the consuming processor
    /// then reads the input as gated off.
    ///
    /// # Errors
    /// [`BuildError::ConditionParse`] if `expr` is malformed, and
    /// [`BuildError::DuplicateBinding`] if the edge is already gated. Both
    /// also fail the later [`GraphBuilder::build`].
    pub fn gate_on(self, expr: &str) -> Result<EdgeId, BuildError> {
        let builder = self.builder;
        let parsed = match Expr::parse(expr) {
            Ok(parsed) => parsed,
            Err(source) => {
                return Err(builder.layout.record_fatal(|| BuildError::ConditionParse {
                    expr: expr.to_owned(),
                    source: source.clone(),
                }));
            }
        };
        let edge = self.edge;
        let decl = &builder.layout.edges[edge.index()];
        if decl.condition.is_some() {
            let data = decl.data;
            return Err(builder.layout.conflict(data, "edge is already gated"));
        }
        let name = format!("__gate_{}", builder.gates);
        builder.gates += 1;
        let gate = builder
            .push_vertex(&name, Box::new(ConditionProcessor::new(parsed, name.clone())))
            .vertex;
        let condition = builder.layout.emit(gate, &name)?;
        builder.layout.slot_mut(condition).gate_edges.push(edge);
        builder.layout.edges[edge.index()].condition = Some(condition);
        Ok(edge)
    }
}

/// What a processor sees in [`Processor::setup`].
#[derive(Debug)]
pub struct SetupContext<'b> {
    layout: &'b mut Layout,
    vertex: VertexId,
    option: Option<&'b dyn Any>,
}

impl SetupContext<'_> {
    /// Name of the vertex being set up.
    #[must_use]
    pub fn vertex_name(&self) -> &str {
        &self.layout.vertices[self.vertex.index()].name
    }

    /// Id of a slot, declaring it if needed, without adding an edge.
    pub fn slot(&mut self, name: &str) -> SlotId {
        self.layout.ensure_slot(name)
    }

    /// Declares a required input and returns its slot.
    pub fn depend(&mut self, name: &str) -> SlotId {
        let edge = self.layout.depend(self.vertex, name, false);
        self.layout.edges[edge.index()].data
    }

    /// Declares an optional input and returns its slot.
    pub fn optional_depend(&mut self, name: &str) -> SlotId {
        let edge = self.layout.depend(self.vertex, name, true);
        self.layout.edges[edge.index()].data
    }

    /// Declares an output and returns its slot.
    ///
    /// If another vertex already emits it, the conflict is recorded and
    /// `GraphBuilder::build` fails with [`BuildError::DuplicateBinding`].
    pub fn emit(&mut self, name: &str) -> SlotId {
        match self.layout.emit(self.vertex, name) {
            Ok(slot) => slot,
            Err(_) => self.layout.ensure_slot(name),
        }
    }

    /// The value attached with `VertexHandle::option`, if it is a `T`.
    #[must_use]
    pub fn option<T: Any>(&self) -> Option<&T> {
        self.option.and_then(|value| value.downcast_ref())
    }
}
