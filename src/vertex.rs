use crate::{
    error::{ProcessError, RunError},
    graph::{RunScope, context::ProcessContext},
    processor::Processor,
    sync::{AtomicBool, AtomicI64, Ordering},
    types::{EdgeId, SlotId, SyncUnsafeCell, VertexId},
};
use core::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, trace, warn};

/// A computation node: a processor plus its input edges and emitted slots.
#[derive(derive_more::Debug)]
pub(crate) struct Vertex {
    name: String,
    #[debug(skip)]
    processor: SyncUnsafeCell<Box<dyn Processor>>,
    edges: Vec<EdgeId>,
    emits: Vec<SlotId>,
    /// Unresolved edges plus the activation hold; zero means ready.
    waiting: AtomicI64,
    activated: AtomicBool,
}

impl Vertex {
    pub(crate) fn new(
        name: String,
        processor: Box<dyn Processor>,
        edges: Vec<EdgeId>,
        emits: Vec<SlotId>,
    ) -> Self {
        Self {
            name,
            processor: SyncUnsafeCell::new(processor),
            edges,
            emits,
            waiting: AtomicI64::new(0),
            activated: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub(crate) fn emits(&self, slot: SlotId) -> bool {
        self.emits.contains(&slot)
    }

    /// Adds the vertex to the run, once.
    ///
    /// The winner pushes itself onto `frontier` and keeps one extra unit on
    /// its wait count. Whoever drains the frontier releases that hold with
    /// [`Vertex::decrement_waiting`] after registering the frontier with the
    /// run, so no edge resolved during activation can dispatch the vertex
    /// early.
    pub(crate) fn activate(&self, id: VertexId, scope: RunScope<'_>, frontier: &mut Vec<VertexId>) {
        if self
            .activated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let hold = i64::try_from(self.edges.len()).expect("Vertex::activate") + 1;
        self.waiting.fetch_add(hold, Ordering::AcqRel);
        frontier.push(id);
        trace!(vertex = %self.name, edges = self.edges.len(), "vertex activated");
        for &edge in &self.edges {
            scope.graph.edge(edge).activate(scope, frontier);
        }
    }

    /// Returns `true` exactly once per run: when the count reaches zero.
    pub(crate) fn decrement_waiting(&self) -> bool {
        self.waiting.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Runs the processor for the run in `scope`.
    ///
    /// # Safety
    /// The vertex must have been dispatched for this run, which happens at
    /// most once, and the run must not be reset while this call is running.
    pub(crate) unsafe fn run(&self, id: VertexId, scope: RunScope<'_>) {
        // SAFETY: the single dispatch per run gives this call exclusive access
        // to the processor, and `Graph::reset` drains the run first.
        let processor = self.processor.with_mut(|ptr| unsafe { &mut *ptr });
        let ctx = ProcessContext::new(scope, id);
        trace!(vertex = %self.name, "vertex started");
        let result = catch_unwind(AssertUnwindSafe(|| processor.process(&ctx)))
            .unwrap_or_else(|payload| {
                Err(ProcessError::Panicked {
                    message: panic_message(&*payload),
                })
            });
        match result {
            Ok(()) => {
                for &slot in &self.emits {
                    scope.graph.slot(slot).publish_absent(scope);
                }
                debug!(vertex = %self.name, "vertex finished");
                scope.run.one_finished();
            }
            Err(source) => {
                warn!(vertex = %self.name, error = %source, "vertex failed");
                scope.run.mark_finished(RunError {
                    vertex: self.name.clone(),
                    source,
                });
            }
        }
    }

    pub(crate) fn reset(&self) {
        self.waiting.store(0, Ordering::Relaxed);
        self.activated.store(false, Ordering::Relaxed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
