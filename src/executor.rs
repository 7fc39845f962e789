use crate::{
    completion::RunCompletion,
    graph::{GraphInner, RunScope},
    types::VertexId,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Runs ready vertices.
///
/// The graph hands every vertex whose inputs are resolved to
/// [`Executor::dispatch`] exactly once per run. Implementations decide where
/// [`VertexTask::run`] is called; they must call it (or drop the task) for
/// `Graph::reset` to make progress.
pub trait Executor: Send + Sync + 'static {
    /// Creates the completion object of a new run.
    fn create_completion(&self, generation: u64) -> RunCompletion {
        RunCompletion::new(generation)
    }

    /// Schedules `task`.
    fn dispatch(&self, task: VertexTask);
}

/// A ready vertex of a particular run.
///
/// Counts as in flight for its run until it is dropped.
#[derive(derive_more::Debug)]
#[must_use = "a dispatched task must be run"]
pub struct VertexTask {
    #[debug(skip)]
    graph: Arc<GraphInner>,
    vertex: VertexId,
    run: Arc<RunCompletion>,
}

impl VertexTask {
    pub(crate) fn new(graph: Arc<GraphInner>, vertex: VertexId, run: Arc<RunCompletion>) -> Self {
        run.task_started();
        Self { graph, vertex, run }
    }

    /// The vertex this task runs.
    #[must_use]
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// Generation of the run this task belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.run.generation()
    }

    /// Runs the vertex's processor and publishes its outputs.
    ///
    /// Does nothing if the run already finished or was superseded.
    pub fn run(self) {
        let vertex = self.graph.vertex(self.vertex);
        let current = self.graph.generation();
        if self.run.generation() != current {
            debug!(
                vertex = vertex.name(),
                task = self.run.generation(),
                current,
                "stale task ignored"
            );
            return;
        }
        if self.run.is_finished() {
            trace!(vertex = vertex.name(), "run already finished, vertex skipped");
            return;
        }
        let scope = RunScope {
            graph: &self.graph,
            run: &self.run,
        };
        // SAFETY: tasks are only created when a vertex's wait count reaches
        // zero, which happens once per run, and `Graph::reset` waits for
        // this task to be dropped.
        unsafe { vertex.run(self.vertex, scope) };
    }
}

impl Drop for VertexTask {
    fn drop(&mut self) {
        self.run.task_done();
    }
}

/// Runs vertices on a rayon thread pool.
#[derive(Debug)]
pub struct RayonExecutor {
    /// `None` uses rayon's global pool.
    pool: Option<rayon::ThreadPool>,
}

impl RayonExecutor {
    /// Creates a dedicated pool.
    ///
    /// `threads` defaults to rayon's choice; workers are named
    /// `{thread_name}-{index}`.
    ///
    /// # Errors
    /// If the pool cannot be created.
    pub fn new(
        threads: Option<usize>,
        thread_name: &str,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let prefix = thread_name.to_owned();
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(move |idx| format!("{prefix}-{idx}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        Ok(Self {
            pool: Some(builder.build()?),
        })
    }

    /// Uses rayon's global pool.
    #[must_use]
    pub fn global() -> Self {
        Self { pool: None }
    }
}

impl Executor for RayonExecutor {
    fn dispatch(&self, task: VertexTask) {
        match &self.pool {
            Some(pool) => pool.spawn(move || task.run()),
            None => rayon::spawn(move || task.run()),
        }
    }
}

/// Runs every vertex on the dispatching thread, before `dispatch` returns.
///
/// `Graph::run` then completes the whole run (apart from inputs the caller
/// publishes later) before returning. Deep chains recurse deeply.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn dispatch(&self, task: VertexTask) {
        task.run();
    }
}
