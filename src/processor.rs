use crate::{
    error::{BuildError, ProcessError},
    graph::{build::SetupContext, context::ProcessContext},
    types::IndexMap,
};
use std::sync::Arc;

/// User code run by a vertex.
///
/// A processor is created once per vertex when the graph is built. `setup`
/// runs once, after every builder-declared edge exists, and may declare more
/// inputs and outputs. `process` runs at most once per run, when every input
/// edge of the vertex is resolved.
pub trait Processor: Send + Sync + 'static {
    /// Declares inputs and outputs beyond those added through the builder.
    ///
    /// # Errors
    /// Any error aborts `GraphBuilder::build`; errors of all vertices are
    /// collected into `BuildError::Setup`.
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<(), ProcessError> {
        let _ = ctx;
        Ok(())
    }

    /// Reads inputs and publishes outputs for one run.
    ///
    /// Emitted slots left unpublished when this returns `Ok` are published
    /// as absent.
    ///
    /// # Errors
    /// The first error of a run finishes it; see `RunCompletion::wait`.
    fn process(&mut self, ctx: &ProcessContext<'_>) -> Result<(), ProcessError>;
}

type Factory = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Processor factories by name.
///
/// Vertices are created from a registry by processor name; see
/// `GraphBuilder::add_vertex`.
#[derive(Default, derive_more::Debug)]
pub struct Registry {
    #[debug("{:?}", factories.keys().collect::<Vec<_>>())]
    factories: IndexMap<String, Factory>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `P` under `name`, constructed with `P::default()`.
    ///
    /// # Errors
    /// [`BuildError::DuplicateProcessor`] if `name` is taken.
    pub fn register<P: Processor + Default>(&mut self, name: &str) -> Result<&mut Self, BuildError> {
        self.register_with(name, P::default)
    }

    /// Registers a processor constructed by `factory`.
    ///
    /// # Errors
    /// [`BuildError::DuplicateProcessor`] if `name` is taken.
    pub fn register_with<P, F>(&mut self, name: &str, factory: F) -> Result<&mut Self, BuildError>
    where
        P: Processor,
        F: Fn() -> P + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(BuildError::DuplicateProcessor {
                name: name.to_owned(),
            });
        }
        self.factories
            .insert(name.to_owned(), Box::new(move || -> Box<dyn Processor> {
                Box::new(factory())
            }));
        Ok(self)
    }

    /// Registers a closure as a stateless processor.
    ///
    /// The closure declares nothing in `setup`, so its inputs and outputs
    /// come from the builder.
    ///
    /// # Errors
    /// [`BuildError::DuplicateProcessor`] if `name` is taken.
    pub fn register_fn<F>(&mut self, name: &str, f: F) -> Result<&mut Self, BuildError>
    where
        F: Fn(&ProcessContext<'_>) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_with(name, move || FnProcessor(f.clone()))
    }

    /// Whether a processor is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub(crate) fn create(&self, name: &str) -> Result<Box<dyn Processor>, BuildError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BuildError::UnknownProcessor {
                name: name.to_owned(),
            })
    }
}

struct FnProcessor<F>(Arc<F>);

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&ProcessContext<'_>) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    fn process(&mut self, ctx: &ProcessContext<'_>) -> Result<(), ProcessError> {
        (self.0)(ctx)
    }
}
