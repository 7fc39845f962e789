use crate::{
    error::BuildError,
    executor::{Executor, InlineExecutor, RayonExecutor},
};
use std::sync::Arc;

/// Which executor a graph creates when none is injected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutorKind {
    /// A dedicated rayon pool per graph.
    #[default]
    Rayon,
    /// Rayon's global pool.
    RayonGlobal,
    /// The dispatching thread.
    Inline,
}

/// Settings for building a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Executor to create.
    pub executor: ExecutorKind,
    /// Worker count of a dedicated pool; `None` lets rayon decide.
    pub threads: Option<usize>,
    /// Name prefix of dedicated pool workers.
    pub thread_name: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::default(),
            threads: None,
            thread_name: "gateflow-worker".to_owned(),
        }
    }
}

impl GraphConfig {
    /// Sets the executor kind.
    #[must_use]
    pub fn executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the worker count of a dedicated pool.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Sets the worker name prefix of a dedicated pool.
    #[must_use]
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    pub(crate) fn create_executor(&self) -> Result<Arc<dyn Executor>, BuildError> {
        Ok(match self.executor {
            ExecutorKind::Rayon => Arc::new(RayonExecutor::new(self.threads, &self.thread_name)?),
            ExecutorKind::RayonGlobal => Arc::new(RayonExecutor::global()),
            ExecutorKind::Inline => Arc::new(InlineExecutor),
        })
    }
}
