//! Error types for graph construction and execution.

use crate::expr::ExprError;
use std::fmt;
use thiserror::Error;

/// Error kind for graph construction failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// No processor is registered under the requested name.
    #[error("unknown processor `{name}`")]
    UnknownProcessor {
        /// The requested processor name.
        name: String,
    },
    /// A processor name was registered twice.
    #[error("processor `{name}` is already registered")]
    DuplicateProcessor {
        /// The conflicting processor name.
        name: String,
    },
    /// A slot or an edge was bound twice, e.g. two producers for one slot.
    #[error("slot `{slot}` is already bound: {detail}")]
    DuplicateBinding {
        /// Name of the slot involved in the conflict.
        slot: String,
        /// Human-readable description of the conflict.
        detail: String,
    },
    /// A gate expression could not be parsed.
    #[error("failed to parse condition `{expr}`: {source}")]
    ConditionParse {
        /// The expression text.
        expr: String,
        /// The underlying parse error.
        #[source]
        source: ExprError,
    },
    /// One or more processors failed in `Processor::setup`.
    #[error("{} processor(s) failed setup: {}", .failures.len(), SetupFailures(.failures))]
    Setup {
        /// Every failing vertex with its error, in vertex order.
        failures: Vec<SetupFailure>,
    },
    /// The dependency graph contains cycle(s).
    #[error("graph contains cycle(s) through: {}", .vertices.join(", "))]
    Cycle {
        /// Vertices that could not be ordered.
        vertices: Vec<String>,
    },
    /// The dedicated worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A single processor `setup` failure reported by [`BuildError::Setup`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetupFailure {
    /// Name of the failing vertex.
    pub vertex: String,
    /// The error returned by the processor.
    pub error: ProcessError,
}

struct SetupFailures<'a>(&'a [SetupFailure]);

impl fmt::Display for SetupFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "`{}`: {}", failure.vertex, failure.error)?;
        }
        Ok(())
    }
}

/// Error kind for reading or writing data slots.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SlotError {
    /// No slot with this name exists in the graph.
    #[error("unknown slot `{name}`")]
    UnknownSlot {
        /// The requested slot name.
        name: String,
    },
    /// The slot has not been published in the current run.
    #[error("slot `{slot}` is not published yet")]
    NotReady {
        /// Slot name.
        slot: String,
    },
    /// The slot was published without a value by a producer that never
    /// wrote it.
    #[error("slot `{slot}` was published without a value")]
    Absent {
        /// Slot name.
        slot: String,
    },
    /// The reading vertex's input on this slot was closed by its gate.
    #[error("input `{slot}` is gated off in this run")]
    GatedOff {
        /// Slot name.
        slot: String,
    },
    /// The stored value has a different type than requested.
    #[error("slot `{slot}` holds `{found}`, not `{expected}`")]
    TypeMismatch {
        /// Slot name.
        slot: String,
        /// Requested type.
        expected: &'static str,
        /// Stored type.
        found: &'static str,
    },
    /// The slot was already published (or is being written) in this run.
    #[error("slot `{slot}` is already published in this run")]
    AlreadyPublished {
        /// Slot name.
        slot: String,
    },
    /// A processor tried to write a slot it does not emit.
    #[error("vertex `{vertex}` does not emit slot `{slot}`")]
    NotProducer {
        /// Slot name.
        slot: String,
        /// Name of the offending vertex.
        vertex: String,
    },
}

/// Error returned by a processor from `setup` or `process`.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProcessError {
    /// Application-level failure with a nonzero error code.
    #[error("failed with code {code}: {message}")]
    Failed {
        /// Nonzero error code reported by the run.
        code: i32,
        /// Free-form description.
        message: String,
    },
    /// Slot access failed.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// Condition expression failed to evaluate.
    #[error(transparent)]
    Expr(#[from] ExprError),
    /// The processor panicked.
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl ProcessError {
    /// Error code used for failures that do not carry their own code.
    pub const GENERIC_CODE: i32 = -1;

    /// Shorthand for [`ProcessError::Failed`].
    ///
    /// A `code` of zero is reserved for success and is replaced by
    /// [`ProcessError::GENERIC_CODE`].
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self::Failed {
            code: if code == 0 { Self::GENERIC_CODE } else { code },
            message: message.into(),
        }
    }

    /// Numeric error code of this failure, never zero.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Failed { code: 0, .. } => Self::GENERIC_CODE,
            Self::Failed { code, .. } => *code,
            Self::Slot(_) | Self::Expr(_) | Self::Panicked { .. } => Self::GENERIC_CODE,
        }
    }
}

/// The first failure of a run, as reported by `RunCompletion::wait`.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("vertex `{vertex}` failed: {source}")]
pub struct RunError {
    /// Name of the vertex whose processor failed.
    pub vertex: String,
    /// The processor's error.
    #[source]
    pub source: ProcessError,
}

impl RunError {
    /// Numeric error code of the run, never zero.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.source.code()
    }
}

/// Error returned by `Graph::run`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// The target slot could not be resolved.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// The graph was already run; `reset` it first.
    #[error("graph was already run; call `reset` before running it again")]
    NotReset,
}
