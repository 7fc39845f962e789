//! In-process dataflow graph with gated edges and lock-free fan-in.
//!
//! A graph is a set of vertices (processors) exchanging named, type-erased
//! values through data slots. It is built once and run many times:
//! - Each run computes a target slot and activates exactly the vertices
//!   upstream of it, discovered lazily from the target.
//! - Vertices whose inputs are resolved are handed to an executor (a rayon
//!   pool by default) and run concurrently.
//! - An edge may be gated on a condition expression over other slots. When
//!   the condition is false the edge resolves without its data, and the
//!   data's producer is not pulled into the run on its behalf.
//!
//! Fan-in is coordinated with a signed atomic counter per edge and a wait
//! count per vertex. Publication is a release store, resolution an acquire
//! read-modify-write, so a processor observes every value its inputs
//! published. No lock is taken on the scheduling path; the only blocking
//! points are `RunCompletion::wait` and the drain inside `Graph::reset`.
//!
//! Key modules:
//! - `processor`: the `Processor` trait and the `Registry` of factories.
//! - `graph`: the builder, the built `Graph`, and the contexts processors
//!   run with.
//! - `completion`: per-run latch with first-error capture.
//! - `executor`: the `Executor` trait with rayon and inline executors.
//! - `expr`: the condition language used by gates.
//! - `channel` and `mapreduce`: streaming values out of a vertex that is
//!   still running, and batch processing them on the consumer side.
//!
//! Quick start:
//! 1. Register processors in a `Registry`.
//! 2. Add vertices with `GraphBuilder::add_vertex`, declare their inputs and
//!    outputs, optionally gate inputs with `EdgeHandle::gate_on`, then
//!    `build`.
//! 3. Publish inputs, call `Graph::run(target)`, and `wait` on the returned
//!    completion.
//! 4. Read results, then `Graph::reset` before the next run.

/// Closeable queues that stream items between running vertices.
pub mod channel;
/// Per-run completion latch.
///
/// Counts the vertices a run waits for, records the first failure, and
/// tracks the tasks still in flight so a reset can drain them.
pub mod completion;
/// Graph construction settings.
pub mod config;
mod condition;
mod edge;
pub mod error;
/// Executors that run ready vertices.
///
/// Defines the `Executor` trait, the `VertexTask` handed to it, and the
/// rayon and inline implementations.
pub mod executor;
pub mod expr;
/// Building, running, and resetting graphs.
///
/// `GraphBuilder` declares vertices, slots, and gated edges; `Graph` is the
/// built, reusable result; `ProcessContext` and `SlotWriter` are what
/// processors use at run time.
pub mod graph;
/// Batch map-reduce over a [`channel::Channel`].
pub mod mapreduce;
/// The `Processor` trait and the processor `Registry`.
pub mod processor;
mod slot;
mod sync;
/// Ids of slots, vertices, and edges, plus shared aliases.
pub mod types;
mod value;
mod vertex;
