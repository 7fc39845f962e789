use crate::{
    error::RunError,
    sync::{AtomicBool, AtomicI64, AtomicUsize, Condvar, Mutex, Ordering},
};
#[cfg(not(feature = "loom"))]
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Per-run synchronization object: a dynamic countdown latch with
/// first-error capture.
///
/// The count grows while the run discovers vertices upstream of its target
/// and shrinks as they finish. Waiters are released exactly once: either
/// when the count returns to zero or when the first failure is recorded,
/// whichever happens first.
#[derive(Debug)]
pub struct RunCompletion {
    generation: u64,
    /// Vertices activated in this run that have not finished yet.
    outstanding: AtomicI64,
    /// Vertex tasks handed to the executor that have not returned yet.
    in_flight: AtomicUsize,
    finished: AtomicBool,
    outcome: Mutex<Outcome>,
    signal: Condvar,
}

#[derive(Debug, Default)]
struct Outcome {
    done: bool,
    error: Option<RunError>,
}

impl RunCompletion {
    /// Creates the completion of the run with the given generation.
    #[must_use]
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            outstanding: AtomicI64::new(0),
            in_flight: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            outcome: Mutex::new(Outcome::default()),
            signal: Condvar::new(),
        }
    }

    /// Generation of the graph run this completion belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Non-blocking check whether the run has finished (successfully or not).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Blocks until the run finishes and returns its first error, if any.
    ///
    /// # Errors
    /// The first processor failure of the run.
    pub fn wait(&self) -> Result<(), RunError> {
        let mut outcome = self.outcome.lock();
        while !outcome.done {
            outcome = self.signal.wait(outcome);
        }
        outcome.error.clone().map_or(Ok(()), Err)
    }

    /// Like [`RunCompletion::wait`], but gives up after `timeout`.
    ///
    /// Returns `None` if the run is still going when the timeout expires.
    #[cfg(not(feature = "loom"))]
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), RunError>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        while !outcome.done {
            let (guard, timed_out) = self.signal.wait_until(outcome, deadline);
            outcome = guard;
            if timed_out && !outcome.done {
                return None;
            }
        }
        Some(outcome.error.clone().map_or(Ok(()), Err))
    }

    /// Registers `n` more vertices the run has to wait for.
    pub(crate) fn add_wait(&self, n: usize) {
        let n = i64::try_from(n).expect("RunCompletion::add_wait");
        let total = self.outstanding.fetch_add(n, Ordering::AcqRel) + n;
        trace!(generation = self.generation, added = n, total, "run waits for more vertices");
    }

    /// Records that one registered vertex finished successfully.
    pub(crate) fn one_finished(&self) {
        let left = self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(left >= 0, "RunCompletion::one_finished: count under-run");
        if left == 0 {
            self.finish(None);
        }
    }

    /// Finishes the run with `error` unless it already finished.
    ///
    /// Returns whether this call won.
    pub(crate) fn mark_finished(&self, error: RunError) -> bool {
        self.finish(Some(error))
    }

    /// Finishes a run that has nothing to execute.
    pub(crate) fn finish_empty(&self) {
        self.finish(None);
    }

    fn finish(&self, error: Option<RunError>) -> bool {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if let Some(error) = error {
                trace!(generation = self.generation, %error, "run already finished, error dropped");
            }
            return false;
        }
        debug!(
            generation = self.generation,
            failed = error.is_some(),
            "run finished"
        );
        let mut outcome = self.outcome.lock();
        outcome.done = true;
        outcome.error = error;
        drop(outcome);
        self.signal.notify_all();
        true
    }

    pub(crate) fn task_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn task_done(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Pair with `drain`, which re-checks the counter under the lock.
            drop(self.outcome.lock());
            self.signal.notify_all();
        }
    }

    /// Blocks until every task dispatched for this run has returned.
    pub(crate) fn drain(&self) {
        let mut outcome = self.outcome.lock();
        while self.in_flight.load(Ordering::Acquire) != 0 {
            outcome = self.signal.wait(outcome);
        }
    }
}
