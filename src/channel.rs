use crate::sync::{Condvar, Mutex};
use std::collections::VecDeque;
use tracing::trace;

/// A closeable multi-producer, multi-consumer FIFO queue.
///
/// A channel is an ordinary slot value: a producer can publish it early with
/// [`SlotWriter::publish`](crate::graph::SlotWriter::publish) and keep
/// pushing into it while downstream vertices are already popping. Consumers
/// block until enough items arrive or the channel is closed, so the producer
/// must [`close`](Channel::close) it on every path, and the graph needs an
/// executor with at least two threads. The storage survives graph resets, so
/// the producer calls [`clear`](Channel::clear) before publishing it again.
#[derive(derive_more::Debug)]
pub struct Channel<T> {
    #[debug(skip)]
    state: Mutex<State<T>>,
    #[debug(skip)]
    signal: Condvar,
}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    /// Creates an open, empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                closed: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Appends one item.
    ///
    /// Returns `false`, dropping the item, if the channel is closed.
    pub fn push(&self, item: T) -> bool {
        self.push_n(Some(item))
    }

    /// Appends every item of `items` in order.
    ///
    /// Returns `false`, dropping the items, if the channel is closed.
    pub fn push_n(&self, items: impl IntoIterator<Item = T>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.queue.extend(items);
        drop(state);
        self.signal.notify_all();
        true
    }

    /// Pops the oldest item, blocking while the channel is open and empty.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            state = self.signal.wait(state);
        }
        state.queue.pop_front()
    }

    /// Moves up to `n` items into `batch`, blocking until `n` items are
    /// queued or the channel is closed.
    ///
    /// Returns the number of items moved. Fewer than `n` means the channel
    /// is closed and now empty.
    pub fn pop_n_into(&self, batch: &mut Vec<T>, n: usize) -> usize {
        let mut state = self.state.lock();
        while state.queue.len() < n && !state.closed {
            state = self.signal.wait(state);
        }
        let taken = n.min(state.queue.len());
        batch.extend(state.queue.drain(..taken));
        taken
    }

    /// Like [`Channel::pop_n_into`], collecting into a new vector.
    #[must_use]
    pub fn pop_n(&self, n: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(n);
        self.pop_n_into(&mut batch, n);
        batch
    }

    /// Closes the channel and wakes every blocked consumer.
    ///
    /// Items already queued can still be popped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        trace!(queued = state.queue.len(), "channel closed");
        drop(state);
        self.signal.notify_all();
    }

    /// Drops every queued item and reopens the channel.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.closed = false;
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no item is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`Channel::close`] was called since the last clear.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn items_come_out_in_order() {
        let channel = Channel::new();
        assert!(channel.push(1));
        assert!(channel.push_n([2, 3, 4]));
        assert_eq!(channel.len(), 4);
        assert_eq!(channel.pop(), Some(1));
        assert_eq!(channel.pop_n(2), [2, 3]);
        channel.close();
        assert_eq!(channel.pop_n(5), [4]);
        assert_eq!(channel.pop(), None);
        assert!(channel.is_empty());
    }

    #[test]
    fn closed_channel_rejects_pushes_until_cleared() {
        let channel = Channel::new();
        channel.push(1);
        channel.close();
        assert!(channel.is_closed());
        assert!(!channel.push(2));
        assert_eq!(channel.len(), 1);

        channel.clear();
        assert!(!channel.is_closed());
        assert!(channel.is_empty());
        assert!(channel.push(3));
        assert_eq!(channel.pop(), Some(3));
    }

    #[test]
    fn pop_n_waits_for_a_full_batch() {
        let channel = Arc::new(Channel::new());
        let consumer = {
            let channel = channel.clone();
            thread::spawn(move || {
                let mut batches = Vec::new();
                loop {
                    let batch = channel.pop_n(3);
                    let last = batch.len() < 3;
                    batches.push(batch);
                    if last {
                        return batches;
                    }
                }
            })
        };
        for i in 0..7 {
            channel.push(i);
            thread::sleep(Duration::from_millis(1));
        }
        channel.close();
        let batches = consumer.join().unwrap();
        assert_eq!(batches, [vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn close_wakes_every_consumer() {
        let channel = Arc::new(Channel::<u8>::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || channel.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        channel.close();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }
}
