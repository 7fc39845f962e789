use crate::channel::Channel;
use rayon::iter::{ParallelBridge, ParallelIterator};
use tracing::{debug, trace};

/// Batch size used unless [`MapReducer::batch_size`] sets another.
pub const DEFAULT_BATCH_SIZE: usize = 64;

type SerialMap<'c, I, O> = Box<dyn FnMut(Vec<I>) -> Vec<O> + 'c>;
type ParallelMap<'c, I, O> = Box<dyn Fn(Vec<I>) -> Vec<O> + Send + Sync + 'c>;

enum Mapper<'c, I, O> {
    Serial(SerialMap<'c, I, O>),
    Parallel(ParallelMap<'c, I, O>),
}

/// Drains a [`Channel`] in batches, maps every batch, and reduces the
/// results in batch order.
///
/// Batches are cut with [`Channel::pop_n`], so the run ends after the first
/// short batch, which the channel only yields once it is closed.
///
/// ```
/// use gateflow::{channel::Channel, mapreduce::MapReducer};
///
/// let items = Channel::new();
/// items.push_n(1..=10);
/// items.close();
///
/// let mut sums = Vec::new();
/// let batches = MapReducer::new(&items)
///     .batch_size(4)
///     .parallel_map(|batch: Vec<i32>| vec![batch.iter().sum::<i32>()])
///     .reduce(|sum| sums.extend(sum))
///     .run();
/// assert_eq!(batches, 3);
/// assert_eq!(sums, [10, 26, 19]);
/// ```
#[derive(derive_more::Debug)]
pub struct MapReducer<'c, I, O> {
    #[debug(skip)]
    input: &'c Channel<I>,
    batch_size: usize,
    #[debug(skip)]
    mapper: Option<Mapper<'c, I, O>>,
    #[debug(skip)]
    reducer: Option<Box<dyn FnMut(Vec<O>) + 'c>>,
}

impl<'c, I: Send, O: Send> MapReducer<'c, I, O> {
    /// Creates a reducer reading from `input`.
    #[must_use]
    pub fn new(input: &'c Channel<I>) -> Self {
        Self {
            input,
            batch_size: DEFAULT_BATCH_SIZE,
            mapper: None,
            reducer: None,
        }
    }

    /// Sets the number of items per batch. Zero is treated as one.
    #[must_use]
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    /// Maps batches one after another on the calling thread, reducing each
    /// result before the next batch is popped.
    #[must_use]
    pub fn map(mut self, f: impl FnMut(Vec<I>) -> Vec<O> + 'c) -> Self {
        self.mapper = Some(Mapper::Serial(Box::new(f)));
        self
    }

    /// Maps batches concurrently on the current rayon pool.
    ///
    /// Batches are popped while earlier ones are still being mapped; the
    /// results are reduced in batch order once the channel is drained.
    #[must_use]
    pub fn parallel_map(mut self, f: impl Fn(Vec<I>) -> Vec<O> + Send + Sync + 'c) -> Self {
        self.mapper = Some(Mapper::Parallel(Box::new(f)));
        self
    }

    /// Consumes every mapped batch. Without it the results are dropped.
    #[must_use]
    pub fn reduce(mut self, f: impl FnMut(Vec<O>) + 'c) -> Self {
        self.reducer = Some(Box::new(f));
        self
    }

    /// Drains the channel and returns the number of non-empty batches.
    ///
    /// Blocks until the channel is closed. Without a map callback nothing is
    /// popped and zero is returned.
    pub fn run(self) -> usize {
        let Self {
            input,
            batch_size,
            mapper,
            reducer,
        } = self;
        let mut reduce = reducer.unwrap_or_else(|| Box::new(drop::<Vec<O>>));
        let batches = match mapper {
            None => {
                debug!("map-reduce without a map callback, nothing to do");
                return 0;
            }
            Some(Mapper::Serial(mut map)) => {
                let mut count = 0;
                for batch in batches_of(input, batch_size) {
                    reduce(map(batch));
                    count += 1;
                }
                count
            }
            Some(Mapper::Parallel(map)) => {
                let mut mapped: Vec<(usize, Vec<O>)> = batches_of(input, batch_size)
                    .enumerate()
                    .par_bridge()
                    .map(|(i, batch)| (i, map(batch)))
                    .collect();
                mapped.sort_unstable_by_key(|(i, _)| *i);
                let count = mapped.len();
                for (_, output) in mapped {
                    reduce(output);
                }
                count
            }
        };
        trace!(batches, batch_size, "map-reduce finished");
        batches
    }
}

/// Non-empty batches of `input`, ending after the first short one.
fn batches_of<I>(input: &Channel<I>, size: usize) -> impl Iterator<Item = Vec<I>> + Send + '_
where
    I: Send,
{
    let mut done = false;
    core::iter::from_fn(move || {
        if done {
            return None;
        }
        let batch = input.pop_n(size);
        done = batch.len() < size;
        (!batch.is_empty()).then_some(batch)
    })
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    fn closed(items: impl IntoIterator<Item = u32>) -> Channel<u32> {
        let channel = Channel::new();
        channel.push_n(items);
        channel.close();
        channel
    }

    #[test]
    fn serial_map_reduces_each_batch_in_order() {
        let input = closed(1..=25);
        let mut seen = Vec::new();
        let batches = MapReducer::new(&input)
            .batch_size(10)
            .map(|batch| batch.into_iter().map(|x| format!("title_{x}")).collect::<Vec<_>>())
            .reduce(|titles: Vec<String>| seen.push(titles))
            .run();
        assert_eq!(batches, 3);
        assert_eq!(seen.iter().map(Vec::len).collect::<Vec<_>>(), [10, 10, 5]);
        assert_eq!(seen[0][0], "title_1");
        assert_eq!(seen[2][4], "title_25");
    }

    #[test]
    fn parallel_map_keeps_batch_order() {
        let input = closed(0..1000);
        let mut out = Vec::new();
        let batches = MapReducer::new(&input)
            .batch_size(7)
            .parallel_map(|batch| batch.into_iter().map(|x| x * 2).collect::<Vec<u32>>())
            .reduce(|doubled| out.extend(doubled))
            .run();
        assert_eq!(batches, 143);
        assert_eq!(out, (0..1000).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn exact_multiple_ends_on_the_empty_batch() {
        let input = closed(0..20);
        let mut sizes = Vec::new();
        let batches = MapReducer::new(&input)
            .batch_size(10)
            .map(|batch: Vec<u32>| batch)
            .reduce(|batch| sizes.push(batch.len()))
            .run();
        assert_eq!(batches, 2);
        assert_eq!(sizes, [10, 10]);
    }

    #[test]
    fn no_map_leaves_the_channel_alone() {
        let input = closed(0..3);
        let batches = MapReducer::<u32, u32>::new(&input).run();
        assert_eq!(batches, 0);
        assert_eq!(input.len(), 3);
    }

    #[test]
    fn runs_while_the_producer_is_still_pushing() {
        let input = Arc::new(Channel::new());
        let producer = {
            let input = input.clone();
            thread::spawn(move || {
                for start in (0..100).step_by(10) {
                    input.push_n(start..start + 10);
                }
                input.close();
            })
        };
        let mut total = 0;
        MapReducer::new(&*input)
            .batch_size(16)
            .parallel_map(|batch: Vec<u64>| vec![batch.iter().sum::<u64>()])
            .reduce(|sum| total += sum[0])
            .run();
        producer.join().unwrap();
        assert_eq!(total, (0..100).sum());
    }
}
