//! Orchestration of groups, channels, and sequences into pipelines.

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::channel::{BoundedChannel, Capacity};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::seq::{BoxSequence, LazySequence};

/// One dynamically assembled, type-preserving sequence stage.
///
/// Build these with [`stage::map`] and [`stage::take`]; for type-changing
/// stages use the typed combinators on [`LazySequence`] directly.
pub type SequenceStage<T> = Box<dyn FnOnce(BoxSequence<T>) -> BoxSequence<T> + Send>;

/// Constructors for boxed [`SequenceStage`]s.
pub mod stage {
    use super::{BoxSequence, SequenceStage};
    use crate::seq::LazySequence;

    /// A per-element transform stage.
    pub fn map<T, F>(f: F) -> SequenceStage<T>
    where
        T: Send + 'static,
        F: FnMut(T) -> T + Send + 'static,
    {
        Box::new(move |seq: BoxSequence<T>| seq.map(f).boxed())
    }

    /// A truncation stage.
    pub fn take<T: Send + 'static>(n: usize) -> SequenceStage<T> {
        Box::new(move |seq: BoxSequence<T>| seq.take(n).boxed())
    }
}

/// Wires producers, channels, consumers, and sequences into running
/// pipelines on a [`Runtime`].
///
/// Obtained from [`Runtime::pipeline`]. The entry points block only
/// cooperatively, so a request handler may `block_on` them before producing
/// a response.
#[derive(Debug)]
pub struct PipelineRunner<'a> {
    runtime: &'a Runtime,
    capacity: Option<Capacity>,
}

/// Closes the channel when the producer terminates for any reason,
/// including cancellation mid-suspension.
struct CloseGuard<T> {
    channel: BoundedChannel<T>,
}

impl<T> Drop for CloseGuard<T> {
    fn drop(&mut self) {
        self.channel.close();
    }
}

impl<'a> PipelineRunner<'a> {
    pub(crate) fn new(runtime: &'a Runtime) -> Self {
        Self {
            runtime,
            capacity: None,
        }
    }

    /// Override the channel capacity used by
    /// [`run_fan_out`][PipelineRunner::run_fan_out] (defaults to the
    /// configured `default_channel_capacity`).
    pub fn channel_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Run one producer and a set of competing consumers over a single
    /// shared channel, under one task group.
    ///
    /// The producer writes into the channel; the consumers race for its
    /// values, each value going to exactly one of them. The channel is
    /// closed as soon as the producer terminates (success, failure, or
    /// cancellation), and a failing producer still lets the consumers drain
    /// whatever was buffered. A failing consumer cancels the whole group.
    /// The first failure (by spawn order, producer first) is returned.
    ///
    /// Pass every consumer the *same* channel, as this function does. The
    /// tempting refactor of re-wrapping a fresh channel around the producer
    /// per iteration loses the interleaving entirely: each wrapper then
    /// sees a private stream.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::{Arc, Mutex};
    /// use task_pipeline::{Config, Runtime};
    ///
    /// let runtime = Runtime::new(Config::new().worker_count(2));
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let sink = Arc::clone(&seen);
    /// let outcome = runtime.block_on(runtime.pipeline().run_fan_out(
    ///     |ch| async move {
    ///         for n in 0..5u32 {
    ///             ch.send(n).await?;
    ///         }
    ///         Ok(())
    ///     },
    ///     (0..2).map(move |_| {
    ///         let sink = Arc::clone(&sink);
    ///         move |ch: task_pipeline::BoundedChannel<u32>| async move {
    ///             while let Ok(n) = ch.recv().await {
    ///                 sink.lock().unwrap().push(n);
    ///             }
    ///             Ok(())
    ///         }
    ///     }),
    /// ));
    /// assert_eq!(outcome, Ok(()));
    ///
    /// let mut seen = seen.lock().unwrap().clone();
    /// seen.sort_unstable();
    /// assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    /// ```
    pub async fn run_fan_out<T, P, PF, C, CF>(
        &self,
        producer: P,
        consumers: impl IntoIterator<Item = C>,
    ) -> Result<()>
    where
        T: Send + 'static,
        P: FnOnce(BoundedChannel<T>) -> PF,
        PF: Future<Output = Result<()>> + Send + 'static,
        C: FnOnce(BoundedChannel<T>) -> CF,
        CF: Future<Output = Result<()>> + Send + 'static,
    {
        let capacity = self.capacity.unwrap_or(Capacity::Bounded(
            self.runtime.handle().default_channel_capacity(),
        ));
        let channel = BoundedChannel::with_capacity(capacity);
        let group = self.runtime.group();

        // A producer failure must not cancel the consumers: they are owed
        // whatever is already buffered. Its error is stashed on the side and
        // the producer task itself terminates cleanly.
        let producer_failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let stash = Arc::clone(&producer_failure);
        let guard = CloseGuard {
            channel: channel.clone(),
        };
        let produce = producer(channel.clone());
        group.spawn(async move {
            let result = produce.await;
            drop(guard);
            if let Err(err) = result {
                if err.is_cancelled() {
                    return Err(err);
                }
                tracing::debug!(error = %err, "producer failed; channel closed early");
                *stash.lock().unwrap() = Some(err);
            }
            Ok(())
        });

        let mut consumer_count = 0;
        for consumer in consumers {
            consumer_count += 1;
            let consume = consumer(channel.clone());
            group.spawn(consume);
        }
        tracing::debug!(consumers = consumer_count, ?capacity, "fan-out started");

        let joined = group.join_all().await;
        let stashed = producer_failure.lock().unwrap().take();
        match stashed {
            // Producer failure takes spawn-order priority.
            Some(err) => Err(err),
            None => joined,
        }
    }

    /// Drive a lazy sequence through a dynamically assembled stage chain on
    /// a worker task, handing each element to `consumer`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::{Arc, Mutex};
    /// use task_pipeline::runner::stage;
    /// use task_pipeline::seq::from_iter;
    /// use task_pipeline::{Config, Runtime};
    ///
    /// let runtime = Runtime::new(Config::new().worker_count(2));
    /// let out = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let sink = Arc::clone(&out);
    /// let outcome = runtime.block_on(runtime.pipeline().run_sequence_pipeline(
    ///     from_iter(1..),
    ///     vec![stage::map(|n: u32| n * 2), stage::take(3)],
    ///     move |n| sink.lock().unwrap().push(n),
    /// ));
    /// assert_eq!(outcome, Ok(()));
    /// assert_eq!(*out.lock().unwrap(), vec![2, 4, 6]);
    /// ```
    pub async fn run_sequence_pipeline<T, S, F>(
        &self,
        seq: S,
        stages: Vec<SequenceStage<T>>,
        consumer: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: LazySequence<Item = T> + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let mut chain = seq.boxed();
        for stage in stages {
            chain = stage(chain);
        }

        let group = self.runtime.group();
        group.spawn(async move { chain.collect(consumer).await });
        group.join_all().await
    }
}
