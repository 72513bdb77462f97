//! Structured concurrency pipelines: task groups, bounded channels, and
//! lazy sequences over a small cooperative worker pool.
//!
//! The library has four load-bearing pieces and one piece of glue:
//!
//! - [`TaskHandle`]: a cancellable, awaitable unit of concurrent work.
//! - [`TaskGroup`]: a parent scope whose first child failure cancels the
//!   remaining children; no task outlives its group's
//!   [`join_all`][TaskGroup::join_all].
//! - [`BoundedChannel`]: a FIFO hand-off queue with blocking backpressure,
//!   competing consumers, and drain-then-fail close semantics.
//! - [`seq::LazySequence`]: cold, pull-driven sequences with `map`, `take`,
//!   `combine`, and `catch`, executed only by `collect`.
//! - [`PipelineRunner`]: wires a producer, a channel, and competing
//!   consumers under one group, or drives a sequence chain on a worker.
//!
//! Everything runs on an explicit [`Runtime`]: a fixed pool of worker
//! threads multiplexing cooperative tasks, a timer thread, and an explicit
//! root scope for detached work. There is no ambient global scope. The
//! only suspension points are channel send/receive, [`delay`],
//! [`yield_now`], and awaiting a task, and cancellation is observed exactly
//! there.
//!
//! # Examples
//!
//! Spawn a group of tasks and join them:
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use task_pipeline::{delay, Config, Runtime};
//!
//! let runtime = Runtime::new(Config::new().worker_count(2));
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! let group = runtime.group();
//! for _ in 0..8 {
//!     let counter = Arc::clone(&counter);
//!     group.spawn(async move {
//!         delay(Duration::from_millis(1)).await;
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     });
//! }
//! runtime.block_on(group.join_all()).unwrap();
//! assert_eq!(counter.load(Ordering::SeqCst), 8);
//! ```
//!
//! Hand values from a producer to a consumer with backpressure:
//!
//! ```rust
//! use futures_lite::future::{block_on, zip};
//! use task_pipeline::BoundedChannel;
//!
//! let ch = BoundedChannel::bounded(0); // rendezvous
//! let (_, seen) = block_on(zip(
//!     async {
//!         for n in [1, 2, 3] {
//!             ch.send(n).await.unwrap();
//!         }
//!         ch.close();
//!     },
//!     async {
//!         let mut seen = Vec::new();
//!         while let Ok(n) = ch.recv().await {
//!             seen.push(n);
//!         }
//!         seen
//!     },
//! ));
//! assert_eq!(seen, vec![1, 2, 3]);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_debug_implementations, nonstandard_style)]
#![warn(missing_docs, unreachable_pub)]

mod channel;
mod config;
mod error;
pub mod runner;
mod runtime;
pub mod seq;
mod task;

pub use channel::{BoundedChannel, Capacity, RecvFuture, SendFuture};
pub use config::{Config, DetachedFailures};
pub use error::{Error, Result};
pub use runner::PipelineRunner;
pub use runtime::{delay, yield_now, Delay, Runtime, YieldNow};
pub use task::{TaskGroup, TaskHandle, TaskId, TaskState};

/// The task pipeline prelude.
pub mod prelude {
    pub use crate::seq::LazySequence as _;

    pub use crate::{delay, yield_now};
    pub use crate::{BoundedChannel, Capacity};
    pub use crate::{Config, Error, Result, Runtime};
    pub use crate::{TaskGroup, TaskHandle, TaskState};
}
