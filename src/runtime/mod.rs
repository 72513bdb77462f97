//! The cooperative worker-pool runtime.
//!
//! Tasks are plain futures multiplexed over a small pool of worker threads:
//! execution is parallel across workers and cooperative within a task. The
//! only suspension points are channel send/receive, [`delay`], [`yield_now`],
//! and awaiting a [`TaskHandle`][crate::TaskHandle]; nothing in this crate
//! blocks a worker thread outside of those.

pub(crate) mod context;
mod runnable;
mod timer;
mod yield_now;

pub use timer::{delay, Delay};
pub use yield_now::{yield_now, YieldNow};

pub(crate) use timer::Timeout;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::config::Config;
use crate::error::Result;
use crate::runner::PipelineRunner;
use crate::task::{FailureRoute, TaskGroup, TaskHandle};
use runnable::Runnable;
use timer::{TimerCommand, TimerEntry};

pub(crate) enum Message {
    Run(Arc<Runnable>),
    Shutdown,
}

/// Cheap handle for scheduling work and registering timers.
#[derive(Clone)]
pub(crate) struct Handle {
    injector: Sender<Message>,
    timer: Sender<TimerCommand>,
    config: Config,
}

impl Handle {
    pub(crate) fn spawn_raw<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runnable = Runnable::new(future, self.injector.clone());
        runnable.enqueue();
    }

    pub(crate) fn register_timer(&self, entry: TimerEntry) {
        let _ = self.timer.send(TimerCommand::Register(entry));
    }

    pub(crate) fn task_timeout(&self) -> Option<Duration> {
        self.config.task_timeout
    }

    pub(crate) fn default_channel_capacity(&self) -> usize {
        self.config.default_channel_capacity
    }
}

fn worker_loop(queue: Receiver<Message>) {
    tracing::debug!("worker started");
    for message in queue.iter() {
        match message {
            Message::Run(task) => task.run(),
            Message::Shutdown => break,
        }
    }
    tracing::debug!("worker stopped");
}

/// A worker pool plus the process-wide root scope.
///
/// The runtime owns everything with a thread in it: `worker_count` workers
/// and one timer thread. It also owns the explicit root [`TaskGroup`] that
/// detached tasks run under; [`shutdown`][Runtime::shutdown] (or drop)
/// cancels that scope, drains it, and joins all threads. There is no
/// implicit ambient scope.
///
/// # Example
///
/// ```rust
/// use task_pipeline::{Config, Runtime};
///
/// let runtime = Runtime::new(Config::new().worker_count(2));
/// let group = runtime.group();
/// let handle = group.spawn(async { Ok("hello") });
/// assert_eq!(runtime.block_on(handle), Ok("hello"));
/// runtime.shutdown();
/// ```
pub struct Runtime {
    handle: Handle,
    root: TaskGroup,
    workers: Vec<thread::JoinHandle<()>>,
    timer: Option<thread::JoinHandle<()>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl Runtime {
    /// Start a runtime with `config.worker_count` workers and a timer thread.
    pub fn new(config: Config) -> Self {
        let (injector, queue) = crossbeam_channel::unbounded();
        let (timer_tx, timer_rx) = crossbeam_channel::unbounded();

        let handle = Handle {
            injector,
            timer: timer_tx,
            config,
        };

        let workers = (0..handle.config.worker_count)
            .map(|index| {
                let queue = queue.clone();
                let handle = handle.clone();
                thread::Builder::new()
                    .name(format!("pipeline-worker-{index}"))
                    .spawn(move || context::enter(handle, || worker_loop(queue)))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        let timer = thread::Builder::new()
            .name("pipeline-timer".into())
            .spawn(move || timer::timer_loop(timer_rx))
            .expect("failed to spawn timer thread");

        // The root scope: failures of detached tasks are routed by policy,
        // never by sibling cancellation.
        let root = TaskGroup::new(handle.clone(), false);

        Self {
            handle,
            root,
            workers,
            timer: Some(timer),
        }
    }

    /// Create a fresh [`TaskGroup`] under the root scope.
    pub fn group(&self) -> TaskGroup {
        let group = TaskGroup::new(self.handle.clone(), true);
        self.root.cancel_token().attach_child(group.cancel_token());
        group
    }

    /// Spawn a detached (fire-and-forget) task under the root scope.
    ///
    /// No group join will ever surface this task's failure, so it is routed
    /// by [`Config::on_detached_failure`]: to the registered handler, or,
    /// by default, logged and treated as process-fatal. The returned handle
    /// can still be awaited or cancelled like any other.
    pub fn spawn_detached<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let policy = self.handle.config.detached_failures.clone();
        self.root.spawn_routed(body, FailureRoute::Detached(policy))
    }

    /// Drive `future` to completion on the calling thread.
    ///
    /// The synchronous entry point for external callers such as request
    /// handlers: the calling thread parks cooperatively, worker threads keep
    /// running. The runtime context is entered so [`delay`] works inside
    /// `future` itself.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        context::enter(self.handle.clone(), || {
            futures_lite::future::block_on(future)
        })
    }

    /// A [`PipelineRunner`] wired to this runtime.
    pub fn pipeline(&self) -> PipelineRunner<'_> {
        PipelineRunner::new(self)
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Cancel the root scope, drain it, and join all threads.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        tracing::debug!("runtime shutting down");

        // Teardown of the explicit root scope: cancel, then drain.
        self.root.cancel();
        self.block_on(self.root.wait_all());

        for _ in 0..self.workers.len() {
            let _ = self.handle.injector.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        let _ = self.handle.timer.send(TimerCommand::Shutdown);
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
