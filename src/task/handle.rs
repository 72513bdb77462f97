use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};
use crate::task::cancel::CancelToken;

/// Unique identifier of a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task. Terminal states are final; there is no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Spawned but not yet polled for the first time.
    Pending,
    /// Currently executing or suspended at a suspension point.
    Running,
    /// The body returned successfully.
    Completed,
    /// The body returned an error.
    Failed,
    /// Cooperative cancellation was observed before completion.
    Cancelled,
}

impl TaskState {
    /// Whether this state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct Shared<T> {
    state: TaskState,
    value: Option<T>,
    error: Option<Error>,
    waiters: Vec<Waker>,
}

/// State cell shared between a [`TaskHandle`], the driver future that runs
/// the body, and the owning group.
pub(crate) struct HandleInner<T> {
    id: TaskId,
    token: Arc<CancelToken>,
    shared: Mutex<Shared<T>>,
}

impl<T> HandleInner<T> {
    pub(crate) fn new(id: TaskId, token: Arc<CancelToken>) -> Arc<Self> {
        Arc::new(Self {
            id,
            token,
            shared: Mutex::new(Shared {
                state: TaskState::Pending,
                value: None,
                error: None,
                waiters: Vec::new(),
            }),
        })
    }

    pub(crate) fn set_running(&self) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state == TaskState::Pending {
            shared.state = TaskState::Running;
        }
    }

    /// Record the terminal outcome and wake everything waiting on it.
    pub(crate) fn finish(&self, outcome: Result<T>) {
        let waiters = {
            let mut shared = self.shared.lock().unwrap();
            if shared.state.is_terminal() {
                return;
            }
            match outcome {
                Ok(value) => {
                    shared.state = TaskState::Completed;
                    shared.value = Some(value);
                }
                Err(Error::TaskCancelled) => {
                    shared.state = TaskState::Cancelled;
                    shared.error = Some(Error::TaskCancelled);
                }
                Err(err) => {
                    shared.state = TaskState::Failed;
                    shared.error = Some(err);
                }
            }
            std::mem::take(&mut shared.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Type-erased view of a child task, used by the group for joining.
pub(crate) trait ChildProbe: Send + Sync {
    /// Ready once the task has reached a terminal state.
    fn poll_terminal(&self, cx: &mut Context<'_>) -> Poll<()>;
    fn state(&self) -> TaskState;
    fn failure(&self) -> Option<Error>;
}

impl<T: Send> ChildProbe for HandleInner<T> {
    fn poll_terminal(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.state.is_terminal() {
            Poll::Ready(())
        } else {
            shared.waiters.push(cx.waker().clone());
            Poll::Pending
        }
    }

    fn state(&self) -> TaskState {
        self.shared.lock().unwrap().state
    }

    fn failure(&self) -> Option<Error> {
        let shared = self.shared.lock().unwrap();
        match shared.state {
            TaskState::Failed => shared.error.clone(),
            _ => None,
        }
    }
}

/// A cancellable, awaitable unit of concurrent work.
///
/// Awaiting the handle suspends the caller until the task reaches a terminal
/// state and yields the task's result. Awaiting a failed task propagates its
/// error to the awaiting caller only; it does *not* cancel siblings, which
/// is [`TaskGroup::join_all`][crate::TaskGroup::join_all]'s job.
///
/// # Example
///
/// ```rust
/// use task_pipeline::{Config, Runtime};
///
/// let runtime = Runtime::new(Config::new());
/// let group = runtime.group();
/// let handle = group.spawn(async { Ok(21u32 * 2) });
/// assert_eq!(runtime.block_on(handle), Ok(42));
/// ```
#[must_use = "a TaskHandle reports the task's outcome; await or cancel it"]
pub struct TaskHandle<T> {
    inner: Arc<HandleInner<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(inner: Arc<HandleInner<T>>) -> Self {
        Self { inner }
    }

    /// The task's unique id.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.inner.shared.lock().unwrap().state
    }

    /// Request cooperative cancellation.
    ///
    /// The task observes the request at its next suspension point (channel
    /// send/receive, `delay`, `yield_now`, or awaiting another task); a body
    /// mid-computation is not interrupted. Cancelling an already-terminal
    /// task has no effect.
    pub fn cancel(&self) {
        self.inner.token.set();
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.inner.shared.lock().unwrap();
        match shared.state {
            TaskState::Pending | TaskState::Running => {
                shared.waiters.push(cx.waker().clone());
                Poll::Pending
            }
            TaskState::Completed => match shared.value.take() {
                Some(value) => Poll::Ready(Ok(value)),
                None => Poll::Ready(Err(Error::TaskFailed(
                    "task result already consumed".into(),
                ))),
            },
            TaskState::Failed | TaskState::Cancelled => Poll::Ready(Err(shared
                .error
                .clone()
                .unwrap_or(Error::TaskCancelled))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn handle_reports_terminal_outcome() {
        let token = CancelToken::new();
        let inner = HandleInner::new(TaskId::next(), token);
        inner.set_running();
        inner.finish(Ok(5u8));

        let handle = TaskHandle::new(Arc::clone(&inner));
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(block_on(handle), Ok(5));
    }

    #[test]
    fn terminal_states_are_final() {
        let token = CancelToken::new();
        let inner = HandleInner::new(TaskId::next(), token);
        inner.finish(Err(Error::task("first")));
        inner.finish(Ok(1u8));

        let handle = TaskHandle::new(inner);
        assert_eq!(handle.state(), TaskState::Failed);
        assert_eq!(block_on(handle), Err(Error::task("first")));
    }

    #[test]
    fn cancellation_maps_to_cancelled_state() {
        let token = CancelToken::new();
        let inner = HandleInner::new(TaskId::next(), token);
        inner.finish(Err::<u8, _>(Error::TaskCancelled));
        assert_eq!(TaskHandle::new(inner).state(), TaskState::Cancelled);
    }
}
