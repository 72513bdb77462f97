use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::config::DetachedFailures;
use crate::error::Result;
use crate::runtime::{Handle, Timeout};
use crate::task::cancel::{CancelToken, Cancellable};
use crate::task::handle::{ChildProbe, HandleInner, TaskHandle, TaskId, TaskState};

/// Where a task's failure is routed when its body returns an error.
pub(crate) enum FailureRoute {
    /// Record in the owning group and cancel the siblings.
    Group,
    /// Detached task: invoke the configured policy.
    Detached(DetachedFailures),
}

struct ChildEntry {
    id: TaskId,
    probe: Arc<dyn ChildProbe>,
}

pub(crate) struct GroupInner {
    token: Arc<CancelToken>,
    /// Whether the first child failure cancels the remaining children.
    /// True for user groups, false for the runtime's root scope.
    cancel_on_failure: bool,
    children: Mutex<Vec<ChildEntry>>,
}

impl GroupInner {
    /// Called by a failing child's driver. The token's unset-to-set edge
    /// fires exactly once, so sibling cancellation happens exactly once.
    fn fail_fast(&self) {
        if self.cancel_on_failure {
            self.token.set();
        }
    }

    /// Drop bookkeeping for terminal children, so a long-lived group (the
    /// runtime's root scope in particular) does not grow without bound.
    /// Failed entries in a joining group are kept: `join_all` still has to
    /// report them.
    fn reap(&self) {
        let keep_failures = self.cancel_on_failure;
        self.children.lock().unwrap().retain(|entry| {
            !entry.probe.state().is_terminal()
                || (keep_failures && entry.probe.failure().is_some())
        });
    }
}

/// A parent scope for concurrent tasks.
///
/// Every task spawned on a group stays owned by it until
/// [`join_all`][TaskGroup::join_all] has seen it reach a terminal state: no
/// task outlives its group's join. The first child failure cancels all other
/// children (current and subsequently spawned, transitively through child
/// groups), and `join_all` surfaces that failure.
///
/// Cloning a group is cheap and shares the same scope, which is how a task
/// spawns nested work under the group that owns it.
///
/// # Example
///
/// ```rust
/// use task_pipeline::{Config, Runtime};
///
/// let runtime = Runtime::new(Config::new().worker_count(2));
/// let group = runtime.group();
/// for n in 0..4u32 {
///     group.spawn(async move { Ok(n) });
/// }
/// runtime.block_on(group.join_all()).unwrap();
/// ```
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
    handle: Handle,
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("children", &self.inner.children.lock().unwrap().len())
            .field("cancelled", &self.inner.token.is_set())
            .finish()
    }
}

impl TaskGroup {
    pub(crate) fn new(handle: Handle, cancel_on_failure: bool) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                token: CancelToken::new(),
                cancel_on_failure,
                children: Mutex::new(Vec::new()),
            }),
            handle,
        }
    }

    pub(crate) fn cancel_token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.inner.token)
    }

    /// Spawn `body` as a child of this group and return its handle.
    ///
    /// Returns immediately; the body runs on the worker pool. The body may
    /// clone the group and spawn nested tasks under it, or create a
    /// [`child`][TaskGroup::child] group of its own.
    pub fn spawn<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.spawn_routed(body, FailureRoute::Group)
    }

    pub(crate) fn spawn_routed<T, F>(&self, body: F, route: FailureRoute) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.inner.reap();

        let id = TaskId::next();
        let token = CancelToken::new();
        self.inner.token.attach_child(Arc::clone(&token));

        let inner = HandleInner::new(id, Arc::clone(&token));
        self.inner
            .children
            .lock()
            .unwrap()
            .push(ChildEntry {
                id,
                probe: Arc::clone(&inner) as Arc<dyn ChildProbe>,
            });

        let body: Pin<Box<dyn Future<Output = Result<T>> + Send>> =
            match self.handle.task_timeout() {
                Some(deadline) => Box::pin(Timeout::new(body, deadline)),
                None => Box::pin(body),
            };
        let guarded = Cancellable::new(token, body);

        let group = Arc::clone(&self.inner);
        let cell = Arc::clone(&inner);
        self.handle.spawn_raw(async move {
            cell.set_running();
            let outcome = guarded.await;
            if let Err(err) = &outcome {
                if err.is_cancelled() {
                    tracing::debug!(task = %id, "task cancelled");
                } else {
                    match &route {
                        FailureRoute::Group => {
                            tracing::debug!(task = %id, error = %err, "task failed");
                            group.fail_fast();
                        }
                        FailureRoute::Detached(DetachedFailures::Handler(handler)) => {
                            tracing::debug!(task = %id, error = %err, "detached task failed");
                            handler(err);
                        }
                        FailureRoute::Detached(DetachedFailures::Fatal) => {
                            tracing::error!(task = %id, error = %err, "detached task failed");
                            std::process::abort();
                        }
                    }
                }
            }
            cell.finish(outcome);
        });

        TaskHandle::new(inner)
    }

    /// Create a group nested under this one.
    ///
    /// Cancelling the parent cancels the child group and everything in it;
    /// the child group is joined by whoever created it.
    pub fn child(&self) -> TaskGroup {
        let child = TaskGroup::new(self.handle.clone(), true);
        self.inner.token.attach_child(child.cancel_token());
        child
    }

    /// Request cancellation of every current and subsequently spawned child.
    pub fn cancel(&self) {
        self.inner.token.set();
    }

    /// Whether cancellation has been requested for this group.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_set()
    }

    /// Wait until every child has reached a terminal state, then report the
    /// group's outcome.
    ///
    /// If one or more children failed, the failure of the first-*spawned*
    /// failing child is returned; the siblings were already cancelled at the
    /// moment the first failure happened. Any further failures are not lost
    /// silently: they are downgraded to `warn` logs.
    pub async fn join_all(self) -> Result<()> {
        self.wait_all().await;

        let children = self.inner.children.lock().unwrap();
        let mut first = None;
        for entry in children.iter() {
            if let Some(err) = entry.probe.failure() {
                if first.is_none() {
                    first = Some(err);
                } else {
                    tracing::warn!(
                        task = %entry.id,
                        error = %err,
                        "secondary failure superseded by first failure",
                    );
                }
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait until no tracked child (including ones appended or reaped while
    /// waiting) remains in a non-terminal state. Does not consume the group.
    pub(crate) async fn wait_all(&self) {
        loop {
            let probe = {
                let children = self.inner.children.lock().unwrap();
                children
                    .iter()
                    .find(|entry| !entry.probe.state().is_terminal())
                    .map(|entry| Arc::clone(&entry.probe))
            };
            match probe {
                Some(probe) => {
                    futures_lite::future::poll_fn(|cx| probe.poll_terminal(cx)).await;
                }
                None => break,
            }
        }
    }

    /// Snapshot of the tracked children's states, in spawn order.
    ///
    /// Terminal children may already have been reaped by a later spawn.
    pub fn child_states(&self) -> Vec<TaskState> {
        self.inner
            .children
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.probe.state())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::runtime::Runtime;

    #[test]
    fn terminal_children_are_reaped_by_later_spawns() {
        let runtime = Runtime::new(Config::new().worker_count(1));
        let group = runtime.group();
        for n in 0..8u32 {
            let handle = group.spawn(async move { Ok(n) });
            assert_eq!(runtime.block_on(handle), Ok(n));
        }

        let parked = group.spawn(async {
            futures_lite::future::pending::<crate::error::Result<()>>().await
        });
        assert!(group.inner.children.lock().unwrap().len() <= 2);

        parked.cancel();
        assert_eq!(runtime.block_on(group.join_all()), Ok(()));
    }

    #[test]
    fn failed_children_survive_reaping_until_join() {
        let runtime = Runtime::new(Config::new().worker_count(1));
        let group = runtime.group();

        let failing = group.spawn::<(), _>(async { Err(Error::task("kept")) });
        assert_eq!(runtime.block_on(failing), Err(Error::task("kept")));

        // The next spawn reaps terminal bookkeeping but must keep the
        // failure around for join_all to report. The group is already
        // cancelled, so the late child never runs.
        let late = group.spawn::<(), _>(async { Ok(()) });
        assert_eq!(runtime.block_on(late), Err(Error::TaskCancelled));
        assert_eq!(
            runtime.block_on(group.join_all()),
            Err(Error::task("kept"))
        );
    }
}
