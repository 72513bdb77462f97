//! Tasks, handles, and structured task groups.
//!
//! A [`TaskGroup`] is the unit of structured concurrency: tasks are spawned
//! under a group, the group's [`join_all`][TaskGroup::join_all] waits for
//! all of them, the first failure cancels the rest, and no task outlives the
//! join. A [`TaskHandle`] is the awaitable, cancellable view of one task.

pub(crate) mod cancel;
pub(crate) mod group;
pub(crate) mod handle;

pub use group::TaskGroup;
pub use handle::{TaskHandle, TaskId, TaskState};

pub(crate) use group::FailureRoute;
