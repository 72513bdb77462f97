//! Runtime configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;

/// What to do with the failure of a detached task.
///
/// Detached tasks have no group whose `join_all` could surface their error,
/// so their failures must go *somewhere*: either to a registered handler or
/// down with the whole process. Silent dropping is not an option.
#[derive(Clone, Default)]
pub enum DetachedFailures {
    /// Log the failure and abort the process.
    #[default]
    Fatal,
    /// Invoke the handler with the failure.
    Handler(Arc<dyn Fn(&Error) + Send + Sync>),
}

impl fmt::Debug for DetachedFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => f.write_str("Fatal"),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Configuration for a [`Runtime`][crate::Runtime].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use task_pipeline::Config;
///
/// let config = Config::new()
///     .worker_count(2)
///     .default_channel_capacity(8)
///     .task_timeout(Duration::from_secs(5));
/// assert_eq!(config.worker_count, 2);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Number of parallel worker threads.
    pub worker_count: usize,
    /// Capacity used by the runner when no explicit channel bound is given.
    pub default_channel_capacity: usize,
    /// Optional per-task deadline; a task exceeding it is cancelled.
    pub task_timeout: Option<Duration>,
    /// Routing for failures of detached (ungrouped) tasks.
    pub detached_failures: DetachedFailures,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 4,
            default_channel_capacity: 16,
            task_timeout: None,
            detached_failures: DetachedFailures::default(),
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads. Clamped to at least one.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the default channel capacity used by the pipeline runner.
    pub fn default_channel_capacity(mut self, capacity: usize) -> Self {
        self.default_channel_capacity = capacity;
        self
    }

    /// Set a deadline applied to every spawned task.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Route detached task failures to `handler` instead of aborting.
    pub fn on_detached_failure(
        mut self,
        handler: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.detached_failures = DetachedFailures::Handler(Arc::new(handler));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_never_zero() {
        let config = Config::new().worker_count(0);
        assert_eq!(config.worker_count, 1);
    }
}
