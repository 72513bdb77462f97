//! The closed set of failure kinds used across the crate.
//!
//! Failures are matched on explicitly rather than downcast: every operation
//! that can fail returns one of the kinds below, and callers dispatch with a
//! plain `match`.

use thiserror::Error;

/// A specialized `Result` type for pipeline operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The error kinds surfaced by tasks, channels, and sequences.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// A task body returned an error.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// A task observed cooperative cancellation at a suspension point.
    #[error("task cancelled")]
    TaskCancelled,

    /// A send was attempted on a closed channel, or a receive found the
    /// channel closed and fully drained.
    #[error("channel closed")]
    ChannelClosed,

    /// A non-blocking receive found no buffered value.
    #[error("channel empty")]
    ChannelEmpty,

    /// A lazy sequence generator failed and no `catch` stage absorbed it.
    #[error("sequence failed: {0}")]
    SequenceFailed(String),
}

impl Error {
    /// Create a [`Error::TaskFailed`] from any displayable cause.
    pub fn task(cause: impl core::fmt::Display) -> Self {
        Self::TaskFailed(cause.to_string())
    }

    /// Create a [`Error::SequenceFailed`] from any displayable cause.
    pub fn sequence(cause: impl core::fmt::Display) -> Self {
        Self::SequenceFailed(cause.to_string())
    }

    /// Whether this error is a cooperative-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::TaskCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_cause() {
        let err = Error::task("boom");
        assert_eq!(err.to_string(), "task failed: boom");
        assert!(!err.is_cancelled());
        assert!(Error::TaskCancelled.is_cancelled());
    }
}
