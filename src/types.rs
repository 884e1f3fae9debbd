//! Core types for scheduled-task futures

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for scheduling operations
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Scheduling errors
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The extended schedule pattern failed to parse or validate
    #[error("invalid schedule pattern {pattern:?}: {detail}")]
    InvalidPattern {
        /// The full pattern that was rejected
        pattern: String,
        /// What was wrong, naming the offending substring
        detail: String,
    },

    /// The schedule has been cancelled
    #[error("scheduling has been cancelled")]
    Cancelled,

    /// A timed wait elapsed before the next execution completed
    #[error("timed out waiting for completion of the next scheduled execution")]
    Timeout,

    /// The wait ended without the handle becoming done or cancelled
    #[error("wait interrupted before the next scheduled execution completed")]
    Interrupted,

    /// The most recent execution of the scheduled task failed
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ScheduleError {
    pub(crate) fn invalid_pattern(pattern: impl Into<String>, detail: impl Into<String>) -> Self {
        ScheduleError::InvalidPattern {
            pattern: pattern.into(),
            detail: detail.into(),
        }
    }
}

/// Failure of one execution of the user task.
///
/// Cloneable so that a single tick's error can be handed to every waiter
/// and listener, and re-raised by `get`/`last` without losing its cause
/// chain.
#[derive(Debug, Clone)]
pub struct TaskError(Arc<anyhow::Error>);

impl TaskError {
    /// Wrap a task failure.
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// Build a task error from a bare message (used when restoring a
    /// serialized terminal handle, where only the rendered chain survives).
    pub fn from_message(msg: impl Into<String>) -> Self {
        Self(Arc::new(anyhow::anyhow!(msg.into())))
    }

    /// The underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// The full error chain rendered as a single line, as carried on the
    /// wire by the terminal snapshot.
    pub fn rendered_chain(&self) -> String {
        format!("{:#}", self.0)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref().as_ref())
    }
}

/// Outcome of the most recently completed tick.
///
/// `Pending` before the first completion; afterwards exactly one of
/// `Ok`/`Err`, replaced wholesale on every completion.
#[derive(Debug, Clone, Default)]
pub enum TickOutcome<R> {
    /// No tick has completed yet
    #[default]
    Pending,
    /// The last tick returned a result
    Ok(R),
    /// The last tick failed
    Err(TaskError),
}

impl<R> TickOutcome<R> {
    /// True before the first tick completes.
    pub fn is_pending(&self) -> bool {
        matches!(self, TickOutcome::Pending)
    }
}

impl<R: Clone> TickOutcome<R> {
    /// Resolve into the `last()` contract: `None` before the first tick,
    /// the stored result, or the stored error re-raised.
    pub(crate) fn to_last(&self) -> Result<Option<R>> {
        match self {
            TickOutcome::Pending => Ok(None),
            TickOutcome::Ok(res) => Ok(Some(res.clone())),
            TickOutcome::Err(err) => Err(ScheduleError::Task(err.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_display() {
        let err = ScheduleError::invalid_pattern("{x} * * * * *", "invalid delay \"x\"");
        let msg = err.to_string();
        assert!(msg.contains("{x} * * * * *"));
        assert!(msg.contains("invalid delay"));
    }

    #[test]
    fn test_task_error_preserves_chain() {
        let cause = anyhow::anyhow!("connection refused").context("backend unreachable");
        let err = TaskError::new(cause);
        let rendered = err.rendered_chain();
        assert!(rendered.contains("backend unreachable"));
        assert!(rendered.contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_outcome_to_last() {
        let pending: TickOutcome<u32> = TickOutcome::Pending;
        assert_eq!(pending.to_last().unwrap(), None);

        let ok = TickOutcome::Ok(7u32);
        assert_eq!(ok.to_last().unwrap(), Some(7));

        let err: TickOutcome<u32> = TickOutcome::Err(TaskError::from_message("boom"));
        assert!(matches!(err.to_last(), Err(ScheduleError::Task(_))));
    }

    #[test]
    fn test_task_error_clones_share_cause() {
        let err = TaskError::from_message("boom");
        let clone = err.clone();
        assert_eq!(err.rendered_chain(), clone.rendered_chain());
    }
}
