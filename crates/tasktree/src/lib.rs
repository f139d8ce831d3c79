//! Tasktree Core
//!
//! This crate provides an in-process task pool including:
//! - Cooperative pause/resume/stop signalling (`TaskHandle`)
//! - Hierarchical tasks with parent/child completion coupling
//! - Schedule-driven readiness
//! - A dispatch loop over a bounded worker pool with idle self-stop
//! - Listener callbacks for every status transition

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod future;
pub mod handle;
pub mod listener;
pub mod pool;
pub mod schedule;
pub mod task;

pub use config::{ConfigError, PoolConfig};
pub use future::{FutureState, TaskFuture};
pub use handle::TaskHandle;
pub use listener::TaskListener;
pub use pool::{PoolStats, TaskPool};
pub use schedule::{At, Every, Schedule};
pub use task::{Task, TaskId, TaskStatus};

/// Task and pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// No task with this id is registered in the pool
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The task's schedule has not come due yet
    #[error("Task not ready: {0}")]
    NotReady(TaskId),

    /// The task's handle was force-stopped
    #[error("Task terminated{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Terminated {
        /// Reason passed to `stop`, if any
        reason: Option<String>,
    },

    /// Operation requires a running task
    #[error("Task {id} is not running (status: {status})")]
    NotRunning {
        /// Task id
        id: TaskId,
        /// Status observed when the operation was rejected
        status: TaskStatus,
    },

    /// Task has not begun executing
    #[error("Task {0} has not started")]
    NotStarted(TaskId),

    /// Task body reported a failure
    #[error("Task failed: {0}")]
    Failed(String),

    /// Task body panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Worker pool no longer accepts jobs
    #[error("Worker pool is shut down")]
    PoolShutdown,
}

impl TaskError {
    /// Build a `Failed` error from any displayable message
    pub fn failed(message: impl std::fmt::Display) -> Self {
        TaskError::Failed(message.to_string())
    }

    /// Whether this is the cooperative termination signal
    pub fn is_terminated(&self) -> bool {
        matches!(self, TaskError::Terminated { .. })
    }
}

/// Task operation result
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_display() {
        let err = TaskError::Terminated { reason: None };
        assert_eq!(err.to_string(), "Task terminated");

        let err = TaskError::Terminated {
            reason: Some("shutdown".to_string()),
        };
        assert_eq!(err.to_string(), "Task terminated: shutdown");
        assert!(err.is_terminated());
    }

    #[test]
    fn test_failed_helper() {
        let err = TaskError::failed("disk full");
        assert_eq!(err, TaskError::Failed("disk full".to_string()));
        assert!(!err.is_terminated());
    }
}
