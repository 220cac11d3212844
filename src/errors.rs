// src/errors.rs

//! Crate-wide error types.
//!
//! Two families live here:
//! - [`TaskGraphError`]: usage errors (programming mistakes such as duplicate
//!   names or cycles). These abort the offending call.
//! - [`TaskFailure`]: computation errors produced by a task's parameter
//!   builder or runner. These are recorded on the task and propagated to its
//!   followers; they never abort the scheduler.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dag::TaskState;
use crate::engine::TaskName;

#[derive(Error, Debug)]
pub enum TaskGraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("duplicate task name: {0}")]
    DuplicateTask(TaskName),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskName),

    #[error("task '{task}' expected state {expected:?}, got {actual:?}")]
    InvalidState {
        task: TaskName,
        expected: TaskState,
        actual: TaskState,
    },

    #[error("task '{task}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task: TaskName,
        from: TaskState,
        to: TaskState,
    },

    #[error("task '{task}' references a task outside of this graph")]
    ForeignDependency { task: TaskName },

    #[error("Cycle detected in DAG: {}", .0.join(" -> "))]
    DagCycle(Vec<TaskName>),

    #[error("result of task '{0}' was released after all followers consumed it")]
    ResultReleased(TaskName),

    #[error("result of task '{task}' is not a {expected}")]
    ResultType {
        task: TaskName,
        expected: &'static str,
    },

    #[error("queue concurrency must be >= 2 (got {0}); compose tasks serially instead")]
    InvalidConcurrency(usize),

    #[error("queue has already been started")]
    QueueAlreadyStarted,

    #[error("no queue attached to the graph; call set_queue before start")]
    QueueNotSet,

    #[error("graph must be empowered before it can start")]
    NotEmpowered,

    #[error("graph stalled: {0} task(s) never settled and nothing is running")]
    Stalled(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskGraphError>;

/// Failure of a task's parameter builder or runner.
///
/// The same failure value is handed to every transitive follower, so `origin`
/// always names the task whose own work failed.
#[derive(Clone)]
pub struct TaskFailure {
    origin: TaskName,
    error: Arc<anyhow::Error>,
}

impl TaskFailure {
    pub fn new(origin: impl Into<TaskName>, error: anyhow::Error) -> Self {
        Self {
            origin: origin.into(),
            error: Arc::new(error),
        }
    }

    /// Name of the task whose builder or runner produced the error.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("origin", &self.origin)
            .field("error", &format_args!("{:#}", self.error))
            .finish()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' failed: {:#}", self.origin, self.error)
    }
}

impl std::error::Error for TaskFailure {}
