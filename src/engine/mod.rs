// src/engine/mod.rs

//! Execution engine for task graphs.
//!
//! This module ties together:
//! - the bounded [`TaskQueue`] that admits ready tasks under a concurrency
//!   limit
//! - the pluggable [`DispatchPolicy`] deciding which ready task goes next
//! - the async [`Runtime`] that owns a started graph, spawns runners and
//!   feeds their outcomes back into the graph
//!
//! The graph and queue are plain synchronous state machines; only the
//! runtime touches Tokio.

use crate::dag::TaskEvent;
use crate::errors::TaskFailure;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// How a graph run ended once every task is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOutcome {
    /// Every task reached `Done`.
    Succeeded,
    /// At least one task ended in `Error`. Lists every failed task, in
    /// registration order, including followers that failed by propagation.
    Failed { failed: Vec<TaskName> },
}

impl GraphOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GraphOutcome::Succeeded)
    }
}

/// Notifications published by a graph to its subscribers.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A registered task changed state.
    Task { task: TaskName, event: TaskEvent },
    /// A runner failed, or a task could not be launched. Dispatch goes on.
    RunnerFailed { task: TaskName, failure: TaskFailure },
    /// Every task reached `Done`. Published at most once.
    Done,
    /// Every task is `Done` or `Error`. Published exactly once per run.
    Settled(GraphOutcome),
}

pub mod policy;
pub mod queue;
pub mod runtime;

pub use policy::{DispatchPolicy, Fifo, ReleaseMemoryPriority, UnlockFollowerPriority};
pub use queue::{QueueState, TaskQueue};
pub use runtime::{GraphRun, Runtime};
