// src/dag/task.rs

//! Per-task state machine.
//!
//! ```text
//! Created -> Initialized -> Ready -> Running -> Done
//!                 \           \         \
//!                  +-----------+---------+--> Error
//! ```
//!
//! Every transition returns a [`TaskEvent`]. The owning graph feeds those
//! events to dependents, the queue and external observers; a task never
//! reaches into other tasks itself.

use std::any::{Any, type_name};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::dag::process::{Dependencies, Dynamic, Params, RunFuture, TaskProcess};
use crate::engine::TaskName;
use crate::errors::{Result, TaskFailure, TaskGraphError};

/// Identity of a [`TaskGraph`](crate::dag::TaskGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    /// Allocate a process-unique graph id.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a task inside one graph's arena.
///
/// Ids are tagged with their graph, so an id from another graph never
/// resolves to the wrong task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    graph: GraphId,
    index: usize,
}

impl TaskId {
    pub(crate) fn new(graph: GraphId, index: usize) -> Self {
        Self { graph, index }
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskState {
    Created,
    Initialized,
    Ready,
    Running,
    Done,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Error)
    }

    /// Whether a task in this state will never again read its dependencies'
    /// results (it already built its parameters, or it never will).
    pub fn is_past_params(self) -> bool {
        matches!(
            self,
            TaskState::Ready | TaskState::Running | TaskState::Done | TaskState::Error
        )
    }

    fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Created, Initialized)
                | (Initialized, Ready)
                | (Ready, Running)
                | (Running, Done)
                | (Initialized | Ready | Running, Error)
        )
    }
}

/// State-change notification emitted by every transition.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Initialized,
    Ready,
    Running,
    Done,
    Error(TaskFailure),
}

impl TaskEvent {
    pub fn state(&self) -> TaskState {
        match self {
            TaskEvent::Initialized => TaskState::Initialized,
            TaskEvent::Ready => TaskState::Ready,
            TaskEvent::Running => TaskState::Running,
            TaskEvent::Done => TaskState::Done,
            TaskEvent::Error(_) => TaskState::Error,
        }
    }
}

/// Outcome of evaluating a task's dependencies, computed with shared access
/// and applied afterwards with [`Task::settle`].
pub(crate) enum Readiness {
    /// Task already failed; nothing to do.
    Skip,
    /// At least one dependency has not finished.
    Pending,
    Ready(Option<Params>),
    BuilderFailed(anyhow::Error),
}

/// A named unit of work and its lifecycle.
#[derive(Debug)]
pub struct Task {
    name: TaskName,
    state: TaskState,
    process: TaskProcess,
    params: Option<Params>,
    result: Option<Dynamic>,
    released: bool,
    error: Option<TaskFailure>,
    dependencies: Vec<TaskId>,
    followers: Vec<TaskId>,
    graph: Option<GraphId>,
}

impl Task {
    pub fn new(name: impl Into<TaskName>, process: TaskProcess) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Created,
            process,
            params: None,
            result: None,
            released: false,
            error: None,
            dependencies: Vec::new(),
            followers: Vec::new(),
            graph: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Graph this task was initialized against, if any.
    pub fn graph(&self) -> Option<GraphId> {
        self.graph
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn followers(&self) -> &[TaskId] {
        &self.followers
    }

    pub fn error(&self) -> Option<&TaskFailure> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Error
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == TaskState::Done
    }

    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    pub fn assert_state(&self, expected: TaskState) -> Result<()> {
        if self.state != expected {
            return Err(TaskGraphError::InvalidState {
                task: self.name.clone(),
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Borrow the typed result. Only available while `Done` and before the
    /// result has been released.
    pub fn result<T: Any>(&self) -> Result<&T> {
        self.assert_state(TaskState::Done)?;
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| TaskGraphError::ResultReleased(self.name.clone()))?;
        result
            .downcast_ref::<T>()
            .ok_or_else(|| TaskGraphError::ResultType {
                task: self.name.clone(),
                expected: type_name::<T>(),
            })
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// Whether the result was discarded because every follower consumed it.
    pub fn is_result_released(&self) -> bool {
        self.released
    }

    /// Borrow the built parameters. They exist from `Ready` until the runner
    /// takes them.
    pub fn params<T: Any>(&self) -> Option<&T> {
        self.params.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    /// `Created -> Initialized`: bind the task to its owning graph.
    pub fn initialize(&mut self, graph: GraphId) -> Result<TaskEvent> {
        self.assert_state(TaskState::Created)?;
        self.graph = Some(graph);
        self.transition(TaskState::Initialized)?;
        Ok(TaskEvent::Initialized)
    }

    /// `Initialized -> Ready` once every dependency in `deps` is `Done`.
    ///
    /// Returns `None` while a dependency is still pending, or when the task
    /// has already failed.
    pub fn check_dependency_states(
        &mut self,
        deps: &Dependencies<'_>,
    ) -> Result<Option<TaskEvent>> {
        let readiness = self.evaluate(deps)?;
        self.settle(readiness)
    }

    pub(crate) fn evaluate(&self, deps: &Dependencies<'_>) -> Result<Readiness> {
        if self.is_failed() {
            return Ok(Readiness::Skip);
        }
        self.assert_state(TaskState::Initialized)?;

        if !deps.all_succeeded() {
            return Ok(Readiness::Pending);
        }

        Ok(match self.process.build_params(deps) {
            None => Readiness::Ready(None),
            Some(Ok(params)) => Readiness::Ready(Some(params)),
            Some(Err(err)) => Readiness::BuilderFailed(err),
        })
    }

    pub(crate) fn settle(&mut self, readiness: Readiness) -> Result<Option<TaskEvent>> {
        match readiness {
            Readiness::Skip | Readiness::Pending => Ok(None),
            Readiness::Ready(params) => {
                self.params = params;
                self.transition(TaskState::Ready)?;
                Ok(Some(TaskEvent::Ready))
            }
            Readiness::BuilderFailed(err) => {
                warn!(task = %self.name, error = %err, "parameter builder failed");
                let failure = TaskFailure::new(self.name.clone(), err);
                self.fail(failure)
            }
        }
    }

    /// `Ready -> Running`: hand the runner its parameters.
    ///
    /// A task that already failed yields `Ok(None)`; any other state than
    /// `Ready` is a usage error.
    pub fn begin_run(&mut self) -> Result<Option<RunFuture>> {
        if self.is_failed() {
            return Ok(None);
        }
        self.assert_state(TaskState::Ready)?;

        let params = self.params.take();
        let future = self.process.launch(params).ok_or_else(|| {
            TaskGraphError::Other(anyhow::anyhow!(
                "runner of task '{}' was already consumed",
                self.name
            ))
        })?;

        self.transition(TaskState::Running)?;
        info!(task = %self.name, "task started");
        Ok(Some(future))
    }

    /// `Running -> Done | Error` with the runner's outcome.
    pub fn finish_run(&mut self, outcome: anyhow::Result<Dynamic>) -> Result<TaskEvent> {
        self.assert_state(TaskState::Running)?;

        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.transition(TaskState::Done)?;
                info!(task = %self.name, "task done");
                Ok(TaskEvent::Done)
            }
            Err(err) => {
                warn!(task = %self.name, error = %format!("{err:#}"), "task runner failed");
                let failure = TaskFailure::new(self.name.clone(), err);
                // Running -> Error is always legal, so this yields an event.
                Ok(self
                    .fail(failure.clone())?
                    .unwrap_or(TaskEvent::Error(failure)))
            }
        }
    }

    /// Move to `Error`, dropping parameters and result.
    ///
    /// A task enters `Error` at most once; later calls return `None`.
    pub fn fail(&mut self, failure: TaskFailure) -> Result<Option<TaskEvent>> {
        if self.is_failed() {
            return Ok(None);
        }
        self.transition(TaskState::Error)?;
        self.params = None;
        self.result = None;
        self.error = Some(failure.clone());
        Ok(Some(TaskEvent::Error(failure)))
    }

    /// Drop the result once nobody can read it anymore.
    pub(crate) fn release_result(&mut self) -> bool {
        if self.state != TaskState::Done || self.result.is_none() {
            return false;
        }
        self.result = None;
        self.released = true;
        debug!(task = %self.name, "released result; all followers consumed it");
        true
    }

    pub(crate) fn push_dependency(&mut self, dependency: TaskId) -> bool {
        if self.dependencies.contains(&dependency) {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    pub(crate) fn push_follower(&mut self, follower: TaskId) {
        if !self.followers.contains(&follower) {
            self.followers.push(follower);
        }
    }

    fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TaskGraphError::InvalidTransition {
                task: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        debug!(task = %self.name, from = ?self.state, to = ?next, "task state transition");
        self.state = next;
        Ok(())
    }
}
