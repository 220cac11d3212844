// src/dag/graph.rs

//! Task graph: registration, wiring, activation and event propagation.
//!
//! The graph owns every task in a [`TaskTable`]. A synthetic join task sits
//! in slot 0 and depends on every registered task; when it becomes ready the
//! graph is done.
//!
//! All bookkeeping is synchronous. Transitions return [`TaskEvent`]s which
//! [`TaskGraph::propagate`] drains from a worklist, so a failure has reached
//! every transitive follower before the next runner completion is handled.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::process::{Dynamic, RunFuture, TaskProcess};
use crate::dag::table::TaskTable;
use crate::dag::task::{GraphId, Task, TaskEvent, TaskId, TaskState};
use crate::engine::{GraphEvent, GraphOutcome, GraphRun, TaskName, TaskQueue};
use crate::errors::{Result, TaskFailure, TaskGraphError};

/// Name of the join task. Never registered, so it cannot clash.
pub const ROOT_TASK_NAME: &str = "<root>";

type DoneListener = Box<dyn FnOnce() + Send>;

/// Read-only view of one registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub name: TaskName,
    pub state: TaskState,
    pub dependencies: Vec<TaskName>,
}

pub struct TaskGraph {
    tasks: TaskTable,
    names: HashMap<TaskName, TaskId>,
    queue: Option<TaskQueue>,
    empowered: bool,
    done_fired: bool,
    terminal: usize,
    outcome: Option<GraphOutcome>,
    done_listeners: Vec<DoneListener>,
    subscribers: Vec<mpsc::UnboundedSender<GraphEvent>>,
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("id", &self.id())
            .field("tasks", &self.tasks.len())
            .field("queue", &self.queue)
            .field("empowered", &self.empowered)
            .field("done_fired", &self.done_fired)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        let id = GraphId::new();
        let root = Task::new(ROOT_TASK_NAME, TaskProcess::noop());
        Self {
            tasks: TaskTable::new(id, root),
            names: HashMap::new(),
            queue: None,
            empowered: false,
            done_fired: false,
            terminal: 0,
            outcome: None,
            done_listeners: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.tasks.graph()
    }

    /// Register a task under its name and make the join task depend on it.
    ///
    /// Fails on a duplicate name, on a task that already left `Created`, and
    /// once the graph has been empowered.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        if self.names.contains_key(task.name()) {
            return Err(TaskGraphError::DuplicateTask(task.name().to_string()));
        }
        task.assert_state(TaskState::Created)?;
        let root = self.tasks.root();
        self.tasks[root].assert_state(TaskState::Created)?;

        let name = task.name().to_string();
        let id = self.tasks.push(task);
        self.tasks[root].push_dependency(id);
        debug!(task = %name, "task registered");
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn get_task(&self, name: &str) -> Result<&Task> {
        let id = self.task_id(name)?;
        Ok(&self.tasks[id])
    }

    pub fn task_id(&self, name: &str) -> Result<TaskId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| TaskGraphError::TaskNotFound(name.to_string()))
    }

    /// Task behind `id`, if it is registered in this graph.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        if id == self.tasks.root() {
            return None;
        }
        self.tasks.get(id)
    }

    /// Registered tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.tasks.ids().map(|id| &self.tasks[id])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Make `task` wait for `dependency`. Both must still be `Created`.
    ///
    /// Adding the same edge twice is a no-op.
    pub fn add_dependency(&mut self, task: TaskId, dependency: TaskId) -> Result<()> {
        let task_name = self.registered_name(task)?;
        if !self.is_registered(dependency) {
            return Err(TaskGraphError::ForeignDependency { task: task_name });
        }
        self.tasks[task].assert_state(TaskState::Created)?;
        self.tasks[dependency].assert_state(TaskState::Created)?;

        if task == dependency {
            return Err(TaskGraphError::DagCycle(vec![task_name.clone(), task_name]));
        }

        if self.tasks[task].push_dependency(dependency) {
            self.tasks[dependency].push_follower(task);
            debug!(
                task = %task_name,
                dependency = %self.tasks[dependency].name(),
                "dependency added"
            );
        }
        Ok(())
    }

    /// Attach the queue that will run this graph's tasks.
    pub fn set_queue(&mut self, queue: TaskQueue) {
        self.queue = Some(queue);
    }

    pub fn queue(&self) -> Option<&TaskQueue> {
        self.queue.as_ref()
    }

    /// Initialize every task against this graph and check the graph is a DAG.
    ///
    /// Validation happens before any task changes state, so a rejected graph
    /// is left untouched. A graph is empowered once.
    pub fn empower(&mut self) -> Result<()> {
        let root = self.tasks.root();
        self.tasks[root].assert_state(TaskState::Created)?;

        self.verify_references()?;
        if let Some(cycle) = self.find_cycle() {
            return Err(TaskGraphError::DagCycle(cycle));
        }

        let graph = self.id();
        let ids: Vec<TaskId> = self.tasks.ids().collect();
        for id in ids {
            let event = self.tasks[id].initialize(graph)?;
            self.publish_task_event(id, event);
        }
        self.tasks[root].initialize(graph)?;
        self.empowered = true;

        info!(tasks = self.tasks.len(), "graph empowered");
        Ok(())
    }

    pub fn is_empowered(&self) -> bool {
        self.empowered
    }

    /// Receive every [`GraphEvent`] published from now on.
    ///
    /// Each subscriber gets its own unbounded channel, so nothing is lost
    /// when the receiver is drained only after the run.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GraphEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Run `callback` once every task is `Done`.
    ///
    /// Registered after the fact, it runs immediately. It never runs for a
    /// graph in which some task failed.
    pub fn on_done<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.done_fired {
            callback();
        } else {
            self.done_listeners.push(Box::new(callback));
        }
    }

    pub fn is_done(&self) -> bool {
        self.done_fired
    }

    /// Hand the graph to a runtime on the current Tokio runtime.
    pub fn start(self) -> Result<GraphRun> {
        if self.queue.is_none() {
            return Err(TaskGraphError::QueueNotSet);
        }
        if !self.empowered {
            return Err(TaskGraphError::NotEmpowered);
        }
        Ok(GraphRun::spawn(self))
    }

    /// How the run ended, once every task is terminal.
    pub fn outcome(&self) -> Option<&GraphOutcome> {
        self.outcome.as_ref()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks()
            .map(|task| TaskSnapshot {
                name: task.name().to_string(),
                state: task.state(),
                dependencies: task
                    .dependencies()
                    .iter()
                    .map(|dep| self.tasks[*dep].name().to_string())
                    .collect(),
            })
            .collect()
    }

    pub fn table(&self) -> &TaskTable {
        &self.tasks
    }

    pub(crate) fn table_mut(&mut self) -> &mut TaskTable {
        &mut self.tasks
    }

    /// Run the first dependency check on every task and start the queue.
    pub(crate) fn activate(&mut self) -> Result<()> {
        if !self.empowered {
            return Err(TaskGraphError::NotEmpowered);
        }

        let ids: Vec<TaskId> = self.tasks.ids().collect();
        for id in ids {
            if let Some(event) = self.tasks.check_dependency_states(id)? {
                self.propagate(id, event)?;
            }
        }
        let root = self.tasks.root();
        if self.tasks[root].state() == TaskState::Initialized {
            if let Some(event) = self.tasks.check_dependency_states(root)? {
                self.propagate(root, event)?;
            }
        }

        self.queue
            .as_mut()
            .ok_or(TaskGraphError::QueueNotSet)?
            .start()?;
        self.maybe_settle();
        Ok(())
    }

    /// Take every task the queue admits and hand out their runner futures.
    pub(crate) fn dispatch(&mut self) -> Result<Vec<(TaskId, RunFuture)>> {
        let mut launched = Vec::new();
        loop {
            let admitted = self
                .queue
                .as_mut()
                .ok_or(TaskGraphError::QueueNotSet)?
                .admit(&self.tasks);
            if admitted.is_empty() {
                break;
            }

            for id in admitted {
                match self.tasks[id].begin_run() {
                    Ok(Some(future)) => {
                        self.publish_task_event(id, TaskEvent::Running);
                        launched.push((id, future));
                    }
                    Ok(None) => self.release_slot(),
                    Err(err) => {
                        self.release_slot();
                        let failure =
                            TaskFailure::new(self.tasks[id].name(), anyhow::Error::new(err));
                        self.report_runner_failure(id, &failure);
                        if let Some(event) = self.tasks[id].fail(failure)? {
                            self.propagate(id, event)?;
                        }
                    }
                }
            }
        }
        self.maybe_settle();
        Ok(launched)
    }

    /// Feed a runner's outcome back into the graph.
    pub(crate) fn complete(&mut self, id: TaskId, outcome: anyhow::Result<Dynamic>) -> Result<()> {
        self.release_slot();
        let event = self.tasks[id].finish_run(outcome)?;
        if let TaskEvent::Error(failure) = &event {
            self.report_runner_failure(id, failure);
        }
        self.propagate(id, event)?;
        self.maybe_settle();
        Ok(())
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Registered tasks that are neither `Done` nor `Error`.
    pub(crate) fn unsettled_count(&self) -> usize {
        self.tasks.len() - self.terminal
    }

    /// Drain the consequences of one transition.
    ///
    /// - `Ready`: enqueue the task; its dependencies may release their result.
    /// - `Done`: followers and the join task re-check their dependencies.
    /// - `Error`: every follower fails with the same failure; dependencies
    ///   may release their result.
    fn propagate(&mut self, id: TaskId, event: TaskEvent) -> Result<()> {
        let root = self.tasks.root();
        let mut work = VecDeque::from([(id, event)]);

        while let Some((id, event)) = work.pop_front() {
            if id == root {
                if matches!(event, TaskEvent::Ready) {
                    self.fire_done();
                }
                continue;
            }
            self.publish_task_event(id, event.clone());

            match event {
                TaskEvent::Initialized | TaskEvent::Running => {}
                TaskEvent::Ready => {
                    if let Some(queue) = self.queue.as_mut() {
                        queue.push(id);
                    }
                    self.release_consumed(id);
                }
                TaskEvent::Done => {
                    self.terminal += 1;
                    self.tasks.check_follower_states(id);

                    let followers = self.tasks[id].followers().to_vec();
                    for follower in followers {
                        if let Some(next) = self.tasks.check_dependency_states(follower)? {
                            work.push_back((follower, next));
                        }
                    }
                    if self.tasks[root].state() == TaskState::Initialized {
                        if let Some(next) = self.tasks.check_dependency_states(root)? {
                            work.push_back((root, next));
                        }
                    }
                }
                TaskEvent::Error(failure) => {
                    self.terminal += 1;
                    self.release_consumed(id);

                    let followers = self.tasks[id].followers().to_vec();
                    for follower in followers {
                        if let Some(next) = self.tasks[follower].fail(failure.clone())? {
                            debug!(
                                task = %self.tasks[follower].name(),
                                origin = %failure.origin(),
                                "dependency failed; failing follower"
                            );
                            work.push_back((follower, next));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Give each dependency of `id` the chance to drop its result.
    fn release_consumed(&mut self, id: TaskId) {
        let dependencies = self.tasks[id].dependencies().to_vec();
        for dependency in dependencies {
            self.tasks.check_follower_states(dependency);
        }
    }

    fn fire_done(&mut self) {
        if self.done_fired {
            return;
        }
        self.done_fired = true;
        info!(tasks = self.tasks.len(), "all tasks done");
        self.publish(GraphEvent::Done);
        for listener in self.done_listeners.drain(..) {
            listener();
        }
    }

    fn maybe_settle(&mut self) {
        if self.outcome.is_some() || self.terminal < self.tasks.len() {
            return;
        }

        let failed: Vec<TaskName> = self
            .tasks()
            .filter(|task| task.is_failed())
            .map(|task| task.name().to_string())
            .collect();
        let outcome = if failed.is_empty() {
            GraphOutcome::Succeeded
        } else {
            warn!(failed = ?failed, "graph settled with failures");
            GraphOutcome::Failed { failed }
        };

        info!(?outcome, "graph settled");
        self.publish(GraphEvent::Settled(outcome.clone()));
        self.outcome = Some(outcome);
    }

    fn report_runner_failure(&mut self, id: TaskId, failure: &TaskFailure) {
        let task = self.tasks[id].name().to_string();
        warn!(task = %task, error = %failure, "runner failed; dispatch continues");
        self.publish(GraphEvent::RunnerFailed {
            task,
            failure: failure.clone(),
        });
    }

    fn release_slot(&mut self) {
        if let Some(queue) = self.queue.as_mut() {
            queue.finish();
        }
    }

    fn publish_task_event(&mut self, id: TaskId, event: TaskEvent) {
        let task = self.tasks[id].name().to_string();
        self.publish(GraphEvent::Task { task, event });
    }

    fn publish(&mut self, event: GraphEvent) {
        // Receivers that were dropped unsubscribe.
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn is_registered(&self, id: TaskId) -> bool {
        self.tasks.contains(id) && id != self.tasks.root()
    }

    fn registered_name(&self, id: TaskId) -> Result<TaskName> {
        if !self.is_registered(id) {
            return Err(TaskGraphError::TaskNotFound(format!("{id:?}")));
        }
        Ok(self.tasks[id].name().to_string())
    }

    fn verify_references(&self) -> Result<()> {
        for id in self.tasks.ids() {
            let task = &self.tasks[id];
            let foreign = task
                .dependencies()
                .iter()
                .chain(task.followers())
                .any(|other| !self.is_registered(*other));
            if foreign {
                return Err(TaskGraphError::ForeignDependency {
                    task: task.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Iterative three-color DFS along dependency edges.
    ///
    /// Returns the names on the first cycle found, starting and ending with
    /// the same task.
    fn find_cycle(&self) -> Option<Vec<TaskName>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color = vec![Color::White; self.tasks.slots()];
        for start in self.tasks.ids() {
            if color[start.index()] != Color::White {
                continue;
            }
            color[start.index()] = Color::Gray;
            let mut stack: Vec<(TaskId, usize)> = vec![(start, 0)];

            while let Some(&(id, cursor)) = stack.last() {
                let Some(&dep) = self.tasks[id].dependencies().get(cursor) else {
                    color[id.index()] = Color::Black;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                match color[dep.index()] {
                    Color::White => {
                        color[dep.index()] = Color::Gray;
                        stack.push((dep, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|(on_path, _)| *on_path == dep)?;
                        let mut cycle: Vec<TaskName> = stack[from..]
                            .iter()
                            .map(|(on_path, _)| self.tasks[*on_path].name().to_string())
                            .collect();
                        cycle.push(self.tasks[dep].name().to_string());
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }
}
