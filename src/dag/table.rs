// src/dag/table.rs

//! Arena of tasks owned by one graph.
//!
//! Slot 0 always holds the graph's join task; registered tasks follow in
//! insertion order. Edges between tasks are [`TaskId`]s into this table, so
//! the DAG can share nodes freely without owning pointers.

use std::ops::{Index, IndexMut};

use crate::dag::process::Dependencies;
use crate::dag::task::{GraphId, Task, TaskEvent, TaskId};
use crate::errors::Result;

#[derive(Debug)]
pub struct TaskTable {
    graph: GraphId,
    tasks: Vec<Task>,
}

impl TaskTable {
    pub(crate) fn new(graph: GraphId, root: Task) -> Self {
        Self {
            graph,
            tasks: vec![root],
        }
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Id of the join task that depends on every registered task.
    pub fn root(&self) -> TaskId {
        TaskId::new(self.graph, 0)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        id.graph() == self.graph && id.index() < self.tasks.len()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        if self.contains(id) {
            self.tasks.get(id.index())
        } else {
            None
        }
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        if self.contains(id) {
            self.tasks.get_mut(id.index())
        } else {
            None
        }
    }

    /// Number of registered tasks (the join task is not counted).
    pub fn len(&self) -> usize {
        self.tasks.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of arena slots, join task included.
    pub(crate) fn slots(&self) -> usize {
        self.tasks.len()
    }

    /// Ids of the registered tasks in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        (1..self.tasks.len()).map(|index| TaskId::new(self.graph, index))
    }

    pub(crate) fn push(&mut self, task: Task) -> TaskId {
        self.tasks.push(task);
        TaskId::new(self.graph, self.tasks.len() - 1)
    }

    pub fn is_terminal(&self, id: TaskId) -> bool {
        self.get(id).is_some_and(|task| task.state().is_terminal())
    }

    pub(crate) fn dependencies_of(&self, id: TaskId) -> Dependencies<'_> {
        Dependencies::new(
            self[id]
                .dependencies()
                .iter()
                .filter_map(|dep| self.get(*dep))
                .collect(),
        )
    }

    /// Re-run the dependency check of `id` against the current state of its
    /// dependencies.
    ///
    /// The parameter builder runs with shared access to the whole table; the
    /// resulting transition is applied afterwards.
    pub(crate) fn check_dependency_states(&mut self, id: TaskId) -> Result<Option<TaskEvent>> {
        let readiness = {
            let deps = self.dependencies_of(id);
            self[id].evaluate(&deps)?
        };
        self[id].settle(readiness)
    }

    /// Release the result of `id` once every follower is past building its
    /// parameters. Tasks without followers keep their result.
    pub(crate) fn check_follower_states(&mut self, id: TaskId) -> bool {
        let task = &self[id];
        if !task.is_succeeded() || task.followers().is_empty() {
            return false;
        }
        let all_consumed = task
            .followers()
            .iter()
            .all(|follower| self[*follower].state().is_past_params());

        all_consumed && self[id].release_result()
    }
}

impl Index<TaskId> for TaskTable {
    type Output = Task;

    /// Panics if `id` belongs to another graph. Ids are only handed out by
    /// the owning graph, so this indicates a programming error.
    fn index(&self, id: TaskId) -> &Task {
        assert_eq!(id.graph(), self.graph, "task id from another graph");
        &self.tasks[id.index()]
    }
}

impl IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut Task {
        assert_eq!(id.graph(), self.graph, "task id from another graph");
        &mut self.tasks[id.index()]
    }
}
