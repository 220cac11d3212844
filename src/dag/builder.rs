// src/dag/builder.rs

//! Name-based graph construction.
//!
//! [`TaskGraph::add_dependency`] wants ids of registered tasks, which forces
//! callers to register tasks in dependency order. The builder records edges
//! by name and wires them all in [`TaskGraphBuilder::into_graph`], so tasks
//! and their dependencies can be declared in any order.

use tracing::debug;

use crate::config::ConfigFile;
use crate::dag::graph::TaskGraph;
use crate::dag::process::TaskProcess;
use crate::dag::task::{Task, TaskId};
use crate::engine::TaskName;
use crate::errors::Result;
use crate::exec::command_process;

#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    graph: TaskGraph,
    /// `(task, dependency)` pairs in declaration order.
    edges: Vec<(TaskName, TaskName)>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// One shell-command task per `[task.<name>]`, wired by `after`.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut builder = Self::new();
        for (name, task) in cfg.task.iter() {
            builder.add_task_process(
                name.as_str(),
                command_process(name.as_str(), task.cmd.as_str()),
                task.after.iter().cloned(),
            )?;
        }
        Ok(builder)
    }

    pub fn add_task_process<I, S>(
        &mut self,
        name: impl Into<TaskName>,
        process: TaskProcess,
        dependencies: I,
    ) -> Result<TaskId>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.add_task(Task::new(name, process), dependencies)
    }

    pub fn add_task<I, S>(&mut self, task: Task, dependencies: I) -> Result<TaskId>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        let name = task.name().to_string();
        let id = self.graph.add_task(task)?;
        self.add_dependencies(name, dependencies);
        Ok(id)
    }

    /// Declare that `name` waits for `dependencies`. Neither side has to be
    /// registered yet; repeated calls append.
    pub fn add_dependencies<I, S>(&mut self, name: impl Into<TaskName>, dependencies: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        let name = name.into();
        self.edges.extend(
            dependencies
                .into_iter()
                .map(|dep| (name.clone(), dep.into())),
        );
        self
    }

    pub fn get_task(&self, name: &str) -> Result<&Task> {
        self.graph.get_task(name)
    }

    /// Resolve every recorded edge and hand out the graph.
    ///
    /// Fails with `TaskNotFound` if either side of an edge was never
    /// registered.
    pub fn into_graph(self) -> Result<TaskGraph> {
        let Self { mut graph, edges } = self;
        for (task, dependency) in edges {
            let task_id = graph.task_id(&task)?;
            let dependency_id = graph.task_id(&dependency)?;
            graph.add_dependency(task_id, dependency_id)?;
        }
        debug!(tasks = graph.len(), "graph built");
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TaskGraphError;

    fn noop() -> TaskProcess {
        TaskProcess::new(|| async { Ok(()) })
    }

    #[test]
    fn dependencies_may_be_declared_before_tasks() {
        let mut builder = TaskGraphBuilder::new();
        builder.add_dependencies("c", ["b"]);
        builder.add_task_process("c", noop(), ["a"]).unwrap();
        builder.add_task_process("b", noop(), Vec::<String>::new()).unwrap();
        builder.add_task_process("a", noop(), Vec::<String>::new()).unwrap();
        assert_eq!(builder.get_task("b").unwrap().name(), "b");

        let graph = builder.into_graph().unwrap();
        let c = graph.get_task("c").unwrap();
        let deps: Vec<&str> = c
            .dependencies()
            .iter()
            .map(|id| graph.task(*id).unwrap().name())
            .collect();
        assert_eq!(deps, vec!["b", "a"]);
    }

    #[test]
    fn unknown_dependency_fails_on_build() {
        let mut builder = TaskGraphBuilder::new();
        builder.add_task_process("a", noop(), ["ghost"]).unwrap();
        assert!(matches!(
            builder.into_graph(),
            Err(TaskGraphError::TaskNotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn duplicate_task_is_rejected_immediately() {
        let mut builder = TaskGraphBuilder::new();
        builder.add_task_process("a", noop(), ["b"]).unwrap();
        assert!(matches!(
            builder.add_task_process("a", noop(), Vec::<String>::new()),
            Err(TaskGraphError::DuplicateTask(_))
        ));
    }
}
