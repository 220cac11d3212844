// src/dag/mod.rs

//! Tasks and the dependency graph that runs them.
//!
//! - [`task`] is the per-task state machine.
//! - [`process`] holds what a task actually does: parameter builder + runner.
//! - [`table`] is the arena owning every task of a graph.
//! - [`graph`] registers and wires tasks, checks acyclicity and propagates
//!   state changes.
//! - [`builder`] wires tasks by name, in any declaration order.

pub mod builder;
pub mod graph;
pub mod process;
pub mod table;
pub mod task;

pub use builder::TaskGraphBuilder;
pub use graph::{ROOT_TASK_NAME, TaskGraph, TaskSnapshot};
pub use process::{Dependencies, Dynamic, Params, RunFuture, TaskProcess};
pub use table::TaskTable;
pub use task::{GraphId, Task, TaskEvent, TaskId, TaskState};
