#![allow(dead_code)]

use taskgraph::dag::{Task, TaskGraph, TaskGraphBuilder, TaskProcess};
use taskgraph::engine::TaskQueue;

pub use taskgraph_test_utils::builders;
pub use taskgraph_test_utils::recorder::RunRecorder;
pub use taskgraph_test_utils::{init_tracing, with_timeout};

/// Task whose runner does nothing.
pub fn noop_task(name: &str) -> Task {
    Task::new(name, TaskProcess::new(|| async { Ok(()) }))
}

/// Build, attach `queue` and empower in one go.
pub fn ready_graph(builder: TaskGraphBuilder, queue: TaskQueue) -> TaskGraph {
    let mut graph = builder.into_graph().expect("graph wires");
    graph.set_queue(queue);
    graph.empower().expect("graph empowers");
    graph
}
