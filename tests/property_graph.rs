// tests/property_graph.rs

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use proptest::prelude::*;
use taskgraph::dag::{Task, TaskGraph, TaskState};
use taskgraph::engine::TaskQueue;
use taskgraph::errors::TaskGraphError;

use common::RunRecorder;

/// Dependency lists where task `i` only depends on tasks `0..i`, so the
/// generated graph is always acyclic.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), num_tasks)
            .prop_map(|raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            deps.into_iter().map(|d| d % i).collect()
                        }
                    })
                    .collect()
            })
    })
}

fn name(i: usize) -> String {
    format!("task_{i}")
}

fn build_graph(
    deps: &[BTreeSet<usize>],
    failing: &BTreeSet<usize>,
    recorder: &RunRecorder,
) -> TaskGraph {
    let mut graph = TaskGraph::new();
    let ids: Vec<_> = (0..deps.len())
        .map(|i| {
            let process = if failing.contains(&i) {
                recorder.failing_process(&name(i), Duration::ZERO)
            } else {
                recorder.process(&name(i), Duration::ZERO)
            };
            graph.add_task(Task::new(name(i), process)).unwrap()
        })
        .collect();
    for (i, task_deps) in deps.iter().enumerate() {
        for d in task_deps {
            graph.add_dependency(ids[i], ids[*d]).unwrap();
        }
    }
    graph
}

/// Tasks that fail: the failing ones plus everything downstream of them.
fn expected_failures(deps: &[BTreeSet<usize>], failing: &BTreeSet<usize>) -> BTreeSet<usize> {
    let mut failed = BTreeSet::new();
    for (i, task_deps) in deps.iter().enumerate() {
        if failing.contains(&i) || task_deps.iter().any(|d| failed.contains(d)) {
            failed.insert(i);
        }
    }
    failed
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn acyclic_graphs_always_empower(deps in dag_strategy(40)) {
        let recorder = RunRecorder::new();
        let mut graph = build_graph(&deps, &BTreeSet::new(), &recorder);
        prop_assert!(graph.empower().is_ok());
        prop_assert!(graph.tasks().all(|t| t.state() == TaskState::Initialized));
    }

    #[test]
    fn back_edge_is_always_rejected(
        deps in dag_strategy(20),
        pick in any::<(usize, usize)>(),
    ) {
        prop_assume!(deps.len() >= 2);
        // A path low -> ... -> high exists when high depends on low directly.
        let high = 1 + pick.0 % (deps.len() - 1);
        let low = pick.1 % high;
        let mut deps = deps;
        deps[high].insert(low);

        let recorder = RunRecorder::new();
        let mut graph = build_graph(&deps, &BTreeSet::new(), &recorder);
        let low_id = graph.task_id(&name(low)).unwrap();
        let high_id = graph.task_id(&name(high)).unwrap();
        graph.add_dependency(low_id, high_id).unwrap();

        match graph.empower() {
            Err(TaskGraphError::DagCycle(path)) => {
                prop_assert!(path.len() >= 3);
                prop_assert_eq!(path.first(), path.last());
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn execution_respects_dependencies_and_failures(
        deps in dag_strategy(25),
        failing_raw in proptest::collection::btree_set(0..25usize, 0..4),
        concurrency in 2..6usize,
    ) {
        let failing: BTreeSet<usize> =
            failing_raw.into_iter().filter(|i| *i < deps.len()).collect();
        let recorder = RunRecorder::new();
        let mut graph = build_graph(&deps, &failing, &recorder);
        graph.set_queue(TaskQueue::unlock_follower_priority(concurrency).unwrap());
        graph.empower().unwrap();

        let graph = block_on(async { graph.start().unwrap().wait().await }).unwrap();

        let failed = expected_failures(&deps, &failing);
        for i in 0..deps.len() {
            let task = graph.get_task(&name(i)).unwrap();
            if failed.contains(&i) {
                prop_assert!(task.is_failed(), "{} should fail", name(i));
                // Only tasks whose own runner fails are ever invoked.
                let upstream_failed = deps[i].iter().any(|d| failed.contains(d));
                let expected_runs = usize::from(failing.contains(&i) && !upstream_failed);
                prop_assert_eq!(recorder.runs(&name(i)), expected_runs);
            } else {
                prop_assert!(task.is_succeeded(), "{} should succeed", name(i));
                prop_assert_eq!(recorder.runs(&name(i)), 1);
            }
        }
        prop_assert!(recorder.max_overlap() <= concurrency);
        prop_assert_eq!(graph.outcome().unwrap().is_success(), failed.is_empty());

        // Start order never puts a task ahead of its dependencies.
        let started = recorder.started();
        let position = |i: usize| started.iter().position(|n| *n == name(i));
        for (i, task_deps) in deps.iter().enumerate() {
            if let Some(pos) = position(i) {
                for d in task_deps {
                    let dep_pos = position(*d);
                    prop_assert!(dep_pos.is_some_and(|p| p < pos));
                }
            }
        }
    }
}
