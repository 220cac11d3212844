// src/engine/policy.rs

//! Dispatch policies: which pending task the queue admits next.
//!
//! Priority policies re-score the whole pending set on every call. Follower
//! and dependency states change between selections, so any ordering computed
//! earlier may already be stale.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::dag::{TaskId, TaskTable};

/// Strategy used by [`TaskQueue`](crate::engine::TaskQueue) to pick the next
/// task among those waiting for a concurrency slot.
pub trait DispatchPolicy: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Position in `pending` of the task to admit next, or `None` to admit
    /// nothing.
    fn take(&mut self, pending: &VecDeque<TaskId>, tasks: &TaskTable) -> Option<usize>;
}

/// Strict arrival order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fifo;

impl DispatchPolicy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn take(&mut self, pending: &VecDeque<TaskId>, _tasks: &TaskTable) -> Option<usize> {
        if pending.is_empty() { None } else { Some(0) }
    }
}

/// Prefers tasks whose completion most likely lets a dependency's result be
/// released right afterwards.
///
/// Score: sum over the task's dependencies of `1 / n`, where `n` counts that
/// dependency's followers that are not yet terminal. The candidate itself is
/// one of them, so `n` is the number of other outstanding followers plus one
/// and never zero for a pending task. Terminal tasks score 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseMemoryPriority;

impl ReleaseMemoryPriority {
    pub fn score(tasks: &TaskTable, id: TaskId) -> f64 {
        let task = &tasks[id];
        if task.state().is_terminal() {
            return 0.0;
        }

        task.dependencies()
            .iter()
            .map(|dep| {
                let outstanding = tasks[*dep]
                    .followers()
                    .iter()
                    .filter(|follower| !tasks.is_terminal(**follower))
                    .count();
                if outstanding == 0 {
                    0.0
                } else {
                    1.0 / outstanding as f64
                }
            })
            .sum()
    }
}

impl DispatchPolicy for ReleaseMemoryPriority {
    fn name(&self) -> &'static str {
        "release-memory"
    }

    fn take(&mut self, pending: &VecDeque<TaskId>, tasks: &TaskTable) -> Option<usize> {
        first_max(pending, |id| Self::score(tasks, id))
    }
}

/// Prefers tasks that unblock the largest downstream subtree.
///
/// Score: `1 +` the summed scores of all followers, recursively. Terminal
/// tasks score 0. Scores are memoized within a single selection only.
///
/// The score counts downstream paths, which grows exponentially in layered
/// diamonds, so sums saturate at `u64::MAX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlockFollowerPriority;

impl UnlockFollowerPriority {
    pub fn score(tasks: &TaskTable, id: TaskId) -> u64 {
        Self::weight(tasks, id, &mut HashMap::new())
    }

    fn weight(tasks: &TaskTable, id: TaskId, memo: &mut HashMap<TaskId, u64>) -> u64 {
        if let Some(weight) = memo.get(&id) {
            return *weight;
        }

        let task = &tasks[id];
        let weight = if task.state().is_terminal() {
            0
        } else {
            task.followers()
                .iter()
                .map(|follower| Self::weight(tasks, *follower, memo))
                .fold(1_u64, u64::saturating_add)
        };

        memo.insert(id, weight);
        weight
    }
}

impl DispatchPolicy for UnlockFollowerPriority {
    fn name(&self) -> &'static str {
        "unlock-follower"
    }

    fn take(&mut self, pending: &VecDeque<TaskId>, tasks: &TaskTable) -> Option<usize> {
        let mut memo = HashMap::new();
        first_max(pending, |id| Self::weight(tasks, id, &mut memo))
    }
}

/// Position of the first maximal score in scan order.
fn first_max<S, F>(pending: &VecDeque<TaskId>, mut score: F) -> Option<usize>
where
    S: PartialOrd,
    F: FnMut(TaskId) -> S,
{
    let mut best: Option<(usize, S)> = None;
    for (pos, id) in pending.iter().enumerate() {
        let s = score(*id);
        if best.as_ref().is_none_or(|(_, top)| s > *top) {
            best = Some((pos, s));
        }
    }
    best.map(|(pos, _)| pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Task, TaskGraph, TaskProcess};
    use crate::errors::TaskFailure;
    use anyhow::anyhow;

    fn task(name: &str) -> Task {
        Task::new(name, TaskProcess::new(|| async { Ok(()) }))
    }

    /// x has five followers, y has none.
    fn fan_out() -> (TaskGraph, TaskId, TaskId) {
        let mut graph = TaskGraph::new();
        let x = graph.add_task(task("x")).unwrap();
        let y = graph.add_task(task("y")).unwrap();
        for i in 0..5 {
            let f = graph.add_task(task(&format!("f{i}"))).unwrap();
            graph.add_dependency(f, x).unwrap();
        }
        (graph, x, y)
    }

    #[test]
    fn fifo_takes_front() {
        let (graph, x, y) = fan_out();
        let pending = VecDeque::from([y, x]);
        assert_eq!(Fifo.take(&pending, graph.table()), Some(0));
        assert_eq!(Fifo.take(&VecDeque::new(), graph.table()), None);
    }

    #[test]
    fn unlock_follower_scores_subtree() {
        let (graph, x, y) = fan_out();
        assert_eq!(UnlockFollowerPriority::score(graph.table(), x), 6);
        assert_eq!(UnlockFollowerPriority::score(graph.table(), y), 1);

        let pending = VecDeque::from([y, x]);
        assert_eq!(
            UnlockFollowerPriority.take(&pending, graph.table()),
            Some(1)
        );
    }

    #[test]
    fn unlock_follower_counts_diamond_paths() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task("a")).unwrap();
        let b = graph.add_task(task("b")).unwrap();
        let c = graph.add_task(task("c")).unwrap();
        let d = graph.add_task(task("d")).unwrap();
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, a).unwrap();
        graph.add_dependency(d, b).unwrap();
        graph.add_dependency(d, c).unwrap();

        // d is reachable through both b and c.
        assert_eq!(UnlockFollowerPriority::score(graph.table(), a), 5);
    }

    #[test]
    fn terminal_tasks_score_zero() {
        let (mut graph, x, y) = fan_out();
        graph.empower().unwrap();
        graph
            .table_mut()
            .get_mut(x)
            .unwrap()
            .fail(TaskFailure::new("x", anyhow!("boom")))
            .unwrap();

        assert_eq!(UnlockFollowerPriority::score(graph.table(), x), 0);
        assert_eq!(ReleaseMemoryPriority::score(graph.table(), x), 0.0);

        let pending = VecDeque::from([x, y]);
        assert_eq!(
            UnlockFollowerPriority.take(&pending, graph.table()),
            Some(1)
        );
    }

    #[test]
    fn release_memory_prefers_last_outstanding_follower() {
        let mut graph = TaskGraph::new();
        let shared = graph.add_task(task("shared")).unwrap();
        let lonely = graph.add_task(task("lonely")).unwrap();
        let s1 = graph.add_task(task("s1")).unwrap();
        let s2 = graph.add_task(task("s2")).unwrap();
        let only = graph.add_task(task("only")).unwrap();
        graph.add_dependency(s1, shared).unwrap();
        graph.add_dependency(s2, shared).unwrap();
        graph.add_dependency(only, lonely).unwrap();

        let table = graph.table();
        assert_eq!(ReleaseMemoryPriority::score(table, s1), 0.5);
        assert_eq!(ReleaseMemoryPriority::score(table, only), 1.0);
        assert_eq!(ReleaseMemoryPriority::score(table, shared), 0.0);

        let pending = VecDeque::from([s1, s2, only]);
        assert_eq!(ReleaseMemoryPriority.take(&pending, table), Some(2));
    }

    #[test]
    fn unlock_follower_saturates_on_deep_lattice() {
        // 70 layers of two tasks, each depending on both tasks of the layer
        // above: the path count doubles per layer.
        let mut graph = TaskGraph::new();
        let mut previous: Vec<TaskId> = Vec::new();
        let mut top = Vec::new();
        for layer in 0..70 {
            let current: Vec<TaskId> = (0..2)
                .map(|i| graph.add_task(task(&format!("l{layer}_{i}"))).unwrap())
                .collect();
            for id in &current {
                for dep in &previous {
                    graph.add_dependency(*id, *dep).unwrap();
                }
            }
            if layer == 0 {
                top = current.clone();
            }
            previous = current;
        }

        let table = graph.table();
        assert_eq!(UnlockFollowerPriority::score(table, top[0]), u64::MAX);
        let last = previous[0];
        assert_eq!(UnlockFollowerPriority::score(table, last), 1);

        let pending = VecDeque::from([last, top[1]]);
        assert_eq!(UnlockFollowerPriority.take(&pending, table), Some(1));
    }

    #[test]
    fn ties_resolve_to_scan_order() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task("a")).unwrap();
        let b = graph.add_task(task("b")).unwrap();
        let pending = VecDeque::from([b, a]);
        assert_eq!(ReleaseMemoryPriority.take(&pending, graph.table()), Some(0));
        assert_eq!(UnlockFollowerPriority.take(&pending, graph.table()), Some(0));
    }
}
