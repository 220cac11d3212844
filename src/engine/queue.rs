// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::dag::{TaskId, TaskTable};
use crate::engine::policy::{DispatchPolicy, Fifo, ReleaseMemoryPriority, UnlockFollowerPriority};
use crate::errors::{Result, TaskGraphError};
use crate::types::Priority;

/// Whether the queue hands out tasks yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Accepting pushes, not dispatching.
    Initialized,
    /// Dispatching whenever a slot is free.
    Running,
}

/// Bounded admission queue for tasks that became runnable.
///
/// Semantics:
/// - `push` records a ready task; nothing runs until `start`.
/// - While running, [`admit`](Self::admit) keeps taking tasks through the
///   configured [`DispatchPolicy`] until `concurrency` tasks are outstanding.
/// - [`finish`](Self::finish) frees a slot. Callers re-admit after every push
///   and every finish, which makes dispatch level-triggered.
///
/// A concurrency of 1 is rejected: serial execution should be expressed as a
/// dependency chain instead.
#[derive(Debug)]
pub struct TaskQueue {
    pending: VecDeque<TaskId>,
    concurrency: usize,
    running: usize,
    state: QueueState,
    policy: Box<dyn DispatchPolicy>,
}

impl TaskQueue {
    /// FIFO queue admitting up to `concurrency` tasks at once.
    pub fn new(concurrency: usize) -> Result<Self> {
        Self::with_policy(concurrency, Fifo)
    }

    pub fn release_memory_priority(concurrency: usize) -> Result<Self> {
        Self::with_policy(concurrency, ReleaseMemoryPriority)
    }

    pub fn unlock_follower_priority(concurrency: usize) -> Result<Self> {
        Self::with_policy(concurrency, UnlockFollowerPriority)
    }

    /// Queue using the built-in policy named by `priority`.
    pub fn for_priority(concurrency: usize, priority: Priority) -> Result<Self> {
        match priority {
            Priority::Fifo => Self::new(concurrency),
            Priority::ReleaseMemory => Self::release_memory_priority(concurrency),
            Priority::UnlockFollower => Self::unlock_follower_priority(concurrency),
        }
    }

    pub fn with_policy(concurrency: usize, policy: impl DispatchPolicy + 'static) -> Result<Self> {
        if concurrency < 2 {
            return Err(TaskGraphError::InvalidConcurrency(concurrency));
        }
        Ok(Self {
            pending: VecDeque::new(),
            concurrency,
            running: 0,
            state: QueueState::Initialized,
            policy: Box::new(policy),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Tasks admitted but not yet finished.
    pub fn running(&self) -> usize {
        self.running
    }

    /// Tasks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Nothing waiting and nothing running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running == 0
    }

    pub fn push(&mut self, task: TaskId) {
        self.pending.push_back(task);
        debug!(
            pending = self.pending.len(),
            running = self.running,
            "task pushed into queue"
        );
    }

    /// `Initialized -> Running`. A queue is started once.
    pub fn start(&mut self) -> Result<()> {
        if self.state == QueueState::Running {
            return Err(TaskGraphError::QueueAlreadyStarted);
        }
        self.state = QueueState::Running;
        info!(
            concurrency = self.concurrency,
            policy = self.policy.name(),
            pending = self.pending.len(),
            "task queue started"
        );
        Ok(())
    }

    /// Take as many tasks as free slots allow, in policy order.
    ///
    /// Every returned task counts as running until [`finish`](Self::finish)
    /// is called for it.
    pub fn admit(&mut self, tasks: &TaskTable) -> Vec<TaskId> {
        let mut admitted = Vec::new();
        if self.state != QueueState::Running {
            return admitted;
        }

        while self.running < self.concurrency && !self.pending.is_empty() {
            let Some(pos) = self.policy.take(&self.pending, tasks) else {
                break;
            };
            let Some(task) = self.pending.remove(pos) else {
                break;
            };
            self.running += 1;
            debug!(
                task = %tasks[task].name(),
                running = self.running,
                pending = self.pending.len(),
                "admitted task"
            );
            admitted.push(task);
        }

        admitted
    }

    /// Free the slot of a task that finished, successfully or not.
    pub fn finish(&mut self) {
        self.running = self.running.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Task, TaskGraph, TaskProcess};

    fn task(name: &str) -> Task {
        Task::new(name, TaskProcess::new(|| async { Ok(()) }))
    }

    fn graph_with(names: &[&str]) -> (TaskGraph, Vec<TaskId>) {
        let mut graph = TaskGraph::new();
        let ids = names
            .iter()
            .map(|name| graph.add_task(task(name)).unwrap())
            .collect();
        (graph, ids)
    }

    #[test]
    fn concurrency_below_two_is_rejected() {
        assert!(matches!(
            TaskQueue::new(1),
            Err(TaskGraphError::InvalidConcurrency(1))
        ));
        assert!(matches!(
            TaskQueue::unlock_follower_priority(0),
            Err(TaskGraphError::InvalidConcurrency(0))
        ));
        assert!(TaskQueue::new(2).is_ok());
    }

    #[test]
    fn nothing_is_admitted_before_start() {
        let (graph, ids) = graph_with(&["a", "b"]);
        let mut queue = TaskQueue::new(2).unwrap();
        for id in &ids {
            queue.push(*id);
        }
        assert!(queue.admit(graph.table()).is_empty());
        assert_eq!(queue.state(), QueueState::Initialized);

        queue.start().unwrap();
        assert_eq!(queue.admit(graph.table()), ids);
        assert!(matches!(
            queue.start(),
            Err(TaskGraphError::QueueAlreadyStarted)
        ));
    }

    #[test]
    fn admission_respects_concurrency() {
        let (graph, ids) = graph_with(&["a", "b", "c", "d", "e"]);
        let mut queue = TaskQueue::new(2).unwrap();
        queue.start().unwrap();
        for id in &ids {
            queue.push(*id);
        }

        assert_eq!(queue.admit(graph.table()), ids[..2].to_vec());
        assert_eq!(queue.running(), 2);
        assert!(queue.admit(graph.table()).is_empty());

        queue.finish();
        assert_eq!(queue.admit(graph.table()), vec![ids[2]]);

        queue.finish();
        queue.finish();
        assert_eq!(queue.admit(graph.table()), ids[3..].to_vec());
        assert_eq!(queue.pending(), 0);

        queue.finish();
        queue.finish();
        assert!(queue.is_idle());
    }

    #[test]
    fn unlock_follower_admits_fan_out_first() {
        let mut graph = TaskGraph::new();
        let x = graph.add_task(task("x")).unwrap();
        let y = graph.add_task(task("y")).unwrap();
        for i in 0..5 {
            let f = graph.add_task(task(&format!("f{i}"))).unwrap();
            graph.add_dependency(f, x).unwrap();
        }

        let mut queue = TaskQueue::unlock_follower_priority(2).unwrap();
        queue.start().unwrap();
        queue.push(y);
        queue.push(x);
        assert_eq!(queue.admit(graph.table()), vec![x, y]);

        let mut fifo = TaskQueue::new(2).unwrap();
        fifo.start().unwrap();
        fifo.push(y);
        fifo.push(x);
        assert_eq!(fifo.admit(graph.table()), vec![y, x]);
    }

    #[test]
    fn for_priority_selects_policy() {
        assert_eq!(
            TaskQueue::for_priority(2, Priority::Fifo).unwrap().policy_name(),
            "fifo"
        );
        assert_eq!(
            TaskQueue::for_priority(2, Priority::ReleaseMemory)
                .unwrap()
                .policy_name(),
            "release-memory"
        );
        assert_eq!(
            TaskQueue::for_priority(2, Priority::UnlockFollower)
                .unwrap()
                .policy_name(),
            "unlock-follower"
        );
    }
}
