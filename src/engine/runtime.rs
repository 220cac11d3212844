// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;

use anyhow::anyhow;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::dag::{Dynamic, TaskGraph, TaskId};
use crate::errors::{Result, TaskGraphError};

/// Drives a started [`TaskGraph`] to completion.
///
/// The graph is a pure state machine; this struct is the async shell around
/// it. It is the only writer of graph and queue state: runner futures are
/// spawned into a [`JoinSet`] and their outcomes are fed back one at a time.
pub struct Runtime {
    graph: TaskGraph,
    running: JoinSet<(TaskId, anyhow::Result<Dynamic>)>,
    in_flight: HashMap<tokio::task::Id, TaskId>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("graph", &self.graph)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph,
            running: JoinSet::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Main loop.
    ///
    /// - Activates the graph (first dependency checks, queue start).
    /// - Spawns whatever the queue admits.
    /// - Waits for the next runner and feeds its outcome into the graph.
    ///
    /// Returns the graph once every task is `Done` or `Error`.
    pub async fn run(mut self) -> Result<TaskGraph> {
        info!(tasks = self.graph.len(), "graph runtime started");
        self.graph.activate()?;

        loop {
            self.launch_admitted()?;

            if self.graph.is_settled() && self.running.is_empty() {
                break;
            }

            match self.running.join_next_with_id().await {
                Some(Ok((join_id, (task, outcome)))) => {
                    self.in_flight.remove(&join_id);
                    self.graph.complete(task, outcome)?;
                }
                Some(Err(err)) => {
                    let Some(task) = self.in_flight.remove(&err.id()) else {
                        return Err(TaskGraphError::Other(anyhow!(
                            "unknown runner stopped: {err}"
                        )));
                    };
                    let reason = if err.is_panic() {
                        anyhow!("runner panicked")
                    } else {
                        anyhow!("runner was cancelled")
                    };
                    self.graph.complete(task, Err(reason))?;
                }
                None => {
                    let unsettled = self.graph.unsettled_count();
                    warn!(unsettled, "no runner in flight but graph not settled");
                    return Err(TaskGraphError::Stalled(unsettled));
                }
            }
        }

        info!(outcome = ?self.graph.outcome(), "graph runtime exiting");
        Ok(self.graph)
    }

    fn launch_admitted(&mut self) -> Result<()> {
        for (task, future) in self.graph.dispatch()? {
            let handle = self.running.spawn(async move { (task, future.await) });
            debug!(?task, join_id = ?handle.id(), "runner spawned");
            self.in_flight.insert(handle.id(), task);
        }
        Ok(())
    }
}

/// Handle to a graph running in the background.
///
/// Dropping the handle detaches the run; [`abort`](Self::abort) stops it
/// together with every runner still in flight.
#[derive(Debug)]
pub struct GraphRun {
    handle: JoinHandle<Result<TaskGraph>>,
}

impl GraphRun {
    pub(crate) fn spawn(graph: TaskGraph) -> Self {
        Self {
            handle: tokio::spawn(Runtime::new(graph).run()),
        }
    }

    /// Wait until every task settled and get the graph back for inspection.
    pub async fn wait(self) -> Result<TaskGraph> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => {
                Err(TaskGraphError::Other(anyhow!("graph run was aborted")))
            }
            Err(err) => Err(TaskGraphError::Other(anyhow!("graph runtime panicked: {err}"))),
        }
    }

    pub fn abort(&self) {
        info!("aborting graph run");
        self.handle.abort();
    }

    /// Handle that aborts the run without consuming it, for use alongside
    /// [`wait`](Self::wait).
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }
}
