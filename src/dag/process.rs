// src/dag/process.rs

//! The capability pair a task runs: an optional parameter builder and a
//! runner.
//!
//! Values cross task boundaries type-erased. Results are stored as
//! [`Dynamic`] (`Arc<dyn Any>`), so followers can borrow them while building
//! their own parameters, and callers read them back with
//! [`Task::result`](crate::dag::Task::result).

use std::any::{Any, type_name};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, anyhow};

use crate::dag::task::Task;

/// Type-erased task result.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Type-erased parameter value, moved into the runner.
pub type Params = Box<dyn Any + Send>;

/// Future returned by a runner once it has been handed its parameters.
pub type RunFuture = Pin<Box<dyn Future<Output = anyhow::Result<Dynamic>> + Send + 'static>>;

type ParamBuilder = Box<dyn Fn(&Dependencies<'_>) -> anyhow::Result<Params> + Send>;
type Runner = Box<dyn FnOnce(Option<Params>) -> RunFuture + Send>;

/// Unit of work attached to a [`Task`].
///
/// Built with [`TaskProcess::new`] for runners that need no parameters, or
/// [`TaskProcess::with_params`] when the runner consumes values derived from
/// the task's dependencies.
pub struct TaskProcess {
    param_builder: Option<ParamBuilder>,
    runner: Option<Runner>,
}

impl TaskProcess {
    /// A process whose runner takes no parameters.
    pub fn new<F, Fut, R>(run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Any + Send + Sync,
    {
        let runner: Runner = Box::new(move |_params: Option<Params>| -> RunFuture {
            Box::pin(async move {
                let output = run().await?;
                anyhow::Ok(Arc::new(output) as Dynamic)
            })
        });

        Self {
            param_builder: None,
            runner: Some(runner),
        }
    }

    /// A process whose runner consumes a parameter built from the task's
    /// dependencies.
    ///
    /// `build` is called exactly once, after every dependency has finished
    /// successfully. If it fails, the task fails without running.
    pub fn with_params<B, P, F, Fut, R>(build: B, run: F) -> Self
    where
        B: Fn(&Dependencies<'_>) -> anyhow::Result<P> + Send + 'static,
        P: Any + Send,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Any + Send + Sync,
    {
        let param_builder: ParamBuilder =
            Box::new(move |deps: &Dependencies<'_>| -> anyhow::Result<Params> {
                build(deps).map(|params| Box::new(params) as Params)
            });

        let runner: Runner = Box::new(move |params: Option<Params>| -> RunFuture {
            Box::pin(async move {
                let params = params
                    .ok_or_else(|| anyhow!("runner expected parameters but none were built"))?
                    .downcast::<P>()
                    .map_err(|_| anyhow!("parameters are not a {}", type_name::<P>()))?;
                let output = run(*params).await?;
                anyhow::Ok(Arc::new(output) as Dynamic)
            })
        });

        Self {
            param_builder: Some(param_builder),
            runner: Some(runner),
        }
    }

    /// Process with no work, used for the graph's join task.
    pub(crate) fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    pub(crate) fn build_params(&self, deps: &Dependencies<'_>) -> Option<anyhow::Result<Params>> {
        self.param_builder.as_ref().map(|build| build(deps))
    }

    /// Hand the runner its parameters. Returns `None` once the runner has
    /// already been consumed.
    pub(crate) fn launch(&mut self, params: Option<Params>) -> Option<RunFuture> {
        self.runner.take().map(|run| run(params))
    }
}

impl fmt::Debug for TaskProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProcess")
            .field("param_builder", &self.param_builder.is_some())
            .field("runner_pending", &self.runner.is_some())
            .finish()
    }
}

/// Name-keyed view of a task's dependencies, handed to parameter builders.
pub struct Dependencies<'a> {
    tasks: Vec<&'a Task>,
}

impl<'a> Dependencies<'a> {
    pub fn new(tasks: Vec<&'a Task>) -> Self {
        Self { tasks }
    }

    pub fn empty() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&'a Task> {
        self.tasks.iter().copied().find(|task| task.name() == name)
    }

    /// Like [`get`](Self::get), but an absent dependency is an error.
    pub fn task(&self, name: &str) -> anyhow::Result<&'a Task> {
        self.get(name)
            .ok_or_else(|| anyhow!("no dependency named '{name}'"))
    }

    /// Borrow the typed result of the named dependency.
    pub fn result<T: Any>(&self, name: &str) -> anyhow::Result<&'a T> {
        let task = self.task(name)?;
        task.result::<T>()
            .with_context(|| format!("reading result of dependency '{name}'"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Task> + '_ {
        self.tasks.iter().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.tasks.iter().copied().map(Task::name)
    }

    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|task| task.is_succeeded())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
