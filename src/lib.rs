// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::dag::{TaskGraph, TaskGraphBuilder};
use crate::engine::{GraphOutcome, TaskQueue};
use crate::types::Priority;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - CLI overrides for concurrency and priority
/// - graph construction, queue and runtime
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from '{}'", args.config))?;

    let concurrency = args.concurrency.unwrap_or(cfg.config.concurrency);
    let priority = args.priority.unwrap_or(cfg.config.priority);

    if args.dry_run {
        print_dry_run(&cfg, concurrency, priority);
        return Ok(());
    }

    let graph = execute(&cfg, concurrency, priority).await?;
    print_summary(&graph);

    match graph.outcome() {
        Some(GraphOutcome::Succeeded) => Ok(()),
        Some(GraphOutcome::Failed { failed }) => {
            bail!("{} task(s) failed: {}", failed.len(), failed.join(", "))
        }
        None => bail!("graph run ended before every task settled"),
    }
}

/// Build the command graph for `cfg`, run it to completion and return it.
///
/// Ctrl-C aborts the run, killing every command still in flight.
pub async fn execute(cfg: &ConfigFile, concurrency: usize, priority: Priority) -> Result<TaskGraph> {
    let mut graph = TaskGraphBuilder::from_config(cfg)?.into_graph()?;
    graph.set_queue(TaskQueue::for_priority(concurrency, priority)?);
    graph.empower()?;

    info!(
        tasks = graph.len(),
        concurrency,
        %priority,
        roots = ?cfg.roots().collect::<Vec<_>>(),
        "starting graph run"
    );

    let run = graph.start()?;
    let abort = run.abort_handle();

    tokio::select! {
        result = run.wait() => Ok(result?),
        () = interrupted(tokio::signal::ctrl_c()) => {
            warn!("interrupted; aborting graph run");
            abort.abort();
            bail!("interrupted")
        }
    }
}

/// Resolves on Ctrl-C. If the listener cannot be installed the run goes on
/// without one, so this never resolves.
async fn interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Simple dry-run output: print settings, tasks, deps and commands.
fn print_dry_run(cfg: &ConfigFile, concurrency: usize, priority: Priority) {
    println!("taskgraph dry-run");
    println!("  concurrency = {concurrency}");
    println!("  priority = {priority}");
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        println!("      cmd: {}", task.cmd);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_summary(graph: &TaskGraph) {
    println!("taskgraph summary:");
    for task in graph.snapshot() {
        println!("  {:<24} {:?}", task.name, task.state);
    }
}
