// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::Priority;

/// Command-line arguments for `taskgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskgraph",
    version,
    about = "Run shell commands as a dependency graph with bounded parallelism.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Taskgraph.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Taskgraph.toml")]
    pub config: String,

    /// Maximum number of commands running at once (>= 2).
    ///
    /// Overrides `[config].concurrency`.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Order in which ready tasks are started.
    ///
    /// Overrides `[config].priority`.
    #[arg(long, value_enum, value_name = "PRIORITY")]
    pub priority: Option<Priority>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the graph, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
