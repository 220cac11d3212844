// src/exec/mod.rs

//! Shell command execution for config-defined tasks.
//!
//! Each `[task.<name>]` becomes a [`TaskProcess`](crate::dag::TaskProcess)
//! built by [`command_process`]: the parameter builder gathers the stdout of
//! every dependency, the runner spawns the command through the platform
//! shell.

pub mod command;

pub use command::{CommandEnv, CommandOutput, OUTPUT_ENV_PREFIX, command_process, output_env_var};
