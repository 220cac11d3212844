// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::Priority;

/// Configuration exactly as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// concurrency = 4
/// priority = "unlock-follower"
///
/// [task.fetch]
/// cmd = "git fetch"
///
/// [task.build]
/// cmd = "cargo build"
/// after = ["fetch"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A configuration that passed validation.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holding one means the
/// task set is non-empty, every `after` reference resolves and the
/// dependencies form a DAG.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self { config, task }
    }

    /// Names of tasks without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> + '_ {
        self.task
            .iter()
            .filter(|(_, task)| task.after.is_empty())
            .map(|(name, _)| name.as_str())
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of commands running at once. Must be >= 2.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Order in which ready tasks are started.
    #[serde(default)]
    pub priority: Priority,
}

fn default_concurrency() -> usize {
    4
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            priority: Priority::default(),
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// This task waits for every task listed here (`after = ["A", "B"]`).
    #[serde(default)]
    pub after: Vec<String>,
}
