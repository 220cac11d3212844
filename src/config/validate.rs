// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TaskGraphError};
use crate::exec::output_env_var;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskGraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_output_names(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskGraphError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    // priority is strongly typed and checked during deserialization.
    if cfg.config.concurrency < 2 {
        return Err(TaskGraphError::ConfigError(format!(
            "[config].concurrency must be >= 2 (got {})",
            cfg.config.concurrency
        )));
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.cmd.trim().is_empty() {
            return Err(TaskGraphError::ConfigError(format!(
                "task '{name}' has an empty `cmd`"
            )));
        }
        for dep in task.after.iter() {
            if dep == name {
                return Err(TaskGraphError::ConfigError(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.task.contains_key(dep) {
                return Err(TaskGraphError::ConfigError(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

/// Each task's stdout is exported under a sanitized name; two tasks must not
/// share one.
fn validate_output_names(cfg: &RawConfigFile) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for name in cfg.task.keys() {
        let var = output_env_var(name);
        if let Some(other) = seen.insert(var.clone(), name.as_str()) {
            return Err(TaskGraphError::ConfigError(format!(
                "tasks '{other}' and '{name}' both export their output as `{var}`; rename one"
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task. `[task.B] after = ["A"]` adds A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            // Report every task on the strongly connected component that
            // contains the offending node.
            let mut members: Vec<String> = tarjan_scc(&graph)
                .into_iter()
                .find(|scc| scc.contains(&node))
                .unwrap_or_else(|| vec![node])
                .into_iter()
                .map(str::to_string)
                .collect();
            members.sort();
            Err(TaskGraphError::DagCycle(members))
        }
    }
}
