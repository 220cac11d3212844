// src/types.rs

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

/// Which ready task the queue starts first when slots are scarce.
///
/// - `Fifo`: arrival order (default).
/// - `ReleaseMemory`: tasks whose completion most likely frees a
///   dependency's result.
/// - `UnlockFollower`: tasks with the largest downstream subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    #[default]
    Fifo,
    ReleaseMemory,
    UnlockFollower,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Fifo => "fifo",
            Priority::ReleaseMemory => "release-memory",
            Priority::UnlockFollower => "unlock-follower",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "fifo" => Ok(Priority::Fifo),
            "release-memory" => Ok(Priority::ReleaseMemory),
            "unlock-follower" => Ok(Priority::UnlockFollower),
            other => Err(format!(
                "invalid priority: {other} (expected \"fifo\", \"release-memory\" or \"unlock-follower\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_loosely() {
        assert_eq!("FIFO".parse::<Priority>(), Ok(Priority::Fifo));
        assert_eq!(
            "release_memory".parse::<Priority>(),
            Ok(Priority::ReleaseMemory)
        );
        assert_eq!(
            " unlock-follower ".parse::<Priority>(),
            Ok(Priority::UnlockFollower)
        );
        assert!("lifo".parse::<Priority>().is_err());
    }

    #[test]
    fn display_matches_config_spelling() {
        for priority in [
            Priority::Fifo,
            Priority::ReleaseMemory,
            Priority::UnlockFollower,
        ] {
            assert_eq!(priority.to_string().parse::<Priority>(), Ok(priority));
        }
    }
}
