//! Task selector

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of analysis task requested by the caller.
///
/// Drives which suggestion list of the plan and which model catalogue are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Regression = 1,
    Classification = 2,
    Clustering = 3,
}

impl TaskKind {
    /// All task kinds in selector order
    pub const ALL: [TaskKind; 3] = [
        TaskKind::Regression,
        TaskKind::Classification,
        TaskKind::Clustering,
    ];

    /// Supervised tasks train against a target column and a held-out split
    pub fn is_supervised(self) -> bool {
        !matches!(self, TaskKind::Clustering)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Regression => "regression",
            TaskKind::Classification => "classification",
            TaskKind::Clustering => "clustering",
        }
    }
}

impl TryFrom<u8> for TaskKind {
    type Error = PlanError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(TaskKind::Regression),
            2 => Ok(TaskKind::Classification),
            3 => Ok(TaskKind::Clustering),
            other => Err(PlanError::ConfigError(format!(
                "task selector must be 1 (regression), 2 (classification) or 3 (clustering), got {}",
                other
            ))),
        }
    }
}

impl FromStr for TaskKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(n) = s.trim().parse::<u8>() {
            return TaskKind::try_from(n);
        }
        match s.trim().to_ascii_lowercase().as_str() {
            "regression" => Ok(TaskKind::Regression),
            "classification" => Ok(TaskKind::Classification),
            "clustering" => Ok(TaskKind::Clustering),
            other => Err(PlanError::ConfigError(format!("unknown task kind: {}", other))),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
