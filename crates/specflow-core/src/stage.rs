use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("Unknown stage: {0}")]
    Unknown(String),
    #[error("Stage {0} cannot be confirmed or skipped")]
    NotGated(Stage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Requirements,
    Design,
    Tasks,
    Completed,
}

impl Stage {
    /// Stages that must be confirmed or skipped, in workflow order.
    pub const GATED: [Stage; 3] = [Stage::Requirements, Stage::Design, Stage::Tasks];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Requirements => "requirements",
            Stage::Design => "design",
            Stage::Tasks => "tasks",
            Stage::Completed => "completed",
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Requirements => Some(Stage::Design),
            Stage::Design => Some(Stage::Tasks),
            Stage::Tasks => Some(Stage::Completed),
            Stage::Completed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "requirements" => Ok(Stage::Requirements),
            "design" => Ok(Stage::Design),
            "tasks" => Ok(Stage::Tasks),
            "completed" => Ok(Stage::Completed),
            other => Err(StageError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    #[serde(default)]
    pub requirements: bool,
    #[serde(default)]
    pub design: bool,
    #[serde(default)]
    pub tasks: bool,
}

impl StageFlags {
    pub fn get(&self, stage: Stage) -> bool {
        match stage {
            Stage::Requirements => self.requirements,
            Stage::Design => self.design,
            Stage::Tasks => self.tasks,
            Stage::Completed => false,
        }
    }

    fn slot(&mut self, stage: Stage) -> Result<&mut bool, StageError> {
        match stage {
            Stage::Requirements => Ok(&mut self.requirements),
            Stage::Design => Ok(&mut self.design),
            Stage::Tasks => Ok(&mut self.tasks),
            Stage::Completed => Err(StageError::NotGated(stage)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    #[serde(default)]
    pub confirmed: StageFlags,
    #[serde(default)]
    pub skipped: StageFlags,
    /// RFC3339 timestamp of the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageChange {
    Applied,
    AlreadyPassed,
}

impl StageRecord {
    pub fn is_passed(&self, stage: Stage) -> bool {
        match stage {
            Stage::Completed => Stage::GATED.iter().all(|s| self.is_passed(*s)),
            _ => self.confirmed.get(stage) || self.skipped.get(stage),
        }
    }

    /// Marks `stage` confirmed. Already-passed stages are left untouched.
    pub fn confirm(&mut self, stage: Stage) -> Result<StageChange, StageError> {
        if self.is_passed(stage) {
            return self.already_passed(stage);
        }
        *self.confirmed.slot(stage)? = true;
        Ok(StageChange::Applied)
    }

    /// Marks `stage` skipped. Already-passed stages are left untouched.
    pub fn skip(&mut self, stage: Stage) -> Result<StageChange, StageError> {
        if self.is_passed(stage) {
            return self.already_passed(stage);
        }
        *self.skipped.slot(stage)? = true;
        Ok(StageChange::Applied)
    }

    fn already_passed(&self, stage: Stage) -> Result<StageChange, StageError> {
        if stage == Stage::Completed {
            return Err(StageError::NotGated(stage));
        }
        Ok(StageChange::AlreadyPassed)
    }
}

/// First gated stage that is neither confirmed nor skipped.
pub fn current_stage(record: &StageRecord) -> Stage {
    Stage::GATED
        .iter()
        .copied()
        .find(|stage| !record.is_passed(*stage))
        .unwrap_or(Stage::Completed)
}
