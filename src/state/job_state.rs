/// Job state definitions for the work queue
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed (dependencies may still be unmet)
    Queued,

    /// Claimed by a worker holding a lease
    Running,

    /// Completed successfully with a result
    Done,

    /// Failed with an error code
    Failed,
}

impl JobState {
    /// Returns true if the job will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible job states
    pub fn all_states() -> Vec<Self> {
        vec![Self::Queued, Self::Running, Self::Done, Self::Failed]
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
