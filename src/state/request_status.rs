/// Request status definitions for tracking pipeline progress
///
/// This module defines every state an analysis request moves through between
/// intake and its terminal report or failure.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of an analysis request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    // ===== Active States =====
    /// Request has been accepted and normalized, fetch not yet enqueued
    Received,

    /// The fetch job is queued or running
    Fetching,

    /// Analysis jobs have been fanned out and are not all terminal yet
    Analyzing,

    /// All analysis jobs are terminal and the report is being assembled
    Aggregating,

    // ===== Terminal States =====
    /// A report was produced
    Completed,

    /// No report could be produced (fetch failure, all analyses failed, timeout)
    Failed,
}

impl RequestStatus {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the states this state may legally move to
    ///
    /// Every non-terminal state may move to `Failed`, which covers request
    /// timeouts as well as fetch and analysis failures.
    pub fn valid_transitions(&self) -> &'static [RequestStatus] {
        match self {
            Self::Received => &[Self::Fetching, Self::Failed],
            Self::Fetching => &[Self::Analyzing, Self::Failed],
            Self::Analyzing => &[Self::Aggregating, Self::Failed],
            Self::Aggregating => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    /// Returns true if moving from this state to `next` is allowed
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Fetching => "fetching",
            Self::Analyzing => "analyzing",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from a database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "fetching" => Some(Self::Fetching),
            "analyzing" => Some(Self::Analyzing),
            "aggregating" => Some(Self::Aggregating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible request statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Received,
            Self::Fetching,
            Self::Analyzing,
            Self::Aggregating,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!RequestStatus::Received.is_terminal());
        assert!(!RequestStatus::Fetching.is_terminal());
        assert!(!RequestStatus::Analyzing.is_terminal());
        assert!(!RequestStatus::Aggregating.is_terminal());

        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(RequestStatus::Received.can_transition_to(RequestStatus::Fetching));
        assert!(RequestStatus::Fetching.can_transition_to(RequestStatus::Analyzing));
        assert!(RequestStatus::Analyzing.can_transition_to(RequestStatus::Aggregating));
        assert!(RequestStatus::Aggregating.can_transition_to(RequestStatus::Completed));
    }

    #[test]
    fn test_every_active_state_can_fail() {
        for state in RequestStatus::all_states() {
            if !state.is_terminal() {
                assert!(
                    state.can_transition_to(RequestStatus::Failed),
                    "{} should be able to fail",
                    state
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in RequestStatus::all_states() {
            assert!(!RequestStatus::Completed.can_transition_to(next));
            assert!(!RequestStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_no_skipping_ahead() {
        assert!(!RequestStatus::Received.can_transition_to(RequestStatus::Analyzing));
        assert!(!RequestStatus::Fetching.can_transition_to(RequestStatus::Completed));
        assert!(!RequestStatus::Analyzing.can_transition_to(RequestStatus::Completed));
        assert!(!RequestStatus::Analyzing.can_transition_to(RequestStatus::Fetching));
    }

    #[test]
    fn test_roundtrip_db_string() {
        for state in RequestStatus::all_states() {
            let db_str = state.to_db_string();
            let parsed = RequestStatus::from_db_string(db_str);
            assert_eq!(Some(state), parsed, "Failed roundtrip for {:?}", state);
        }
        assert_eq!(RequestStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&RequestStatus::Aggregating).unwrap();
        assert_eq!(json, "\"aggregating\"");
    }
}
