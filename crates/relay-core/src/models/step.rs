use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Lifecycle of a workflow step.
///
/// ```text
/// Pending ──► Running ──► Completed ──► Compensating ──► Compensated
///    ▲  │        │                           │
///    │  ▼        ▼                           └──► CompensationFailed
/// Skipped     Failed ──► Retrying | Reassigned | Decomposing
///                ▲              │
///                └──────────────┴──► Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Reassigned,
    Decomposing,
    Completed,
    Failed,
    Skipped,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Reassigned => "REASSIGNED",
            Self::Decomposing => "DECOMPOSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
            Self::CompensationFailed => "COMPENSATION_FAILED",
        }
    }

    /// A status the step can end a run in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Skipped
                | Self::Compensated
                | Self::CompensationFailed
        )
    }

    /// An attempt is underway: running, or inside a recovery strategy.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::Retrying | Self::Reassigned | Self::Decomposing
        )
    }

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Skipped, Pending)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Retrying)
                | (Failed, Reassigned)
                | (Failed, Decomposing)
                | (Retrying, Completed)
                | (Retrying, Failed)
                | (Reassigned, Completed)
                | (Reassigned, Failed)
                | (Decomposing, Completed)
                | (Decomposing, Failed)
                | (Completed, Compensating)
                | (Compensating, Compensated)
                | (Compensating, CompensationFailed)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime record of one step in an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    pub phase: String,
    /// Agent resolved at schedule time (or the one that finally succeeded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    pub depends_on: Vec<String>,
}

/// One entry of the ordered step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub step: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Running));
        assert!(StepStatus::Failed.can_transition_to(StepStatus::Retrying));
        assert!(StepStatus::Retrying.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Compensating));
        assert!(!StepStatus::Pending.can_transition_to(StepStatus::Completed));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Compensating));
        assert!(!StepStatus::Compensated.can_transition_to(StepStatus::Running));
    }

    #[test]
    fn test_terminal() {
        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::CompensationFailed.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(!StepStatus::Compensating.is_terminal());
        assert!(StepStatus::Reassigned.is_in_flight());
        assert!(!StepStatus::Failed.is_in_flight());
    }
}
