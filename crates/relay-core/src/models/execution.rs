use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::models::context::WorkflowContext;
use crate::models::gate::QualityGateResult;
use crate::models::step::{HistoryEntry, StepRecord, StepStatus};

/// Aggregate outcome of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    SucceededAfterRecovery,
    FailedAndCompensated,
    Escalated,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::SucceededAfterRecovery => "succeeded_after_recovery",
            Self::FailedAndCompensated => "failed_and_compensated",
            Self::Escalated => "escalated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "succeeded_after_recovery" => Some(Self::SucceededAfterRecovery),
            "failed_and_compensated" => Some(Self::FailedAndCompensated),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededAfterRecovery)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery strategies, in the order they are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    EnhancedRetry,
    AlternateAgent,
    TaskDecomposition,
    Escalation,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnhancedRetry => "enhanced_retry",
            Self::AlternateAgent => "alternate_agent",
            Self::TaskDecomposition => "task_decomposition",
            Self::Escalation => "escalation",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    pub step: String,
    pub strategy: RecoveryStrategy,
    pub attempt: u32,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CompensationOutcome {
    /// The compensating action ran.
    Compensated,
    /// The step declared no compensating action.
    NoAction,
    /// The compensating action failed; the sweep continued.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRecord {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub outcome: CompensationOutcome,
    pub at: DateTime<Utc>,
}

/// Timing of one parallel group (or a single sequential step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTiming {
    pub phase: String,
    pub members: Vec<String>,
    pub wall_ms: u64,
    /// Sum of member step durations
    pub busy_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub step_durations_ms: BTreeMap<String, u64>,
    pub gate_results: Vec<QualityGateResult>,
    pub error_count: u32,
    pub recovery_attempts: Vec<RecoveryAttempt>,
    pub compensations: Vec<CompensationRecord>,
    pub groups: Vec<GroupTiming>,
    pub estimated_critical_path_ms: u64,
}

/// Snapshot handed to the external collaborator on escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationReport {
    pub execution_id: String,
    pub step: String,
    pub error: AgentError,
    pub context: WorkflowContext,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub steps: Vec<StepRecord>,
    pub history: Vec<HistoryEntry>,
    pub metrics: ExecutionMetrics,
    pub context: WorkflowContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationReport>,
    /// Why the run stopped, when it did not succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl WorkflowExecution {
    pub fn step(&self, id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Statuses a step went through, in order.
    pub fn status_trail(&self, step: &str) -> Vec<StepStatus> {
        self.history
            .iter()
            .filter(|h| h.step == step)
            .map(|h| h.status)
            .collect()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}
