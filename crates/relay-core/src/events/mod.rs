//! Execution events.
//!
//! The orchestrator, gate evaluation and recovery all emit through an
//! [`EventSink`]: the sending half of an unbounded channel that the
//! [`WorkflowMonitor`](crate::monitor::WorkflowMonitor) drains. Emitting never
//! blocks and never calls back into the emitter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::models::{
    CompensationRecord, ExecutionStatus, GroupTiming, QualityGateResult, RecoveryAttempt,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ExecutionStarted {
        workflow: String,
        at: DateTime<Utc>,
    },
    PlanReady {
        steps: usize,
        parallel_groups: usize,
        critical_path: Vec<String>,
        estimated_secs: u64,
    },
    StepStarted {
        step: String,
        agent: String,
        attempt: u32,
        at: DateTime<Utc>,
    },
    StepCompleted {
        step: String,
        agent: String,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    StepFailed {
        step: String,
        agent: String,
        error: AgentError,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    StepSkipped {
        step: String,
        at: DateTime<Utc>,
    },
    GroupSettled {
        timing: GroupTiming,
    },
    GateEvaluated {
        result: QualityGateResult,
    },
    RecoveryAttempted {
        attempt: RecoveryAttempt,
    },
    Compensated {
        record: CompensationRecord,
    },
    Escalated {
        step: String,
        error: AgentError,
        at: DateTime<Utc>,
    },
    ExecutionFinished {
        status: ExecutionStatus,
        at: DateTime<Utc>,
        duration_ms: u64,
    },
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution_started",
            Self::PlanReady { .. } => "plan_ready",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::GroupSettled { .. } => "group_settled",
            Self::GateEvaluated { .. } => "gate_evaluated",
            Self::RecoveryAttempted { .. } => "recovery_attempted",
            Self::Compensated { .. } => "compensated",
            Self::Escalated { .. } => "escalated",
            Self::ExecutionFinished { .. } => "execution_finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ExecutionFinished { .. })
    }
}

/// An event tagged with the execution it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub execution_id: String,
    pub sequence: u64,
    pub event: WorkflowEvent,
}

/// Emitting half of an execution's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    execution_id: String,
    tx: mpsc::UnboundedSender<(String, WorkflowEvent)>,
}

impl EventSink {
    pub fn new(
        execution_id: impl Into<String>,
        tx: mpsc::UnboundedSender<(String, WorkflowEvent)>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            tx,
        }
    }

    /// A sink paired with its receiving half.
    pub fn channel(
        execution_id: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<(String, WorkflowEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(execution_id, tx), rx)
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if self.tx.send((self.execution_id.clone(), event)).is_err() {
            tracing::debug!(
                "[Events] Monitor gone, dropping event for execution {}",
                self.execution_id
            );
        }
    }
}
