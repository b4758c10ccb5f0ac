//! Error types for the Relay engine.
//!
//! Two layers:
//!
//! - [`OrchestratorError`]: fatal for a whole run. Raised while validating or
//!   planning a workflow (cycles, unmatched capabilities, malformed
//!   definitions) or when an engine invariant is broken.
//! - [`AgentError`]: a step-level failure. Always offered to the recovery
//!   manager first; never aborts a run on its own.
//!
//! [`CompensationError`] is recorded in the execution and the report but is
//! never propagated.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("No capable agent for step '{step}' (best confidence {best_confidence:.2}, required {required:.2})")]
    NoCapableAgent {
        step: String,
        best_confidence: f64,
        required: f64,
    },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Artifact '{0}' was already committed in this execution")]
    ArtifactConflict(String),

    #[error("Invalid step transition for '{step}': {from} -> {to}")]
    InvalidTransition {
        step: String,
        from: String,
        to: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How bad a step failure is. Critical failures always escalate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Critical,
}

/// Failure taxonomy for a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// The context lacks fields the agent's input contract requires.
    ContextInsufficient { missing: Vec<String> },
    /// The assigned agent cannot perform the task after all.
    CapabilityMismatch,
    /// The task has to be split before any agent can finish it.
    TaskComplexity,
    /// No registered agent clears the confidence threshold.
    NoCapableAgent,
    /// The step exceeded its timeout.
    Timeout { after_ms: u64 },
    /// Anything else reported by the agent.
    Execution,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ContextInsufficient { .. } => "context_insufficient",
            FailureKind::CapabilityMismatch => "capability_mismatch",
            FailureKind::TaskComplexity => "task_complexity",
            FailureKind::NoCapableAgent => "no_capable_agent",
            FailureKind::Timeout { .. } => "timeout",
            FailureKind::Execution => "execution",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by an agent (or by the engine on the agent's behalf).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct AgentError {
    pub kind: FailureKind,
    #[serde(default)]
    pub severity: Severity,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Normal,
            message: message.into(),
        }
    }

    pub fn context_insufficient(missing: Vec<String>) -> Self {
        let message = format!("missing context fields: {}", missing.join(", "));
        Self::new(FailureKind::ContextInsufficient { missing }, message)
    }

    pub fn capability_mismatch(message: impl Into<String>) -> Self {
        Self::new(FailureKind::CapabilityMismatch, message)
    }

    pub fn task_complexity(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TaskComplexity, message)
    }

    pub fn no_capable_agent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NoCapableAgent, message)
    }

    pub fn timeout(after: Duration) -> Self {
        let after_ms = after.as_millis() as u64;
        Self::new(
            FailureKind::Timeout { after_ms },
            format!("step timed out after {}ms", after_ms),
        )
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Execution, message)
    }

    /// Mark this failure as critical.
    pub fn critical(mut self) -> Self {
        self.severity = Severity::Critical;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Missing fields, when this is a context failure.
    pub fn missing_fields(&self) -> &[String] {
        match &self.kind {
            FailureKind::ContextInsufficient { missing } => missing,
            _ => &[],
        }
    }
}

/// A compensating action that itself failed. Logged and recorded, never re-thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("compensation '{action}' for step '{step}' failed: {message}")]
#[serde(rename_all = "camelCase")]
pub struct CompensationError {
    pub step: String,
    pub action: String,
    pub message: String,
}
