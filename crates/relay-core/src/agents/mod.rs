//! Agent-facing contracts and capability lookup.
//!
//! ```text
//!   CapabilityRegistry ──► CapabilityMatcher ──► AgentSelection
//!          │
//!          ├── AgentDescriptor (what an agent can do)
//!          ├── dyn Agent            (execute / compensate)
//!          └── dyn QualityValidator (gate checks)
//! ```
//!
//! Agents are opaque executors. The engine only ever talks to them through
//! [`Agent::execute`] and [`Agent::compensate`].

pub mod matcher;
pub mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::models::{AgentResult, ValidationOutcome, WorkflowContext};
use crate::workflow::schema::CapabilityQuery;

pub use matcher::{AgentSelection, CapabilityMatcher};
pub use registry::{CapabilityRegistry, RegistryBuilder};

/// The unit of work handed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTask {
    pub execution_id: String,
    pub step: String,
    pub phase: String,
    pub requirements: CapabilityQuery,
    /// 1 for the first invocation, incremented by every recovery re-invocation
    pub attempt: u32,
}

/// Per-step instructions, including inputs injected by a domain chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInstructions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl StepInstructions {
    pub fn new(text: Option<String>) -> Self {
        Self {
            text,
            inputs: BTreeMap::new(),
        }
    }
}

/// What the previous agent leaves for the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffNotes {
    /// Step whose result this handoff continues from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_step: Option<String>,
    /// Artifact key of the prior result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_summary: Option<String>,
    pub key_decisions: Vec<String>,
    pub constraints: Vec<String>,
    pub expectations: Vec<String>,
}

/// Everything an agent receives for one invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub agent: String,
    pub task: StepTask,
    /// Read-only snapshot; agents never write the context directly.
    pub context: Arc<WorkflowContext>,
    pub instructions: StepInstructions,
    pub handoff: HandoffNotes,
}

/// A request to undo a completed step.
#[derive(Debug, Clone)]
pub struct CompensationRequest {
    pub execution_id: String,
    pub step: String,
    pub action: String,
    /// The artifact the step committed, if still present
    pub artifact: Option<AgentResult>,
    pub context: Arc<WorkflowContext>,
}

/// The sole boundary between the engine and what agents do.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, invocation: AgentInvocation) -> Result<AgentResult, AgentError>;

    /// Undo a completed step. Agents without side effects keep the default.
    async fn compensate(&self, _request: CompensationRequest) -> Result<(), AgentError> {
        Ok(())
    }
}

/// A quality-gate check. `Err` means the validator could not run at all and
/// is reported as indeterminate, never as a pass.
#[async_trait]
pub trait QualityValidator: Send + Sync {
    async fn validate(
        &self,
        criteria: &[String],
        artifacts: &BTreeMap<String, AgentResult>,
    ) -> Result<ValidationOutcome, AgentError>;
}
