//! Context preservation across handoffs.
//!
//! A handoff has two halves. [`ContextPreservationManager::invoke`] only reads
//! a context snapshot, so members of a parallel group can run it
//! concurrently. [`ContextPreservationManager::commit`] is the single writer
//! and is only ever called by the orchestrator, one result at a time.

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{
    AgentInvocation, CapabilityRegistry, HandoffNotes, StepInstructions, StepTask,
};
use crate::error::{AgentError, OrchestratorError};
use crate::models::{AgentResult, WorkflowContext};
use crate::workflow::schema::StepDef;

/// A handoff that did not produce a committed result.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Commit(#[from] OrchestratorError),
}

#[derive(Debug, Clone)]
pub struct ContextPreservationManager {
    registry: Arc<CapabilityRegistry>,
    default_timeout: Duration,
}

impl ContextPreservationManager {
    pub fn new(registry: Arc<CapabilityRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    /// Check the agent's declared input contract against the context.
    pub fn validate(&self, agent: &str, context: &WorkflowContext) -> Result<(), AgentError> {
        let Some(descriptor) = self.registry.descriptor(agent) else {
            return Err(AgentError::no_capable_agent(format!(
                "agent '{}' is not registered",
                agent
            )));
        };
        let missing = context.missing_fields(&descriptor.required_inputs);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::context_insufficient(missing))
        }
    }

    /// Build the notes handed to the agent running `to`.
    pub fn build_notes(
        &self,
        from: Option<&str>,
        to: &StepDef,
        context: &WorkflowContext,
    ) -> HandoffNotes {
        let prior = from.and_then(|f| context.artifact(f).map(|r| (f, r)));

        let mut key_decisions = Vec::new();
        let mut sources: Vec<&str> = to.depends_on.iter().map(|d| d.as_str()).collect();
        if let Some(f) = from {
            if !sources.contains(&f) {
                sources.push(f);
            }
        }
        for source in &sources {
            if let Some(result) = context.artifact(source) {
                key_decisions.extend(result.decisions.iter().map(|d| format!("{}: {}", source, d)));
            }
        }

        let mut constraints: Vec<String> = context
            .domain_constraints
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}: {}", k, s),
                other => format!("{}: {}", k, other),
            })
            .collect();
        for source in &sources {
            if let Some(result) = context.artifact(source) {
                constraints.extend(
                    result
                        .limitations
                        .iter()
                        .map(|l| format!("{} limitation: {}", source, l)),
                );
            }
        }
        for term in to.capability.terms() {
            if let Some(requirements) = context.cross_cutting.get(&term) {
                constraints.extend(requirements.iter().map(|r| format!("{}: {}", term, r)));
            }
        }

        let mut expectations = Vec::new();
        if !to.capability.outputs.is_empty() {
            expectations.push(format!("Deliver: {}", to.capability.outputs.join(", ")));
        }
        expectations.extend(
            context
                .feature()
                .acceptance_criteria
                .iter()
                .map(|c| format!("Acceptance: {}", c)),
        );

        HandoffNotes {
            from_step: from.map(|f| f.to_string()),
            prior_artifact: prior.map(|(key, _)| key.to_string()),
            prior_summary: prior.map(|(_, r)| r.summary.clone()),
            key_decisions,
            constraints,
            expectations,
        }
    }

    /// Validate, build notes, and run the agent under the step's timeout.
    /// Never touches the shared context.
    pub async fn invoke(
        &self,
        agent: &str,
        task: StepTask,
        step: &StepDef,
        from: Option<&str>,
        context: Arc<WorkflowContext>,
        instructions: StepInstructions,
    ) -> Result<AgentResult, AgentError> {
        self.validate(agent, &context)?;

        let Some(executor) = self.registry.agent(agent) else {
            return Err(AgentError::no_capable_agent(format!(
                "agent '{}' is not registered",
                agent
            )));
        };

        let handoff = self.build_notes(from, step, &context);
        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        tracing::debug!(
            "[Handoff] {} -> '{}' (agent {}, attempt {})",
            from.unwrap_or("<start>"),
            step.id,
            agent,
            task.attempt
        );

        let invocation = AgentInvocation {
            agent: agent.to_string(),
            task,
            context,
            instructions,
            handoff,
        };

        match tokio::time::timeout(timeout, executor.execute(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::timeout(timeout)),
        }
    }

    /// Write a step's result into the context. Single writer; each key once.
    pub fn commit(
        &self,
        context: &mut WorkflowContext,
        step: &str,
        result: AgentResult,
    ) -> Result<(), OrchestratorError> {
        context.commit_artifact(step, result)?;
        tracing::debug!("[Handoff] Committed artifact '{}'", step);
        Ok(())
    }

    /// A whole sequential handoff: invoke, then commit.
    ///
    /// Convenience form for callers driving single steps themselves. The
    /// orchestrator calls [`invoke`](Self::invoke) and [`commit`](Self::commit)
    /// separately, since group members share one snapshot and are committed
    /// at the barrier; a sequential phase is a chain of one-member groups.
    pub async fn handoff(
        &self,
        from: Option<&str>,
        to: &StepDef,
        agent: &str,
        task: StepTask,
        context: &mut WorkflowContext,
        instructions: StepInstructions,
    ) -> Result<AgentResult, HandoffError> {
        let snapshot = Arc::new(context.clone());
        let result = self
            .invoke(agent, task, to, from, snapshot, instructions)
            .await?;
        self.commit(context, &to.id, result.clone())?;
        Ok(result)
    }
}
