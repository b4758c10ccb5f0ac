//! Per-execution state.
//!
//! Everything one run mutates lives in [`RunState`], owned by the
//! orchestrator and lent to recovery. Nothing here is global.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::agents::{StepInstructions, StepTask};
use crate::error::{AgentError, OrchestratorError};
use crate::events::{EventSink, WorkflowEvent};
use crate::handoff::ContextPreservationManager;
use crate::models::{
    AgentResult, EscalationReport, ExecutionMetrics, HistoryEntry, StepRecord, StepStatus,
    WorkflowContext,
};
use crate::recovery::SagaLog;
use crate::workflow::schema::{split_input_ref, StepDef, WorkflowDefinition};

// ─── Step board ────────────────────────────────────────────────────────────

/// Step records plus the ordered history of every status change.
/// All transitions are checked against [`StepStatus::can_transition_to`].
#[derive(Debug, Clone)]
pub struct StepBoard {
    records: Vec<StepRecord>,
    index: HashMap<String, usize>,
    history: Vec<HistoryEntry>,
}

impl StepBoard {
    /// Every step starts `Pending` with its schedule-time agent.
    pub fn new(definition: &WorkflowDefinition, assignments: &BTreeMap<String, String>) -> Self {
        let mut records = Vec::new();
        let mut index = HashMap::new();
        for phase in &definition.phases {
            for step in &phase.steps {
                index.insert(step.id.clone(), records.len());
                records.push(StepRecord {
                    id: step.id.clone(),
                    phase: phase.name.clone(),
                    agent: assignments.get(&step.id).cloned(),
                    status: StepStatus::Pending,
                    attempts: 0,
                    started_at: None,
                    finished_at: None,
                    duration_ms: None,
                    error: None,
                    depends_on: step.depends_on.clone(),
                });
            }
        }
        Self {
            records,
            index,
            history: Vec::new(),
        }
    }

    pub fn record(&self, id: &str) -> Option<&StepRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    fn record_mut(&mut self, id: &str) -> Result<&mut StepRecord, OrchestratorError> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.records[i]),
            None => Err(OrchestratorError::InvalidDefinition(format!(
                "unknown step '{}'",
                id
            ))),
        }
    }

    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.record(id).map(|r| r.status)
    }

    pub fn agent(&self, id: &str) -> Option<&str> {
        self.record(id).and_then(|r| r.agent.as_deref())
    }

    pub fn transition(
        &mut self,
        id: &str,
        next: StepStatus,
        note: Option<String>,
    ) -> Result<(), OrchestratorError> {
        self.transition_at(id, next, Utc::now(), note)
    }

    pub fn transition_at(
        &mut self,
        id: &str,
        next: StepStatus,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let record = self.record_mut(id)?;
        if !record.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                step: id.to_string(),
                from: record.status.to_string(),
                to: next.to_string(),
            });
        }
        record.status = next;
        let agent = record.agent.clone();
        self.history.push(HistoryEntry {
            step: id.to_string(),
            status: next,
            agent,
            at,
            note,
        });
        Ok(())
    }

    /// History-only entry for a sub-step of a decomposed step.
    pub fn note_substep(&mut self, sub_step: &str, status: StepStatus, agent: &str, note: String) {
        self.history.push(HistoryEntry {
            step: sub_step.to_string(),
            status,
            agent: Some(agent.to_string()),
            at: Utc::now(),
            note: Some(note),
        });
    }

    pub fn set_agent(&mut self, id: &str, agent: &str) -> Result<(), OrchestratorError> {
        self.record_mut(id)?.agent = Some(agent.to_string());
        Ok(())
    }

    /// Count one more invocation and return the new total.
    pub fn begin_attempt(&mut self, id: &str, at: DateTime<Utc>) -> Result<u32, OrchestratorError> {
        let record = self.record_mut(id)?;
        record.attempts += 1;
        if record.started_at.is_none() {
            record.started_at = Some(at);
        }
        Ok(record.attempts)
    }

    pub fn finish(
        &mut self,
        id: &str,
        at: DateTime<Utc>,
        duration_ms: u64,
        error: Option<AgentError>,
    ) -> Result<(), OrchestratorError> {
        let record = self.record_mut(id)?;
        record.finished_at = Some(at);
        record.duration_ms = Some(duration_ms);
        record.error = error;
        Ok(())
    }

    pub fn ids_with_status(&self, status: StepStatus) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.records.iter().all(|r| r.status.is_terminal())
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn into_parts(self) -> (Vec<StepRecord>, Vec<HistoryEntry>) {
        (self.records, self.history)
    }
}

// ─── Run state ─────────────────────────────────────────────────────────────

/// The mutable state of one execution. Owned by a single writer.
pub struct RunState {
    pub execution_id: String,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub context: WorkflowContext,
    pub board: StepBoard,
    pub saga: SagaLog,
    pub metrics: ExecutionMetrics,
    pub events: EventSink,
    /// Set once any recovery strategy succeeded
    pub recovered: bool,
    pub escalation: Option<EscalationReport>,
}

impl RunState {
    pub fn emit(&self, event: WorkflowEvent) {
        self.events.emit(event);
    }

    pub fn task(&self, step: &StepDef, attempt: u32) -> StepTask {
        StepTask {
            execution_id: self.execution_id.clone(),
            step: step.id.clone(),
            phase: self
                .board
                .record(&step.id)
                .map(|r| r.phase.clone())
                .unwrap_or_default(),
            requirements: step.capability.clone(),
            attempt,
        }
    }

    /// The step a handoff continues from: the most recently completed
    /// dependency, else the most recently completed step of the run.
    pub fn handoff_source(&self, step: &StepDef) -> Option<String> {
        let completed = self.saga.completed_steps();
        completed
            .iter()
            .rev()
            .find(|s| step.depends_on.iter().any(|d| d == *s))
            .or_else(|| completed.last())
            .map(|s| s.to_string())
    }

    /// An output field from the most recently completed step that has it.
    /// Artifacts seeded into the initial context are searched last.
    pub fn find_output(&self, field: &str) -> Option<(String, serde_json::Value)> {
        self.saga
            .completed_steps()
            .iter()
            .rev()
            .find_map(|step| {
                self.context
                    .artifact(step)
                    .and_then(|a| a.output_field(field))
                    .map(|value| (step.to_string(), value.clone()))
            })
            .or_else(|| self.context.find_in_artifacts(field))
    }

    /// Instructions for a step, with domain-chain inputs resolved from the
    /// committed artifacts. Unresolvable inputs are left out.
    pub fn instructions_for(&self, step: &StepDef) -> StepInstructions {
        let mut instructions = StepInstructions::new(step.instructions.clone());
        for (name, reference) in &step.inputs {
            let (source, field) = split_input_ref(reference);
            let Some(artifact) = self.context.artifact(source) else {
                tracing::warn!(
                    "[Orchestrator] Input '{}' of '{}': artifact '{}' is not committed",
                    name,
                    step.id,
                    source
                );
                continue;
            };
            let value = match field {
                Some(field) => artifact.output_field(field).cloned(),
                None => Some(artifact.output.clone()),
            };
            match value {
                Some(value) => {
                    instructions.inputs.insert(name.clone(), value);
                }
                None => tracing::warn!(
                    "[Orchestrator] Input '{}' of '{}': '{}' has no such field",
                    name,
                    step.id,
                    reference
                ),
            }
        }
        instructions
    }

    /// Single-writer completion: commit the artifact, append to the saga and
    /// mark the step `Completed`.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_step(
        &mut self,
        handoff: &ContextPreservationManager,
        step: &StepDef,
        agent: &str,
        result: AgentResult,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
        note: Option<String>,
    ) -> Result<(), OrchestratorError> {
        handoff.commit(&mut self.context, &step.id, result)?;
        self.saga.record(&step.id, agent, step.compensation.clone(), finished_at);
        self.board.set_agent(&step.id, agent)?;
        self.board
            .transition_at(&step.id, StepStatus::Completed, finished_at, note)?;
        self.board.finish(&step.id, finished_at, duration_ms, None)?;
        self.metrics
            .step_durations_ms
            .insert(step.id.clone(), duration_ms);
        self.emit(WorkflowEvent::StepCompleted {
            step: step.id.clone(),
            agent: agent.to_string(),
            duration_ms,
            at: finished_at,
        });
        tracing::info!(
            "[Orchestrator] Step '{}' completed by {} in {}ms",
            step.id,
            agent,
            duration_ms
        );
        Ok(())
    }

    pub fn fail_step(
        &mut self,
        step: &str,
        agent: &str,
        error: AgentError,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<(), OrchestratorError> {
        tracing::warn!("[Orchestrator] Step '{}' failed ({}): {}", step, agent, error);
        self.board.transition_at(
            step,
            StepStatus::Failed,
            finished_at,
            Some(error.to_string()),
        )?;
        self.board
            .finish(step, finished_at, duration_ms, Some(error.clone()))?;
        self.metrics.error_count += 1;
        self.emit(WorkflowEvent::StepFailed {
            step: step.to_string(),
            agent: agent.to_string(),
            error,
            duration_ms,
            at: finished_at,
        });
        Ok(())
    }

    pub fn skip_step(&mut self, step: &str, note: &str) -> Result<(), OrchestratorError> {
        self.board
            .transition(step, StepStatus::Skipped, Some(note.to_string()))?;
        self.emit(WorkflowEvent::StepSkipped {
            step: step.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}
