//! Failure recovery and saga compensation.
//!
//! A failed step is handed to [`RecoveryManager::handle_failure`], which
//! tries the strategies that apply to the failure, in this order:
//!
//! | failure                | strategy            | bound            |
//! |------------------------|---------------------|------------------|
//! | `context_insufficient` | enhanced retry      | `max_retries`    |
//! | `capability_mismatch`  | alternate agent     | `max_alternates` |
//! | `task_complexity`      | task decomposition  | one split        |
//! | critical severity      | escalation          | once             |
//!
//! Each strategy looks at the failure left by the previous one, so a retry
//! that fails with a capability mismatch moves on to an alternate agent.
//! When nothing recovers the step, the orchestrator calls
//! [`RecoveryManager::compensate`], which walks the [`SagaLog`] backwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{CapabilityMatcher, CapabilityRegistry, CompensationRequest};
use crate::config::EngineConfig;
use crate::error::{AgentError, CompensationError, FailureKind, OrchestratorError};
use crate::events::WorkflowEvent;
use crate::handoff::ContextPreservationManager;
use crate::models::{
    AgentResult, CompensationOutcome, CompensationRecord, EscalationReport, RecoveryAttempt,
    RecoveryStrategy, StepStatus, WorkflowContext,
};
use crate::workflow::schema::{CapabilityQuery, StepDef};
use crate::workflow::state::RunState;

// ─── Collaborators ─────────────────────────────────────────────────────────

/// Supplies a missing context field that no committed artifact carries.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn provide(&self, field: &str, context: &WorkflowContext) -> Option<serde_json::Value>;
}

/// A piece of a decomposed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: String,
    pub requirements: CapabilityQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Splits a step that was too complex into smaller ones.
#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    /// An empty result means the step cannot be split.
    async fn decompose(
        &self,
        step: &StepDef,
        error: &AgentError,
        context: &WorkflowContext,
    ) -> Vec<SubTask>;
}

/// One sub-task per declared output. Steps with fewer than two outputs are
/// not split.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputDecomposer;

#[async_trait]
impl TaskDecomposer for OutputDecomposer {
    async fn decompose(
        &self,
        step: &StepDef,
        _error: &AgentError,
        _context: &WorkflowContext,
    ) -> Vec<SubTask> {
        let outputs = &step.capability.outputs;
        if outputs.len() < 2 {
            return Vec::new();
        }
        outputs
            .iter()
            .map(|output| SubTask {
                id: format!("{}.{}", step.id, output),
                requirements: CapabilityQuery {
                    category: step.capability.category.clone(),
                    outputs: vec![output.clone()],
                    tags: step.capability.tags.clone(),
                },
                instructions: Some(match &step.instructions {
                    Some(text) => format!("{} (deliver only: {})", text, output),
                    None => format!("Deliver only: {}", output),
                }),
            })
            .collect()
    }
}

/// Receives failures that need a human.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    async fn escalate(&self, report: &EscalationReport);
}

// ─── Saga log ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaEntry {
    pub step: String,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Completed steps in completion order.
#[derive(Debug, Clone, Default)]
pub struct SagaLog {
    entries: Vec<SagaEntry>,
}

impl SagaLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        step: &str,
        agent: &str,
        action: Option<String>,
        completed_at: DateTime<Utc>,
    ) {
        self.entries.push(SagaEntry {
            step: step.to_string(),
            agent: agent.to_string(),
            action,
            completed_at,
        });
    }

    pub fn entries(&self) -> &[SagaEntry] {
        &self.entries
    }

    pub fn completed_steps(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.step.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry, newest first. The log is empty afterwards.
    fn drain_reverse(&mut self) -> Vec<SagaEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.reverse();
        entries
    }
}

// ─── Recovery manager ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult {
    pub recovered: bool,
    /// The last strategy tried, if any applied
    pub strategy_used: Option<RecoveryStrategy>,
    pub attempts: Vec<RecoveryAttempt>,
    /// Present when recovered
    pub result: Option<AgentResult>,
    /// The failure left standing when not recovered
    pub final_error: Option<AgentError>,
}

pub struct RecoveryManager {
    registry: Arc<CapabilityRegistry>,
    matcher: CapabilityMatcher,
    handoff: ContextPreservationManager,
    max_retries: u32,
    max_alternates: u32,
    compensation_timeout: Duration,
    provider: Option<Arc<dyn ContextProvider>>,
    decomposer: Arc<dyn TaskDecomposer>,
    escalation: Option<Arc<dyn EscalationHandler>>,
}

impl RecoveryManager {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        matcher: CapabilityMatcher,
        handoff: ContextPreservationManager,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            matcher,
            handoff,
            max_retries: config.max_retries,
            max_alternates: config.max_alternates,
            compensation_timeout: config.default_step_timeout(),
            provider: None,
            decomposer: Arc::new(OutputDecomposer),
            escalation: None,
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn TaskDecomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn with_escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    /// Try to recover a step that is currently `Failed`.
    ///
    /// On success the step is `Completed` and its result committed. Otherwise
    /// the step stays `Failed`; compensation is the caller's decision.
    pub async fn handle_failure(
        &self,
        state: &mut RunState,
        step: &StepDef,
        error: AgentError,
    ) -> Result<RecoveryResult, OrchestratorError> {
        let critical = error.is_critical();
        let mut error = error;
        let mut attempts = Vec::new();
        let mut strategy_used = None;

        tracing::info!(
            "[Recovery] Step '{}' failed with {}; looking for a strategy",
            step.id,
            error.kind
        );

        // 1. Enhanced retry
        if matches!(error.kind, FailureKind::ContextInsufficient { .. }) {
            strategy_used = Some(RecoveryStrategy::EnhancedRetry);
            for n in 1..=self.max_retries {
                let enriched = self.enrich(state, error.missing_fields()).await;
                let detail = if enriched.is_empty() {
                    "nothing could be supplied; retrying as is".to_string()
                } else {
                    format!("supplied {}", enriched.join(", "))
                };
                state
                    .board
                    .transition(&step.id, StepStatus::Retrying, Some(detail.clone()))?;
                let agent = current_agent(state, step);

                match self.reinvoke(state, step, &agent).await {
                    Ok((result, finished_at, duration_ms)) => {
                        self.record_attempt(
                            state,
                            &mut attempts,
                            attempt(step, RecoveryStrategy::EnhancedRetry, n, true, &agent, detail),
                        );
                        return self.recovered(
                            state,
                            step,
                            &agent,
                            result,
                            finished_at,
                            duration_ms,
                            RecoveryStrategy::EnhancedRetry,
                            attempts,
                        );
                    }
                    Err((e, finished_at, duration_ms)) => {
                        self.record_attempt(
                            state,
                            &mut attempts,
                            attempt(step, RecoveryStrategy::EnhancedRetry, n, false, &agent, detail),
                        );
                        state.fail_step(&step.id, &agent, e.clone(), finished_at, duration_ms)?;
                        error = e;
                        if !matches!(error.kind, FailureKind::ContextInsufficient { .. }) {
                            break;
                        }
                    }
                }
            }
        }

        // 2. Alternate agent
        if error.kind == FailureKind::CapabilityMismatch {
            strategy_used = Some(RecoveryStrategy::AlternateAgent);
            let mut excluded = vec![current_agent(state, step)];
            for n in 1..=self.max_alternates {
                let selection =
                    match self
                        .matcher
                        .select_agent_excluding(&step.id, &step.capability, &excluded)
                    {
                        Ok(selection) => selection,
                        Err(e) => {
                            self.record_attempt(
                                state,
                                &mut attempts,
                                RecoveryAttempt {
                                    step: step.id.clone(),
                                    strategy: RecoveryStrategy::AlternateAgent,
                                    attempt: n,
                                    succeeded: false,
                                    agent: None,
                                    detail: e.to_string(),
                                },
                            );
                            break;
                        }
                    };

                let previous = current_agent(state, step);
                let agent = selection.primary;
                let detail = format!("reassigned from {} to {}", previous, agent);
                state.board.set_agent(&step.id, &agent)?;
                state
                    .board
                    .transition(&step.id, StepStatus::Reassigned, Some(detail.clone()))?;

                match self.reinvoke(state, step, &agent).await {
                    Ok((result, finished_at, duration_ms)) => {
                        self.record_attempt(
                            state,
                            &mut attempts,
                            attempt(step, RecoveryStrategy::AlternateAgent, n, true, &agent, detail),
                        );
                        return self.recovered(
                            state,
                            step,
                            &agent,
                            result,
                            finished_at,
                            duration_ms,
                            RecoveryStrategy::AlternateAgent,
                            attempts,
                        );
                    }
                    Err((e, finished_at, duration_ms)) => {
                        self.record_attempt(
                            state,
                            &mut attempts,
                            attempt(step, RecoveryStrategy::AlternateAgent, n, false, &agent, detail),
                        );
                        state.fail_step(&step.id, &agent, e.clone(), finished_at, duration_ms)?;
                        excluded.push(agent);
                        error = e;
                        if error.kind != FailureKind::CapabilityMismatch {
                            break;
                        }
                    }
                }
            }
        }

        // 3. Task decomposition
        if error.kind == FailureKind::TaskComplexity {
            strategy_used = Some(RecoveryStrategy::TaskDecomposition);
            match self.decompose(state, step, &error).await? {
                Decomposition::Recovered {
                    result,
                    agent,
                    finished_at,
                    duration_ms,
                    detail,
                } => {
                    self.record_attempt(
                        state,
                        &mut attempts,
                        attempt(step, RecoveryStrategy::TaskDecomposition, 1, true, &agent, detail),
                    );
                    return self.recovered(
                        state,
                        step,
                        &agent,
                        result,
                        finished_at,
                        duration_ms,
                        RecoveryStrategy::TaskDecomposition,
                        attempts,
                    );
                }
                Decomposition::NotSplit { detail } => {
                    let agent = current_agent(state, step);
                    self.record_attempt(
                        state,
                        &mut attempts,
                        attempt(step, RecoveryStrategy::TaskDecomposition, 1, false, &agent, detail),
                    );
                }
                Decomposition::Failed { error: e, agent, detail } => {
                    self.record_attempt(
                        state,
                        &mut attempts,
                        attempt(step, RecoveryStrategy::TaskDecomposition, 1, false, &agent, detail),
                    );
                    error = e;
                }
            }
        }

        // 4. Escalation
        if critical || error.is_critical() {
            strategy_used = Some(RecoveryStrategy::Escalation);
            self.escalate(state, step, &error, &mut attempts).await;
        }

        tracing::warn!(
            "[Recovery] Step '{}' not recovered after {} attempt(s)",
            step.id,
            attempts.len()
        );

        Ok(RecoveryResult {
            recovered: false,
            strategy_used,
            attempts,
            result: None,
            final_error: Some(error),
        })
    }

    /// Undo every completed step, newest first. Each entry is compensated at
    /// most once; failures are recorded and the sweep continues.
    pub async fn compensate(&self, state: &mut RunState) -> Vec<CompensationRecord> {
        let entries = state.saga.drain_reverse();
        if entries.is_empty() {
            return Vec::new();
        }
        tracing::info!("[Recovery] Compensating {} completed step(s)", entries.len());

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Err(e) = state
                .board
                .transition(&entry.step, StepStatus::Compensating, entry.action.clone())
            {
                tracing::error!("[Recovery] Cannot compensate '{}': {}", entry.step, e);
                continue;
            }

            let outcome = match &entry.action {
                None => CompensationOutcome::NoAction,
                Some(action) => self.run_compensation(state, &entry, action).await,
            };

            let next = match outcome {
                CompensationOutcome::Failed { .. } => StepStatus::CompensationFailed,
                _ => StepStatus::Compensated,
            };
            if let Err(e) = state.board.transition(&entry.step, next, None) {
                tracing::error!("[Recovery] Cannot settle '{}': {}", entry.step, e);
            }

            let record = CompensationRecord {
                step: entry.step.clone(),
                action: entry.action.clone(),
                agent: Some(entry.agent.clone()),
                outcome,
                at: Utc::now(),
            };
            state.metrics.compensations.push(record.clone());
            state.emit(WorkflowEvent::Compensated {
                record: record.clone(),
            });
            records.push(record);
        }
        records
    }

    // ── internals ──────────────────────────────────────────────────────────

    async fn run_compensation(
        &self,
        state: &RunState,
        entry: &SagaEntry,
        action: &str,
    ) -> CompensationOutcome {
        let Some(agent) = self.registry.agent(&entry.agent) else {
            return CompensationOutcome::Failed {
                message: format!("agent '{}' is not registered", entry.agent),
            };
        };
        let request = CompensationRequest {
            execution_id: state.execution_id.clone(),
            step: entry.step.clone(),
            action: action.to_string(),
            artifact: state.context.artifact(&entry.step).cloned(),
            context: Arc::new(state.context.clone()),
        };

        let message = match tokio::time::timeout(self.compensation_timeout, agent.compensate(request))
            .await
        {
            Ok(Ok(())) => {
                tracing::info!("[Recovery] Compensated '{}' ({})", entry.step, action);
                return CompensationOutcome::Compensated;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "timed out after {}ms",
                self.compensation_timeout.as_millis()
            ),
        };

        let failure = CompensationError {
            step: entry.step.clone(),
            action: action.to_string(),
            message,
        };
        tracing::warn!("[Recovery] {}", failure);
        CompensationOutcome::Failed {
            message: failure.message,
        }
    }

    /// Fill missing fields from earlier artifacts, then from the provider.
    async fn enrich(&self, state: &mut RunState, missing: &[String]) -> Vec<String> {
        let mut supplied = Vec::new();
        for field in missing {
            if state.context.has_field(field) {
                continue;
            }
            let leaf = field.rsplit('.').next().unwrap_or(field.as_str());
            if let Some((source, value)) = state.find_output(leaf) {
                if state.context.supplement(field.clone(), value) {
                    supplied.push(format!("{} from {}", field, source));
                }
                continue;
            }
            if let Some(provider) = &self.provider {
                if let Some(value) = provider.provide(field, &state.context).await {
                    if state.context.supplement(field.clone(), value) {
                        supplied.push(format!("{} from provider", field));
                    }
                }
            }
        }
        supplied
    }

    /// Invoke the step again against a fresh snapshot.
    async fn reinvoke(
        &self,
        state: &mut RunState,
        step: &StepDef,
        agent: &str,
    ) -> Result<(AgentResult, DateTime<Utc>, u64), (AgentError, DateTime<Utc>, u64)> {
        let started_at = Utc::now();
        let attempt = match state.board.begin_attempt(&step.id, started_at) {
            Ok(n) => n,
            Err(e) => return Err((AgentError::failed(e.to_string()), started_at, 0)),
        };
        state.emit(WorkflowEvent::StepStarted {
            step: step.id.clone(),
            agent: agent.to_string(),
            attempt,
            at: started_at,
        });

        let task = state.task(step, attempt);
        let from = state.handoff_source(step);
        let instructions = state.instructions_for(step);
        let snapshot = Arc::new(state.context.clone());

        let clock = tokio::time::Instant::now();
        let outcome = self
            .handoff
            .invoke(agent, task, step, from.as_deref(), snapshot, instructions)
            .await;
        let duration_ms = clock.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        match outcome {
            Ok(result) => Ok((result, finished_at, duration_ms)),
            Err(e) => Err((e, finished_at, duration_ms)),
        }
    }

    async fn decompose(
        &self,
        state: &mut RunState,
        step: &StepDef,
        error: &AgentError,
    ) -> Result<Decomposition, OrchestratorError> {
        let pieces = self.decomposer.decompose(step, error, &state.context).await;
        if pieces.is_empty() {
            return Ok(Decomposition::NotSplit {
                detail: format!("'{}' cannot be split further", step.id),
            });
        }

        let names: Vec<&str> = pieces.iter().map(|p| p.id.as_str()).collect();
        let detail = format!("split into {}", names.join(", "));
        state
            .board
            .transition(&step.id, StepStatus::Decomposing, Some(detail.clone()))?;

        let fallback = current_agent(state, step);
        let started_at = Utc::now();
        let attempt_no = state.board.begin_attempt(&step.id, started_at)?;
        state.emit(WorkflowEvent::StepStarted {
            step: step.id.clone(),
            agent: fallback.clone(),
            attempt: attempt_no,
            at: started_at,
        });

        let clock = tokio::time::Instant::now();
        let mut parts = Vec::with_capacity(pieces.len());
        let mut last_agent = fallback.clone();
        for piece in &pieces {
            let agent = match self.matcher.select_agent(&piece.id, &piece.requirements) {
                Ok(selection) => selection.primary,
                Err(_) => fallback.clone(),
            };
            last_agent = agent.clone();
            state.board.note_substep(
                &piece.id,
                StepStatus::Running,
                &agent,
                format!("sub-step of {}", step.id),
            );

            let mut sub = step.clone();
            sub.id = piece.id.clone();
            sub.capability = piece.requirements.clone();
            if piece.instructions.is_some() {
                sub.instructions = piece.instructions.clone();
            }
            let mut instructions = state.instructions_for(step);
            instructions.text = sub.instructions.clone();

            let task = state.task(&sub, attempt_no);
            let from = state.handoff_source(step);
            let snapshot = Arc::new(state.context.clone());
            match self
                .handoff
                .invoke(&agent, task, &sub, from.as_deref(), snapshot, instructions)
                .await
            {
                Ok(result) => {
                    state.board.note_substep(
                        &piece.id,
                        StepStatus::Completed,
                        &agent,
                        result.summary.clone(),
                    );
                    parts.push((piece.id.clone(), result));
                }
                Err(e) => {
                    state.board.note_substep(
                        &piece.id,
                        StepStatus::Failed,
                        &agent,
                        e.to_string(),
                    );
                    let duration_ms = clock.elapsed().as_millis() as u64;
                    state.fail_step(&step.id, &agent, e.clone(), Utc::now(), duration_ms)?;
                    return Ok(Decomposition::Failed {
                        error: e,
                        agent,
                        detail: format!("{}; {} failed", detail, piece.id),
                    });
                }
            }
        }

        Ok(Decomposition::Recovered {
            result: merge_parts(&last_agent, parts),
            agent: last_agent,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            detail,
        })
    }

    async fn escalate(
        &self,
        state: &mut RunState,
        step: &StepDef,
        error: &AgentError,
        attempts: &mut Vec<RecoveryAttempt>,
    ) {
        let report = EscalationReport {
            execution_id: state.execution_id.clone(),
            step: step.id.clone(),
            error: error.clone(),
            context: state.context.clone(),
            at: Utc::now(),
        };

        let detail = match &self.escalation {
            Some(handler) => {
                handler.escalate(&report).await;
                "escalated to handler".to_string()
            }
            None => "no escalation handler configured".to_string(),
        };
        tracing::error!("[Recovery] Step '{}' escalated: {}", step.id, error);

        let agent = current_agent(state, step);
        self.record_attempt(
            state,
            attempts,
            attempt(step, RecoveryStrategy::Escalation, 1, false, &agent, detail),
        );
        state.emit(WorkflowEvent::Escalated {
            step: step.id.clone(),
            error: error.clone(),
            at: report.at,
        });
        // The first escalation of a run is the one reported.
        if state.escalation.is_none() {
            state.escalation = Some(report);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn recovered(
        &self,
        state: &mut RunState,
        step: &StepDef,
        agent: &str,
        result: AgentResult,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
        strategy: RecoveryStrategy,
        attempts: Vec<RecoveryAttempt>,
    ) -> Result<RecoveryResult, OrchestratorError> {
        state.complete_step(
            &self.handoff,
            step,
            agent,
            result.clone(),
            finished_at,
            duration_ms,
            Some(format!("recovered by {}", strategy)),
        )?;
        state.recovered = true;
        tracing::info!("[Recovery] Step '{}' recovered by {}", step.id, strategy);
        Ok(RecoveryResult {
            recovered: true,
            strategy_used: Some(strategy),
            attempts,
            result: Some(result),
            final_error: None,
        })
    }

    fn record_attempt(
        &self,
        state: &mut RunState,
        attempts: &mut Vec<RecoveryAttempt>,
        attempt: RecoveryAttempt,
    ) {
        state.metrics.recovery_attempts.push(attempt.clone());
        state.emit(WorkflowEvent::RecoveryAttempted {
            attempt: attempt.clone(),
        });
        attempts.push(attempt);
    }
}

enum Decomposition {
    Recovered {
        result: AgentResult,
        agent: String,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
        detail: String,
    },
    NotSplit {
        detail: String,
    },
    Failed {
        error: AgentError,
        agent: String,
        detail: String,
    },
}

fn current_agent(state: &RunState, step: &StepDef) -> String {
    state.board.agent(&step.id).unwrap_or_default().to_string()
}

fn attempt(
    step: &StepDef,
    strategy: RecoveryStrategy,
    n: u32,
    succeeded: bool,
    agent: &str,
    detail: String,
) -> RecoveryAttempt {
    RecoveryAttempt {
        step: step.id.clone(),
        strategy,
        attempt: n,
        succeeded,
        agent: (!agent.is_empty()).then(|| agent.to_string()),
        detail,
    }
}

/// Combine sub-step results: outputs keyed by sub-step id, summaries joined,
/// decisions and limitations concatenated.
fn merge_parts(agent: &str, parts: Vec<(String, AgentResult)>) -> AgentResult {
    let mut output = serde_json::Map::new();
    let mut summaries = Vec::new();
    let mut merged = AgentResult::new(agent, "");
    for (id, part) in parts {
        summaries.push(part.summary);
        merged.decisions.extend(part.decisions);
        merged.limitations.extend(part.limitations);
        if let serde_json::Value::Object(fields) = &part.output {
            for (k, v) in fields {
                output.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        output.insert(id, part.output);
    }
    merged.summary = summaries.join("; ");
    merged.output = serde_json::Value::Object(output);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_output_decomposer_splits_per_output() {
        let step = StepDef::new(
            "build",
            CapabilityQuery::new("implementation").with_outputs(&["api", "ui"]),
        );
        let ctx = WorkflowContext::new(crate::models::FeatureSpec::new("F", "f"));
        let pieces = OutputDecomposer
            .decompose(&step, &AgentError::task_complexity("too big"), &ctx)
            .await;
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].id, "build.api");
        assert_eq!(pieces[1].requirements.outputs, vec!["ui"]);
        assert_eq!(pieces[1].instructions.as_deref(), Some("Deliver only: ui"));

        let single = StepDef::new("x", CapabilityQuery::new("implementation").with_outputs(&["api"]));
        assert!(OutputDecomposer
            .decompose(&single, &AgentError::task_complexity("too big"), &ctx)
            .await
            .is_empty());
    }

    #[test]
    fn test_saga_drains_newest_first() {
        let mut saga = SagaLog::new();
        saga.record("a", "dev", None, Utc::now());
        saga.record("b", "dev", Some("revert".into()), Utc::now());
        assert_eq!(saga.completed_steps(), vec!["a", "b"]);

        let drained = saga.drain_reverse();
        assert_eq!(drained[0].step, "b");
        assert_eq!(drained[1].step, "a");
        assert!(saga.is_empty());
        assert!(saga.drain_reverse().is_empty());
    }

    #[test]
    fn test_merge_parts_keeps_every_output() {
        let merged = merge_parts(
            "dev",
            vec![
                (
                    "s.api".into(),
                    AgentResult::new("dev", "api done")
                        .with_output(json!({"endpoints": 3}))
                        .with_decision("REST"),
                ),
                (
                    "s.ui".into(),
                    AgentResult::new("fe", "ui done").with_output(json!({"pages": 2})),
                ),
            ],
        );
        assert_eq!(merged.summary, "api done; ui done");
        assert_eq!(merged.output["endpoints"], 3);
        assert_eq!(merged.output["s.ui"]["pages"], 2);
        assert_eq!(merged.decisions, vec!["REST"]);
    }
}
