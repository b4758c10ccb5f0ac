//! Workflow orchestrator.
//!
//! ```text
//!  plan ──► phases in order ──► groups in order ──► barrier ──► gates
//!                                   │                  │
//!                                   │   (failure)      ▼
//!                                   └────────────► recovery ──► compensate
//! ```
//!
//! Members of a group run against one shared context snapshot. Their results
//! are committed one at a time, in completion order, once the whole group has
//! settled.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::agents::{AgentSelection, CapabilityMatcher, CapabilityRegistry};
use crate::config::{EngineConfig, GateFailurePolicy};
use crate::error::{AgentError, OrchestratorError};
use crate::events::{EventSink, WorkflowEvent};
use crate::gates::QualityGateOrchestrator;
use crate::handoff::ContextPreservationManager;
use crate::models::{
    AgentResult, ExecutionMetrics, ExecutionStatus, GroupTiming, QualityGate, StepStatus,
    WorkflowContext, WorkflowExecution,
};
use crate::monitor::WorkflowMonitor;
use crate::recovery::{
    ContextProvider, EscalationHandler, RecoveryManager, SagaLog, TaskDecomposer,
};
use crate::store::ExecutionStore;
use crate::workflow::graph::{CriticalPath, DependencyGraph};
use crate::workflow::schema::{ExecutionStrategy, WorkflowDefinition};
use crate::workflow::state::{RunState, StepBoard};

// ─── Plan ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAssignment {
    pub step: String,
    pub phase: String,
    pub selection: AgentSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPhase {
    pub name: String,
    pub strategy: ExecutionStrategy,
    /// Execution groups in run order; members of one group run concurrently
    pub groups: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub workflow: String,
    pub assignments: Vec<StepAssignment>,
    pub phases: Vec<PlannedPhase>,
    pub critical_path: CriticalPath,
    /// Sum over groups of the slowest member's estimate
    pub estimated_duration_secs: u64,
    /// Groups with more than one member
    pub parallel_groups: usize,
}

impl ExecutionPlan {
    pub fn assignment(&self, step: &str) -> Option<&StepAssignment> {
        self.assignments.iter().find(|a| a.step == step)
    }
}

// ─── Orchestrator ──────────────────────────────────────────────────────────

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    config: EngineConfig,
    matcher: CapabilityMatcher,
    handoff: ContextPreservationManager,
    gates: QualityGateOrchestrator,
    recovery: RecoveryManager,
    monitor: WorkflowMonitor,
    store: Option<ExecutionStore>,
}

impl Orchestrator {
    pub fn new(registry: Arc<CapabilityRegistry>, config: EngineConfig) -> Self {
        let matcher = CapabilityMatcher::new(
            registry.clone(),
            config.match_weights.clone(),
            config.min_confidence,
        );
        let handoff = ContextPreservationManager::new(registry.clone(), config.default_step_timeout());
        let gates = QualityGateOrchestrator::new(registry.clone(), config.default_step_timeout());
        let recovery =
            RecoveryManager::new(registry.clone(), matcher.clone(), handoff.clone(), &config);
        Self {
            registry,
            config,
            matcher,
            handoff,
            gates,
            recovery,
            monitor: WorkflowMonitor::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: ExecutionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_monitor(mut self, monitor: WorkflowMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.recovery = self.recovery.with_context_provider(provider);
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn TaskDecomposer>) -> Self {
        self.recovery = self.recovery.with_decomposer(decomposer);
        self
    }

    pub fn with_escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.recovery = self.recovery.with_escalation_handler(handler);
        self
    }

    pub fn monitor(&self) -> &WorkflowMonitor {
        &self.monitor
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a definition and assign an agent to every step. Nothing runs.
    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan, OrchestratorError> {
        self.prepare(definition, &definition.quality_gates)
            .map(|(plan, _)| plan)
    }

    fn prepare(
        &self,
        definition: &WorkflowDefinition,
        gates: &[QualityGate],
    ) -> Result<(ExecutionPlan, DependencyGraph), OrchestratorError> {
        let graph = DependencyGraph::build(definition)?;
        self.validate_gates(definition, gates)?;

        let mut assignments = Vec::with_capacity(graph.len());
        for (phase_idx, step) in definition.steps() {
            let selection = self.matcher.select_agent(&step.id, &step.capability)?;
            assignments.push(StepAssignment {
                step: step.id.clone(),
                phase: definition.phases[phase_idx].name.clone(),
                selection,
            });
        }

        let mut phases = Vec::with_capacity(definition.phases.len());
        let mut estimated_duration_secs = 0;
        let mut parallel_groups = 0;
        for phase in &definition.phases {
            let ids: Vec<String> = phase.steps.iter().map(|s| s.id.clone()).collect();
            let groups: Vec<Vec<String>> = match phase.strategy {
                ExecutionStrategy::Sequential => graph
                    .topological_order(&ids)
                    .into_iter()
                    .map(|id| vec![id])
                    .collect(),
                ExecutionStrategy::Parallel => graph.levels(&ids),
                ExecutionStrategy::DomainChain => ids.into_iter().map(|id| vec![id]).collect(),
            };
            for group in &groups {
                if group.len() > 1 {
                    parallel_groups += 1;
                }
                estimated_duration_secs += group
                    .iter()
                    .filter_map(|id| graph.node(id))
                    .map(|n| n.estimate_secs)
                    .max()
                    .unwrap_or(0);
            }
            phases.push(PlannedPhase {
                name: phase.name.clone(),
                strategy: phase.strategy,
                groups,
            });
        }

        let plan = ExecutionPlan {
            workflow: definition.name.clone(),
            assignments,
            phases,
            critical_path: graph.critical_path(),
            estimated_duration_secs,
            parallel_groups,
        };
        Ok((plan, graph))
    }

    fn validate_gates(
        &self,
        definition: &WorkflowDefinition,
        gates: &[QualityGate],
    ) -> Result<(), OrchestratorError> {
        for gate in gates {
            if let Some(missing) = gate
                .validators
                .iter()
                .find(|v| !self.registry.has_validator(v))
            {
                return Err(OrchestratorError::InvalidDefinition(format!(
                    "quality gate '{}' uses unregistered validator '{}'",
                    gate.name, missing
                )));
            }
            if let Some(phase) = &gate.phase {
                if !definition.phases.iter().any(|p| &p.name == phase) {
                    return Err(OrchestratorError::InvalidDefinition(format!(
                        "quality gate '{}' runs after unknown phase '{}'",
                        gate.name, phase
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run a workflow to a terminal outcome.
    ///
    /// Definition problems (cycles, unknown references, no capable agent,
    /// initial artifacts that collide with step ids) are returned as `Err`
    /// before any step starts. Anything that goes wrong after that, engine
    /// errors included, ends up in the returned execution's status.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        context: WorkflowContext,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let mut context = context;
        for gate in &definition.quality_gates {
            if !context.quality_gates.iter().any(|g| g.name == gate.name) {
                context.quality_gates.push(gate.clone());
            }
        }
        let (plan, _graph) = self.prepare(definition, &context.quality_gates)?;
        Self::validate_context(definition, &context)?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let (events, rx) = EventSink::channel(&execution_id);
        let drain = self.monitor.spawn_drain(rx);

        let assignments: BTreeMap<String, String> = plan
            .assignments
            .iter()
            .map(|a| (a.step.clone(), a.selection.primary.clone()))
            .collect();

        let started_at = Utc::now();
        let mut state = RunState {
            execution_id: execution_id.clone(),
            workflow: definition.name.clone(),
            started_at,
            board: StepBoard::new(definition, &assignments),
            context,
            saga: SagaLog::new(),
            metrics: ExecutionMetrics {
                estimated_critical_path_ms: plan.critical_path.estimated_secs * 1000,
                ..Default::default()
            },
            events,
            recovered: false,
            escalation: None,
        };

        tracing::info!(
            "[Orchestrator] Starting '{}' ({} steps, {} phases) as {}",
            definition.name,
            definition.step_count(),
            plan.phases.len(),
            execution_id
        );
        state.emit(WorkflowEvent::ExecutionStarted {
            workflow: definition.name.clone(),
            at: started_at,
        });
        state.emit(WorkflowEvent::PlanReady {
            steps: definition.step_count(),
            parallel_groups: plan.parallel_groups,
            critical_path: plan.critical_path.steps.clone(),
            estimated_secs: plan.critical_path.estimated_secs,
        });

        let clock = Instant::now();
        let failure = match self.run_phases(&mut state, definition, &plan).await {
            Ok(failure) => failure,
            Err(e) => Some(Self::engine_failure(&mut state, &e)),
        };

        if let Some(reason) = &failure {
            tracing::warn!("[Orchestrator] Aborting {}: {}", execution_id, reason);
            for id in state.board.ids_with_status(StepStatus::Pending) {
                if let Err(e) = state.skip_step(&id, "execution aborted") {
                    tracing::warn!("[Orchestrator] Could not skip '{}': {}", id, e);
                }
            }
            self.recovery.compensate(&mut state).await;
        }

        let status = match (&failure, &state.escalation) {
            (Some(_), Some(_)) => ExecutionStatus::Escalated,
            (Some(_), None) => ExecutionStatus::FailedAndCompensated,
            (None, _) if state.recovered => ExecutionStatus::SucceededAfterRecovery,
            (None, _) => ExecutionStatus::Succeeded,
        };
        match &failure {
            None => state.context.mark_archived(),
            Some(reason) => state.context.mark_failed(reason.clone()),
        }

        let ended_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;
        state.emit(WorkflowEvent::ExecutionFinished {
            status,
            at: ended_at,
            duration_ms,
        });
        tracing::info!(
            "[Orchestrator] '{}' finished as {} in {}ms",
            definition.name,
            status,
            duration_ms
        );

        let RunState {
            context,
            board,
            metrics,
            events,
            escalation,
            ..
        } = state;
        drop(events);
        if let Err(e) = drain.await {
            tracing::error!("[Orchestrator] Event drain for {} failed: {}", execution_id, e);
        }

        let (steps, history) = board.into_parts();
        let execution = WorkflowExecution {
            id: execution_id,
            workflow: definition.name.clone(),
            started_at,
            ended_at: Some(ended_at),
            status,
            steps,
            history,
            metrics,
            context,
            escalation,
            failure,
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.archive(&execution).await {
                tracing::error!(
                    "[Orchestrator] Failed to archive execution {}: {}",
                    execution.id,
                    e
                );
            }
        }

        Ok(execution)
    }

    /// Artifacts already in the initial context must not collide with the
    /// steps about to produce them.
    fn validate_context(
        definition: &WorkflowDefinition,
        context: &WorkflowContext,
    ) -> Result<(), OrchestratorError> {
        match definition
            .steps()
            .map(|(_, step)| step)
            .find(|step| context.artifact(&step.id).is_some())
        {
            Some(step) => Err(OrchestratorError::InvalidDefinition(format!(
                "initial context already holds an artifact for step '{}'",
                step.id
            ))),
            None => Ok(()),
        }
    }

    /// Every phase, its groups and gates, then the unbound gates. Returns the
    /// reason to abort, if any.
    async fn run_phases(
        &self,
        state: &mut RunState,
        definition: &WorkflowDefinition,
        plan: &ExecutionPlan,
    ) -> Result<Option<String>, OrchestratorError> {
        for phase in &plan.phases {
            tracing::info!(
                "[Orchestrator] Phase '{}' ({}, {} group(s))",
                phase.name,
                phase.strategy,
                phase.groups.len()
            );
            for group in &phase.groups {
                if let Some(reason) = self.run_group(state, definition, &phase.name, group).await? {
                    return Ok(Some(reason));
                }
            }
            if let Some(reason) = self.run_gates(state, Some(&phase.name)).await {
                return Ok(Some(reason));
            }
        }
        Ok(self.run_gates(state, None).await)
    }

    /// Turn an engine error raised mid-run into an abort reason. Steps caught
    /// in flight are failed so the run can still compensate and archive.
    fn engine_failure(state: &mut RunState, error: &OrchestratorError) -> String {
        tracing::error!(
            "[Orchestrator] Engine error in {}: {}",
            state.execution_id,
            error
        );
        let in_flight: Vec<String> = state
            .board
            .records()
            .iter()
            .filter(|r| r.status.is_in_flight())
            .map(|r| r.id.clone())
            .collect();
        for id in in_flight {
            if let Err(e) = state.board.transition(
                &id,
                StepStatus::Failed,
                Some(format!("aborted by engine error: {}", error)),
            ) {
                tracing::warn!("[Orchestrator] Could not fail '{}': {}", id, e);
            }
        }
        format!("engine error: {}", error)
    }

    /// Run one group to its barrier, recovering failures. Returns the reason
    /// to abort, if the run cannot continue.
    async fn run_group(
        &self,
        state: &mut RunState,
        definition: &WorkflowDefinition,
        phase: &str,
        group: &[String],
    ) -> Result<Option<String>, OrchestratorError> {
        let mut members: Vec<String> = group.to_vec();

        loop {
            let settled = self.dispatch(state, definition, &members).await?;
            let mut failures = self.settle(state, definition, phase, &members, settled)?;
            if failures.is_empty() {
                return Ok(None);
            }

            // Critical failures first; each is handled even once the group is lost.
            failures.sort_by_key(|(_, error)| !error.is_critical());
            let mut abort: Option<String> = None;
            for (id, error) in failures {
                if abort.is_some() && !error.is_critical() {
                    continue;
                }
                let step = definition
                    .step(&id)
                    .ok_or_else(|| OrchestratorError::InvalidDefinition(format!("unknown step '{}'", id)))?;
                let recovery = self.recovery.handle_failure(state, step, error.clone()).await?;
                if !recovery.recovered && abort.is_none() {
                    let error = recovery.final_error.unwrap_or(error);
                    abort = Some(format!("step '{}' failed: {}", id, error));
                }
            }
            if abort.is_some() {
                return Ok(abort);
            }

            // Everything recovered: members that never started get their turn.
            let skipped: Vec<String> = members
                .iter()
                .filter(|id| state.board.status(id) == Some(StepStatus::Skipped))
                .cloned()
                .collect();
            if skipped.is_empty() {
                return Ok(None);
            }
            for id in &skipped {
                state.board.transition(
                    id,
                    StepStatus::Pending,
                    Some("re-dispatched after recovery".to_string()),
                )?;
            }
            members = skipped;
        }
    }

    /// Start every pending member under the concurrency limit and wait for
    /// all of them. Once a member fails, members not yet started stay unstarted.
    async fn dispatch(
        &self,
        state: &RunState,
        definition: &WorkflowDefinition,
        members: &[String],
    ) -> Result<Settled, OrchestratorError> {
        let snapshot = Arc::new(state.context.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let cancelled = Arc::new(AtomicBool::new(false));
        let group_clock = Instant::now();

        let mut running = FuturesUnordered::new();
        for id in members {
            if state.board.status(id) != Some(StepStatus::Pending) {
                continue;
            }
            let step = definition
                .step(id)
                .ok_or_else(|| OrchestratorError::InvalidDefinition(format!("unknown step '{}'", id)))?
                .clone();
            let agent = state.board.agent(id).unwrap_or_default().to_string();
            let attempt = state.board.record(id).map(|r| r.attempts + 1).unwrap_or(1);
            let task = state.task(&step, attempt);
            let from = state.handoff_source(&step);
            let instructions = state.instructions_for(&step);

            let handoff = self.handoff.clone();
            let events = state.events.clone();
            let snapshot = snapshot.clone();
            let semaphore = semaphore.clone();
            let cancelled = cancelled.clone();

            running.push(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() || cancelled.load(Ordering::SeqCst) {
                    return Dispatched::NotStarted { step: step.id };
                }

                let started_at = Utc::now();
                events.emit(WorkflowEvent::StepStarted {
                    step: step.id.clone(),
                    agent: agent.clone(),
                    attempt,
                    at: started_at,
                });

                let clock = Instant::now();
                let outcome = handoff
                    .invoke(&agent, task, &step, from.as_deref(), snapshot, instructions)
                    .await;
                if outcome.is_err() {
                    cancelled.store(true, Ordering::SeqCst);
                }

                Dispatched::Finished(Finished {
                    step: step.id,
                    agent,
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms: clock.elapsed().as_millis() as u64,
                    outcome,
                })
            });
        }

        let mut outcomes = Vec::with_capacity(running.len());
        while let Some(dispatched) = running.next().await {
            outcomes.push(dispatched);
        }

        Ok(Settled {
            outcomes,
            wall_ms: group_clock.elapsed().as_millis() as u64,
        })
    }

    /// The barrier: apply every outcome in completion order. Returns the
    /// failures left for recovery.
    fn settle(
        &self,
        state: &mut RunState,
        definition: &WorkflowDefinition,
        phase: &str,
        members: &[String],
        settled: Settled,
    ) -> Result<Vec<(String, AgentError)>, OrchestratorError> {
        let mut failures = Vec::new();
        let mut busy_ms = 0;

        for dispatched in settled.outcomes {
            let finished = match dispatched {
                Dispatched::NotStarted { step } => {
                    state.skip_step(&step, "not started: a group member failed")?;
                    continue;
                }
                Dispatched::Finished(finished) => finished,
            };
            busy_ms += finished.duration_ms;

            state.board.begin_attempt(&finished.step, finished.started_at)?;
            state
                .board
                .transition_at(&finished.step, StepStatus::Running, finished.started_at, None)?;

            match finished.outcome {
                Ok(result) => {
                    let step = definition.step(&finished.step).ok_or_else(|| {
                        OrchestratorError::InvalidDefinition(format!(
                            "unknown step '{}'",
                            finished.step
                        ))
                    })?;
                    state.complete_step(
                        &self.handoff,
                        step,
                        &finished.agent,
                        result,
                        finished.finished_at,
                        finished.duration_ms,
                        None,
                    )?;
                }
                Err(error) => {
                    state.fail_step(
                        &finished.step,
                        &finished.agent,
                        error.clone(),
                        finished.finished_at,
                        finished.duration_ms,
                    )?;
                    failures.push((finished.step, error));
                }
            }
        }

        let timing = GroupTiming {
            phase: phase.to_string(),
            members: members.to_vec(),
            wall_ms: settled.wall_ms,
            busy_ms,
        };
        state.metrics.groups.push(timing.clone());
        state.emit(WorkflowEvent::GroupSettled { timing });

        Ok(failures)
    }

    /// Evaluate the gates bound to `phase` (or the unbound ones for `None`).
    /// Returns the reason to abort under the halt policy.
    async fn run_gates(&self, state: &mut RunState, phase: Option<&str>) -> Option<String> {
        let gates: Vec<QualityGate> = state
            .context
            .quality_gates
            .iter()
            .filter(|g| g.phase.as_deref() == phase)
            .cloned()
            .collect();

        for gate in gates {
            let artifacts = QualityGateOrchestrator::select_artifacts(&gate, &state.context);
            let result = self.gates.evaluate(&gate, &state.context, &artifacts).await;
            let passed = result.passed;
            state.metrics.gate_results.push(result.clone());
            state.emit(WorkflowEvent::GateEvaluated { result });

            if !passed && self.config.gate_failure == GateFailurePolicy::Halt {
                return Some(format!("quality gate '{}' failed", gate.name));
            }
        }
        None
    }
}

struct Finished {
    step: String,
    agent: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
    outcome: Result<AgentResult, AgentError>,
}

enum Dispatched {
    NotStarted { step: String },
    Finished(Finished),
}

struct Settled {
    outcomes: Vec<Dispatched>,
    wall_ms: u64,
}
