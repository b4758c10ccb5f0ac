//! Drains execution events into per-execution ledgers and
//! builds reports from them.
//!
//! ```text
//!  Orchestrator ─┐
//!  QualityGate  ─┼─► EventSink ═══ mpsc ═══► drain task ──► ledger (RwLock)
//!  Recovery     ─┘                               │
//!                                                └──► broadcast ──► observe()
//! ```
//!
//! [`WorkflowMonitor::report`] only reads a ledger. It can be called while an
//! execution is still running (the report is then partial) and returns the
//! same report every time once the execution has finished.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::{AgentError, Severity};
use crate::events::{EventEnvelope, WorkflowEvent};
use crate::models::{
    CompensationOutcome, CompensationRecord, ExecutionStatus, GroupTiming, QualityGateResult,
    RecoveryAttempt, RecoveryStrategy, StepStatus,
};

const BROADCAST_CAPACITY: usize = 1024;

/// A step slower than this multiple of the mean step duration is a bottleneck.
const BOTTLENECK_FACTOR: f64 = 1.5;

/// Below this parallelization efficiency the report suggests rebalancing.
const LOW_EFFICIENCY: f64 = 0.6;

// ─── Ledger ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ExecutionLedger {
    workflow: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    outcome: Option<ExecutionStatus>,
    duration_ms: Option<u64>,
    sequence: u64,

    planned_steps: usize,
    critical_path: Vec<String>,
    estimated_critical_path_secs: u64,

    step_status: BTreeMap<String, StepStatus>,
    step_agents: BTreeMap<String, String>,
    step_durations_ms: BTreeMap<String, u64>,
    agent_durations_ms: BTreeMap<String, u64>,
    agents_seen: BTreeSet<String>,
    groups: Vec<GroupTiming>,

    gates: Vec<QualityGateResult>,
    errors: Vec<(String, AgentError)>,
    attempts: Vec<RecoveryAttempt>,
    compensations: Vec<CompensationRecord>,
    escalation: Option<(String, AgentError)>,
}

impl ExecutionLedger {
    fn apply(&mut self, event: &WorkflowEvent) {
        self.sequence += 1;
        match event {
            WorkflowEvent::ExecutionStarted { workflow, at } => {
                self.workflow = workflow.clone();
                self.started_at = Some(*at);
            }
            WorkflowEvent::PlanReady {
                steps,
                critical_path,
                estimated_secs,
                ..
            } => {
                self.planned_steps = *steps;
                self.critical_path = critical_path.clone();
                self.estimated_critical_path_secs = *estimated_secs;
            }
            WorkflowEvent::StepStarted { step, agent, .. } => {
                self.step_status.insert(step.clone(), StepStatus::Running);
                self.step_agents.insert(step.clone(), agent.clone());
                self.agents_seen.insert(agent.clone());
            }
            WorkflowEvent::StepCompleted {
                step,
                agent,
                duration_ms,
                ..
            } => {
                self.step_status.insert(step.clone(), StepStatus::Completed);
                self.step_agents.insert(step.clone(), agent.clone());
                self.step_durations_ms.insert(step.clone(), *duration_ms);
                *self.agent_durations_ms.entry(agent.clone()).or_default() += duration_ms;
            }
            WorkflowEvent::StepFailed {
                step,
                agent,
                error,
                duration_ms,
                ..
            } => {
                self.step_status.insert(step.clone(), StepStatus::Failed);
                *self.agent_durations_ms.entry(agent.clone()).or_default() += duration_ms;
                self.errors.push((step.clone(), error.clone()));
            }
            WorkflowEvent::StepSkipped { step, .. } => {
                self.step_status.insert(step.clone(), StepStatus::Skipped);
            }
            WorkflowEvent::GroupSettled { timing } => self.groups.push(timing.clone()),
            WorkflowEvent::GateEvaluated { result } => self.gates.push(result.clone()),
            WorkflowEvent::RecoveryAttempted { attempt } => self.attempts.push(attempt.clone()),
            WorkflowEvent::Compensated { record } => {
                let status = match record.outcome {
                    CompensationOutcome::Failed { .. } => StepStatus::CompensationFailed,
                    _ => StepStatus::Compensated,
                };
                self.step_status.insert(record.step.clone(), status);
                self.compensations.push(record.clone());
            }
            WorkflowEvent::Escalated { step, error, .. } => {
                self.escalation = Some((step.clone(), error.clone()));
            }
            WorkflowEvent::ExecutionFinished {
                status,
                at,
                duration_ms,
            } => {
                self.outcome = Some(*status);
                self.ended_at = Some(*at);
                self.duration_ms = Some(*duration_ms);
            }
        }
    }
}

// ─── Report ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub summary: ReportSummary,
    pub performance: PerformanceSection,
    pub quality: QualitySection,
    pub recovery: RecoverySection,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub execution_id: String,
    pub workflow: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// False while the execution is still running
    pub complete: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionStatus>,
    pub agent_count: usize,
    pub planned_steps: usize,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub steps_compensated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bottleneck {
    pub step: String,
    pub agent: String,
    pub duration_ms: u64,
    /// Duration relative to the mean step duration
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSection {
    pub agent_durations_ms: BTreeMap<String, u64>,
    pub step_durations_ms: BTreeMap<String, u64>,
    pub bottlenecks: Vec<Bottleneck>,
    /// Groups that ran more than one step at once
    pub parallel_groups: usize,
    /// Busy time over wall time across all groups
    pub parallel_speedup: f64,
    /// Busy time over (wall time x width) across parallel groups; 1.0 is perfectly balanced
    pub parallelization_efficiency: f64,
    pub critical_path: Vec<String>,
    pub estimated_critical_path_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySection {
    pub gates: Vec<QualityGateResult>,
    pub gates_passed: usize,
    pub gates_failed: usize,
    /// Passed checks over all checks, as a percentage
    pub overall_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepErrorSummary {
    pub step: String,
    pub kind: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySection {
    pub error_count: usize,
    pub errors: Vec<StepErrorSummary>,
    pub attempts: Vec<RecoveryAttempt>,
    pub strategies_used: Vec<RecoveryStrategy>,
    pub compensations: Vec<CompensationRecord>,
    pub compensation_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_step: Option<String>,
}

// ─── Monitor ───────────────────────────────────────────────────────────────

/// Shared, cloneable handle. All clones see the same ledgers.
#[derive(Clone)]
pub struct WorkflowMonitor {
    ledgers: Arc<RwLock<HashMap<String, ExecutionLedger>>>,
    events: broadcast::Sender<EventEnvelope>,
}

impl Default for WorkflowMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowMonitor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ledgers: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Drain an execution's channel until every sender is dropped.
    pub fn spawn_drain(
        &self,
        mut rx: mpsc::UnboundedReceiver<(String, WorkflowEvent)>,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some((execution_id, event)) = rx.recv().await {
                monitor.record(&execution_id, event).await;
            }
        })
    }

    /// Apply one event to its execution's ledger and fan it out to observers.
    pub async fn record(&self, execution_id: &str, event: WorkflowEvent) {
        let sequence = {
            let mut ledgers = self.ledgers.write().await;
            let ledger = ledgers.entry(execution_id.to_string()).or_default();
            ledger.apply(&event);
            ledger.sequence
        };
        tracing::trace!(
            "[Monitor] {} #{}: {}",
            execution_id,
            sequence,
            event.event_type()
        );
        // No subscribers is fine.
        let _ = self.events.send(EventEnvelope {
            execution_id: execution_id.to_string(),
            sequence,
            event,
        });
    }

    /// Live events of every execution.
    pub fn observe_all(&self) -> impl Stream<Item = EventEnvelope> {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| item.ok())
    }

    /// Live events of one execution.
    pub fn observe(&self, execution_id: &str) -> impl Stream<Item = EventEnvelope> {
        let id = execution_id.to_string();
        self.observe_all()
            .filter(move |envelope| envelope.execution_id == id)
    }

    /// Executions this monitor has seen, sorted by id.
    pub async fn executions(&self) -> Vec<String> {
        let ledgers = self.ledgers.read().await;
        let mut ids: Vec<String> = ledgers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn report(&self, execution_id: &str) -> Option<WorkflowReport> {
        let ledgers = self.ledgers.read().await;
        ledgers
            .get(execution_id)
            .map(|ledger| build_report(execution_id, ledger))
    }

    /// Drop an execution's ledger once its report is no longer needed.
    /// Returns whether a ledger existed.
    pub async fn forget(&self, execution_id: &str) -> bool {
        let removed = self.ledgers.write().await.remove(execution_id).is_some();
        if removed {
            tracing::debug!("[Monitor] Forgot {}", execution_id);
        }
        removed
    }
}

fn build_report(execution_id: &str, ledger: &ExecutionLedger) -> WorkflowReport {
    let count = |status: StepStatus| ledger.step_status.values().filter(|s| **s == status).count();

    let summary = ReportSummary {
        execution_id: execution_id.to_string(),
        workflow: ledger.workflow.clone(),
        started_at: ledger.started_at,
        ended_at: ledger.ended_at,
        duration_ms: ledger.duration_ms,
        complete: ledger.outcome.is_some(),
        success: ledger.outcome.map(|o| o.is_success()).unwrap_or(false),
        outcome: ledger.outcome,
        agent_count: ledger.agents_seen.len(),
        planned_steps: ledger.planned_steps,
        steps_completed: count(StepStatus::Completed),
        steps_failed: count(StepStatus::Failed),
        steps_skipped: count(StepStatus::Skipped),
        steps_compensated: count(StepStatus::Compensated),
    };

    let performance = performance_section(ledger);
    let quality = quality_section(ledger);
    let recovery = recovery_section(ledger);
    let recommendations = recommendations(ledger, &performance, &recovery);

    WorkflowReport {
        summary,
        performance,
        quality,
        recovery,
        recommendations,
    }
}

fn performance_section(ledger: &ExecutionLedger) -> PerformanceSection {
    let durations = &ledger.step_durations_ms;
    let mut bottlenecks = Vec::new();
    if durations.len() > 1 {
        let mean = durations.values().sum::<u64>() as f64 / durations.len() as f64;
        if mean > 0.0 {
            for (step, &ms) in durations {
                let ratio = ms as f64 / mean;
                if ratio > BOTTLENECK_FACTOR {
                    bottlenecks.push(Bottleneck {
                        step: step.clone(),
                        agent: ledger.step_agents.get(step).cloned().unwrap_or_default(),
                        duration_ms: ms,
                        ratio: round2(ratio),
                    });
                }
            }
        }
    }
    bottlenecks.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms).then(a.step.cmp(&b.step)));

    let busy: u64 = ledger.groups.iter().map(|g| g.busy_ms).sum();
    let wall: u64 = ledger.groups.iter().map(|g| g.wall_ms).sum();
    let parallel: Vec<&GroupTiming> = ledger.groups.iter().filter(|g| g.members.len() > 1).collect();
    let parallel_busy: u64 = parallel.iter().map(|g| g.busy_ms).sum();
    let parallel_capacity: u64 = parallel
        .iter()
        .map(|g| g.wall_ms * g.members.len() as u64)
        .sum();

    PerformanceSection {
        agent_durations_ms: ledger.agent_durations_ms.clone(),
        step_durations_ms: durations.clone(),
        bottlenecks,
        parallel_groups: parallel.len(),
        parallel_speedup: ratio_or_one(busy, wall),
        parallelization_efficiency: ratio_or_one(parallel_busy, parallel_capacity),
        critical_path: ledger.critical_path.clone(),
        estimated_critical_path_secs: ledger.estimated_critical_path_secs,
    }
}

fn quality_section(ledger: &ExecutionLedger) -> QualitySection {
    let total_checks: usize = ledger.gates.iter().map(|g| g.checks.len()).sum();
    let passed_checks: usize = ledger.gates.iter().map(|g| g.passed_checks()).sum();
    let overall_score = if total_checks == 0 {
        100.0
    } else {
        (passed_checks as f64 * 1000.0 / total_checks as f64).round() / 10.0
    };
    let gates_passed = ledger.gates.iter().filter(|g| g.passed).count();

    QualitySection {
        gates: ledger.gates.clone(),
        gates_passed,
        gates_failed: ledger.gates.len() - gates_passed,
        overall_score,
    }
}

fn recovery_section(ledger: &ExecutionLedger) -> RecoverySection {
    let mut strategies_used: Vec<RecoveryStrategy> = Vec::new();
    for attempt in &ledger.attempts {
        if !strategies_used.contains(&attempt.strategy) {
            strategies_used.push(attempt.strategy);
        }
    }

    RecoverySection {
        error_count: ledger.errors.len(),
        errors: ledger
            .errors
            .iter()
            .map(|(step, e)| StepErrorSummary {
                step: step.clone(),
                kind: e.kind.as_str().to_string(),
                severity: e.severity,
                message: e.message.clone(),
            })
            .collect(),
        attempts: ledger.attempts.clone(),
        strategies_used,
        compensations: ledger.compensations.clone(),
        compensation_failures: ledger
            .compensations
            .iter()
            .filter(|c| matches!(c.outcome, CompensationOutcome::Failed { .. }))
            .count(),
        escalated_step: ledger.escalation.as_ref().map(|(step, _)| step.clone()),
    }
}

fn recommendations(
    ledger: &ExecutionLedger,
    performance: &PerformanceSection,
    recovery: &RecoverySection,
) -> Vec<String> {
    let mut out = Vec::new();

    for gate in ledger.gates.iter().filter(|g| !g.passed) {
        if gate.recommendations.is_empty() {
            out.push(format!("Quality gate '{}' failed", gate.gate));
        } else {
            out.push(format!(
                "Quality gate '{}' failed: {}",
                gate.gate,
                gate.recommendations.join("; ")
            ));
        }
    }

    for b in &performance.bottlenecks {
        out.push(format!(
            "Step '{}' ({}) took {}ms, {:.1}x the average; consider splitting it",
            b.step, b.agent, b.duration_ms, b.ratio
        ));
    }

    if performance.parallel_groups > 0 && performance.parallelization_efficiency < LOW_EFFICIENCY {
        out.push(format!(
            "Parallel groups are unbalanced ({:.0}% efficiency); even out member workloads",
            performance.parallelization_efficiency * 100.0
        ));
    }

    let mut seen: BTreeSet<(RecoveryStrategy, &str)> = BTreeSet::new();
    for attempt in &recovery.attempts {
        if !seen.insert((attempt.strategy, attempt.step.as_str())) {
            continue;
        }
        let advice = match attempt.strategy {
            RecoveryStrategy::EnhancedRetry => "needed context enrichment; provide its inputs up front",
            RecoveryStrategy::AlternateAgent => "was reassigned; review its capability query",
            RecoveryStrategy::TaskDecomposition => "was decomposed; split it in the workflow definition",
            RecoveryStrategy::Escalation => continue,
        };
        out.push(format!("Step '{}' {}", attempt.step, advice));
    }

    for record in &recovery.compensations {
        if let CompensationOutcome::Failed { message } = &record.outcome {
            out.push(format!(
                "Compensation for '{}' failed ({}); manual cleanup may be required",
                record.step, message
            ));
        }
    }

    if let Some((step, error)) = &ledger.escalation {
        out.push(format!("Step '{}' was escalated: {}", step, error.message));
    }

    out
}

fn ratio_or_one(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        round2(numerator as f64 / denominator as f64)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
