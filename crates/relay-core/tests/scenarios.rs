//! End-to-end runs of the orchestrator against scripted agents.
//!
//! Each agent follows a script: per-step delays, queued failures, outputs,
//! and compensations it refuses. Every call lands in a shared journal so the
//! tests can check what ran and in what order.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use relay_core::agents::{AgentInvocation, CompensationRequest};
use relay_core::config::GateFailurePolicy;
use relay_core::models::{
    AgentDescriptor, AgentResult, CompensationOutcome, ContextDisposition, EscalationReport,
    ExecutionStatus, FeatureSpec, RecoveryStrategy, StepStatus, ValidationOutcome,
    WorkflowContext,
};
use relay_core::{
    Agent, AgentError, CapabilityRegistry, Database, EngineConfig, EscalationHandler,
    ExecutionStore, Orchestrator, OrchestratorError, QualityValidator, WorkflowDefinition,
};

type Journal = Arc<Mutex<Vec<String>>>;

struct Script {
    name: String,
    journal: Journal,
    delays: HashMap<String, u64>,
    failures: Mutex<HashMap<String, VecDeque<AgentError>>>,
    outputs: HashMap<String, Value>,
    refuse_compensation: HashSet<String>,
    /// Fail with task_complexity whenever more than one output is requested
    single_output_only: bool,
}

impl Script {
    fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            delays: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            outputs: HashMap::new(),
            refuse_compensation: HashSet::new(),
            single_output_only: false,
        }
    }

    fn delay(mut self, step: &str, ms: u64) -> Self {
        self.delays.insert(step.to_string(), ms);
        self
    }

    fn fail(mut self, step: &str, error: AgentError) -> Self {
        self.failures
            .get_mut()
            .unwrap()
            .entry(step.to_string())
            .or_default()
            .push_back(error);
        self
    }

    fn output(mut self, step: &str, value: Value) -> Self {
        self.outputs.insert(step.to_string(), value);
        self
    }

    fn refuse_compensation(mut self, step: &str) -> Self {
        self.refuse_compensation.insert(step.to_string());
        self
    }

    fn single_output_only(mut self) -> Self {
        self.single_output_only = true;
        self
    }
}

#[async_trait]
impl Agent for Script {
    async fn execute(&self, invocation: AgentInvocation) -> Result<AgentResult, AgentError> {
        let step = invocation.task.step.clone();
        self.journal
            .lock()
            .unwrap()
            .push(format!("exec:{}:{}", step, self.name));

        if let Some(ms) = self.delays.get(&step) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        let queued = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&step)
            .and_then(|q| q.pop_front());
        if let Some(error) = queued {
            return Err(error);
        }
        if self.single_output_only && invocation.task.requirements.outputs.len() > 1 {
            return Err(AgentError::task_complexity("too many deliverables at once"));
        }

        let mut output = self.outputs.get(&step).cloned().unwrap_or_else(|| json!({}));
        if !invocation.instructions.inputs.is_empty() {
            output["received"] = json!(invocation.instructions.inputs);
        }
        Ok(AgentResult::new(&self.name, format!("{} done", step))
            .with_output(output)
            .with_decision(format!("{} decided", step)))
    }

    async fn compensate(&self, request: CompensationRequest) -> Result<(), AgentError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("comp:{}:{}", request.step, request.action));
        if self.refuse_compensation.contains(&request.step) {
            return Err(AgentError::failed("rollback refused"));
        }
        Ok(())
    }
}

struct Fixed(bool);

#[async_trait]
impl QualityValidator for Fixed {
    async fn validate(
        &self,
        _criteria: &[String],
        artifacts: &BTreeMap<String, AgentResult>,
    ) -> Result<ValidationOutcome, AgentError> {
        if self.0 {
            Ok(ValidationOutcome::pass(format!("{} artifacts reviewed", artifacts.len())))
        } else {
            Ok(ValidationOutcome::fail("coverage below threshold"))
        }
    }
}

#[derive(Default)]
struct Inbox(Mutex<Vec<EscalationReport>>);

#[async_trait]
impl EscalationHandler for Inbox {
    async fn escalate(&self, report: &EscalationReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

fn context() -> WorkflowContext {
    WorkflowContext::new(FeatureSpec::new("FEAT-7", "User login").with_criterion("users can log in"))
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal, prefix: &str) -> Vec<String> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

fn sequential_workflow() -> WorkflowDefinition {
    WorkflowDefinition::from_yaml(
        r#"
name: login-feature
phases:
  - name: build
    strategy: sequential
    steps:
      - id: design
        capability: { category: design }
        compensation: discard-design
      - id: implement
        capability: { category: implementation }
        depends_on: [design]
        compensation: revert-code
      - id: test
        capability: { category: testing }
        depends_on: [implement]
"#,
    )
    .unwrap()
}

// ─── Recovery ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_enhanced_retry_recovers_missing_context() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("architect").with_strengths(&["design"]),
            Arc::new(Script::new("architect", &log).output("design", json!({"api_contract": {"routes": ["/login"]}}))),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("dev")
                .with_strengths(&["implementation"])
                .with_required_inputs(&["api_contract"]),
            Arc::new(Script::new("dev", &log)),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("tester").with_strengths(&["testing"]),
            Arc::new(Script::new("tester", &log)),
        )
        .unwrap()
        .build();

    let orchestrator = Orchestrator::new(registry, EngineConfig::default());
    let execution = orchestrator
        .execute(&sequential_workflow(), context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::SucceededAfterRecovery);
    assert_eq!(
        execution.status_trail("implement"),
        vec![
            StepStatus::Running,
            StepStatus::Failed,
            StepStatus::Retrying,
            StepStatus::Completed
        ]
    );
    assert_eq!(execution.step("implement").unwrap().attempts, 2);
    assert_eq!(
        execution.context.supplements().get("api_contract"),
        Some(&json!({"routes": ["/login"]}))
    );

    let attempts = &execution.metrics.recovery_attempts;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].strategy, RecoveryStrategy::EnhancedRetry);
    assert!(attempts[0].succeeded);
    assert!(attempts[0].detail.contains("api_contract from design"));

    // Validation failed before the agent ran, so it ran exactly once.
    assert_eq!(entries(&log, "exec:implement"), vec!["exec:implement:dev"]);
    assert!(execution.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(execution.context.disposition(), &ContextDisposition::Archived);
}

#[tokio::test]
async fn test_alternate_agent_takes_over_on_mismatch() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("architect").with_strengths(&["design"]),
            Arc::new(Script::new("architect", &log)),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("backend").with_strengths(&["implementation"]),
            Arc::new(
                Script::new("backend", &log)
                    .fail("implement", AgentError::capability_mismatch("needs a UI specialist")),
            ),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("fullstack").with_capabilities(&["implementation"]),
            Arc::new(Script::new("fullstack", &log)),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("tester").with_strengths(&["testing"]),
            Arc::new(Script::new("tester", &log)),
        )
        .unwrap()
        .build();

    let execution = Orchestrator::new(registry, EngineConfig::default())
        .execute(&sequential_workflow(), context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::SucceededAfterRecovery);
    let implement = execution.step("implement").unwrap();
    assert_eq!(implement.agent.as_deref(), Some("fullstack"));
    assert_eq!(
        execution.status_trail("implement"),
        vec![
            StepStatus::Running,
            StepStatus::Failed,
            StepStatus::Reassigned,
            StepStatus::Completed
        ]
    );
    assert_eq!(
        execution.context.artifact("implement").unwrap().agent,
        "fullstack"
    );
    assert_eq!(
        entries(&log, "exec:implement"),
        vec!["exec:implement:backend", "exec:implement:fullstack"]
    );
}

#[tokio::test]
async fn test_decomposition_splits_complex_step() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(
                Script::new("dev", &log)
                    .single_output_only()
                    .output("build.api", json!({"endpoints": 3})),
            ),
        )
        .unwrap()
        .build();

    let definition = WorkflowDefinition::from_yaml(
        r#"
name: split
phases:
  - name: build
    steps:
      - id: build
        capability: { category: implementation, outputs: [api, ui] }
"#,
    )
    .unwrap();

    let execution = Orchestrator::new(registry, EngineConfig::default())
        .execute(&definition, context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::SucceededAfterRecovery);
    assert!(execution
        .status_trail("build")
        .contains(&StepStatus::Decomposing));
    assert_eq!(execution.status_trail("build.api"), vec![StepStatus::Running, StepStatus::Completed]);

    let merged = execution.context.artifact("build").unwrap();
    assert_eq!(merged.output["endpoints"], 3);
    assert!(merged.output.get("build.ui").is_some());
    assert_eq!(merged.summary, "build.api done; build.ui done");
    assert_eq!(
        execution.metrics.recovery_attempts[0].strategy,
        RecoveryStrategy::TaskDecomposition
    );
}

// ─── Parallel execution and escalation ─────────────────────────────────────

fn parallel_workflow() -> WorkflowDefinition {
    WorkflowDefinition::from_yaml(
        r#"
name: parallel-build
phases:
  - name: build
    strategy: parallel
    steps:
      - id: x
        capability: { category: backend }
        compensation: drop-schema
      - id: y
        capability: { category: frontend }
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_critical_failure_compensates_and_escalates() {
    let log = journal();
    let inbox = Arc::new(Inbox::default());
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("backend").with_strengths(&["backend"]),
            Arc::new(Script::new("backend", &log).delay("x", 20)),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("frontend").with_strengths(&["frontend"]),
            Arc::new(Script::new("frontend", &log).fail("y", AgentError::failed("build server down").critical())),
        )
        .unwrap()
        .build();

    let orchestrator =
        Orchestrator::new(registry, EngineConfig::default()).with_escalation_handler(inbox.clone());
    let execution = orchestrator
        .execute(&parallel_workflow(), context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Escalated);
    assert_eq!(execution.step("x").unwrap().status, StepStatus::Compensated);
    assert_eq!(execution.step("y").unwrap().status, StepStatus::Failed);
    assert_eq!(entries(&log, "comp:"), vec!["comp:x:drop-schema"]);

    let reports = inbox.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].step, "y");
    assert!(reports[0].error.is_critical());
    assert!(reports[0].context.artifact("x").is_some());
    assert_eq!(execution.escalation.as_ref().unwrap().step, "y");

    assert!(matches!(
        execution.context.disposition(),
        ContextDisposition::RetainedFailed { .. }
    ));
    assert!(execution.steps.iter().all(|s| s.status.is_terminal()));

    let report = orchestrator.monitor().report(&execution.id).await.unwrap();
    assert_eq!(report.recovery.escalated_step.as_deref(), Some("y"));
    assert_eq!(report.summary.steps_compensated, 1);
}

#[tokio::test]
async fn test_late_critical_failure_still_escalates() {
    let log = journal();
    let inbox = Arc::new(Inbox::default());
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("backend").with_strengths(&["backend"]),
            Arc::new(Script::new("backend", &log).fail("x", AgentError::failed("flaky"))),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("frontend").with_strengths(&["frontend"]),
            Arc::new(
                Script::new("frontend", &log)
                    .delay("y", 30)
                    .fail("y", AgentError::failed("disk gone").critical()),
            ),
        )
        .unwrap()
        .build();

    let orchestrator =
        Orchestrator::new(registry, EngineConfig::default()).with_escalation_handler(inbox.clone());
    let execution = orchestrator
        .execute(&parallel_workflow(), context())
        .await
        .unwrap();

    // x settles first, but y's critical error decides the outcome.
    assert_eq!(execution.status, ExecutionStatus::Escalated);
    assert_eq!(execution.escalation.as_ref().unwrap().step, "y");
    assert_eq!(execution.step("x").unwrap().status, StepStatus::Failed);
    assert_eq!(execution.step("y").unwrap().status, StepStatus::Failed);
    assert!(execution.failure.as_deref().unwrap().contains("disk gone"));

    let reports = inbox.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].step, "y");
}

#[tokio::test(start_paused = true)]
async fn test_parallel_group_wall_time_is_the_slowest_member() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(
                Script::new("dev", &log)
                    .delay("a", 100)
                    .delay("b", 200)
                    .delay("c", 300),
            ),
        )
        .unwrap()
        .build();

    let definition = WorkflowDefinition::from_yaml(
        r#"
name: fan-out
phases:
  - name: build
    strategy: parallel
    steps:
      - { id: a, capability: { category: implementation } }
      - { id: b, capability: { category: implementation } }
      - { id: c, capability: { category: implementation } }
"#,
    )
    .unwrap();

    let orchestrator = Orchestrator::new(registry, EngineConfig::default());
    let execution = orchestrator.execute(&definition, context()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    let group = &execution.metrics.groups[0];
    assert_eq!(group.members, vec!["a", "b", "c"]);
    assert!(group.wall_ms >= 300 && group.wall_ms < 400, "wall {}", group.wall_ms);
    assert!(group.busy_ms >= 600, "busy {}", group.busy_ms);

    let report = orchestrator.monitor().report(&execution.id).await.unwrap();
    assert!(report.performance.parallel_speedup >= 1.5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_serializes_group() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log).delay("a", 100).delay("b", 100)),
        )
        .unwrap()
        .build();
    let definition = WorkflowDefinition::from_yaml(
        r#"
name: narrow
phases:
  - name: build
    strategy: parallel
    steps:
      - { id: a, capability: { category: implementation } }
      - { id: b, capability: { category: implementation } }
"#,
    )
    .unwrap();

    let config = EngineConfig {
        concurrency_limit: 1,
        ..Default::default()
    };
    let execution = Orchestrator::new(registry, config)
        .execute(&definition, context())
        .await
        .unwrap();

    assert!(execution.metrics.groups[0].wall_ms >= 200);
}

fn narrow_workflow() -> WorkflowDefinition {
    WorkflowDefinition::from_yaml(
        r#"
name: narrow
phases:
  - name: build
    strategy: parallel
    steps:
      - { id: a, capability: { category: implementation } }
      - { id: b, capability: { category: implementation } }
"#,
    )
    .unwrap()
}

fn one_at_a_time() -> EngineConfig {
    EngineConfig {
        concurrency_limit: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_unstarted_member_is_skipped_when_group_fails() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log).fail("a", AgentError::failed("disk full"))),
        )
        .unwrap()
        .build();

    let execution = Orchestrator::new(registry, one_at_a_time())
        .execute(&narrow_workflow(), context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::FailedAndCompensated);
    assert_eq!(execution.step("a").unwrap().status, StepStatus::Failed);
    assert_eq!(execution.step("b").unwrap().status, StepStatus::Skipped);
    assert_eq!(execution.status_trail("b"), vec![StepStatus::Skipped]);
    assert!(entries(&log, "exec:b").is_empty());
}

#[tokio::test]
async fn test_unstarted_member_runs_after_recovery() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(
                Script::new("dev", &log)
                    .fail("a", AgentError::context_insufficient(vec!["api_contract".into()])),
            ),
        )
        .unwrap()
        .build();

    let execution = Orchestrator::new(registry, one_at_a_time())
        .execute(&narrow_workflow(), context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::SucceededAfterRecovery);
    assert_eq!(
        execution.status_trail("a"),
        vec![
            StepStatus::Running,
            StepStatus::Failed,
            StepStatus::Retrying,
            StepStatus::Completed
        ]
    );
    assert_eq!(
        execution.status_trail("b"),
        vec![
            StepStatus::Skipped,
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Completed
        ]
    );
    assert_eq!(entries(&log, "exec:b"), vec!["exec:b:dev"]);
    assert_eq!(execution.context.artifacts().len(), 2);
}

// ─── Compensation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_compensation_runs_newest_first_and_survives_failures() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(
                Script::new("dev", &log)
                    .refuse_compensation("c")
                    .fail("d", AgentError::failed("disk full")),
            ),
        )
        .unwrap()
        .build();

    let definition = WorkflowDefinition::from_yaml(
        r#"
name: chain
phases:
  - name: build
    steps:
      - { id: a, capability: { category: implementation }, compensation: undo-a }
      - { id: b, capability: { category: implementation }, depends_on: [a] }
      - { id: c, capability: { category: implementation }, depends_on: [b], compensation: undo-c }
      - { id: d, capability: { category: implementation }, depends_on: [c] }
      - { id: e, capability: { category: implementation }, depends_on: [d] }
"#,
    )
    .unwrap();

    let execution = Orchestrator::new(registry, EngineConfig::default())
        .execute(&definition, context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::FailedAndCompensated);
    assert_eq!(entries(&log, "comp:"), vec!["comp:c:undo-c", "comp:a:undo-a"]);

    let compensated: Vec<&str> = execution
        .metrics
        .compensations
        .iter()
        .map(|c| c.step.as_str())
        .collect();
    assert_eq!(compensated, vec!["c", "b", "a"]);
    assert!(matches!(
        execution.metrics.compensations[0].outcome,
        CompensationOutcome::Failed { .. }
    ));
    assert_eq!(execution.metrics.compensations[1].outcome, CompensationOutcome::NoAction);

    assert_eq!(execution.step("a").unwrap().status, StepStatus::Compensated);
    assert_eq!(execution.step("b").unwrap().status, StepStatus::Compensated);
    assert_eq!(execution.step("c").unwrap().status, StepStatus::CompensationFailed);
    assert_eq!(execution.step("d").unwrap().status, StepStatus::Failed);
    assert_eq!(execution.step("e").unwrap().status, StepStatus::Skipped);
    assert!(execution.failure.as_deref().unwrap().contains("disk full"));
    assert!(execution.escalation.is_none());
}

// ─── Quality gates ─────────────────────────────────────────────────────────

fn gated(policy: GateFailurePolicy) -> (Orchestrator, WorkflowDefinition) {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log)),
        )
        .unwrap()
        .register_validator("lint", Arc::new(Fixed(true)))
        .register_validator("coverage", Arc::new(Fixed(false)))
        .build();
    let definition = WorkflowDefinition::from_yaml(
        r#"
name: gated
phases:
  - name: build
    steps:
      - { id: a, capability: { category: implementation }, compensation: undo-a }
  - name: ship
    steps:
      - { id: b, capability: { category: implementation } }
quality_gates:
  - name: review
    phase: build
    validators: [lint, coverage]
    criteria: ["tests cover new code"]
"#,
    )
    .unwrap();
    let config = EngineConfig {
        gate_failure: policy,
        ..Default::default()
    };
    (Orchestrator::new(registry, config), definition)
}

#[tokio::test]
async fn test_failed_gate_halts_the_run() {
    let (orchestrator, definition) = gated(GateFailurePolicy::Halt);
    let execution = orchestrator.execute(&definition, context()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::FailedAndCompensated);
    assert_eq!(execution.failure.as_deref(), Some("quality gate 'review' failed"));
    assert_eq!(execution.step("a").unwrap().status, StepStatus::Compensated);
    assert_eq!(execution.step("b").unwrap().status, StepStatus::Skipped);

    let gate = &execution.metrics.gate_results[0];
    assert!(!gate.passed);
    assert_eq!(gate.passed_checks(), 1);
}

#[tokio::test]
async fn test_failed_gate_is_recorded_under_record_policy() {
    let (orchestrator, definition) = gated(GateFailurePolicy::Record);
    let execution = orchestrator.execute(&definition, context()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(!execution.metrics.gate_results[0].passed);

    let report = orchestrator.monitor().report(&execution.id).await.unwrap();
    assert_eq!(report.quality.gates_failed, 1);
    assert_eq!(report.quality.overall_score, 50.0);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("review")));
}

// ─── Domain chain ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_domain_chain_injects_named_inputs() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log).output("schema", json!({"tables": ["users"]}))),
        )
        .unwrap()
        .build();
    let definition = WorkflowDefinition::from_yaml(
        r#"
name: chain
phases:
  - name: data
    strategy: domain_chain
    steps:
      - { id: schema, capability: { category: implementation } }
      - id: api
        capability: { category: implementation }
        inputs: { tables: schema.tables }
"#,
    )
    .unwrap();

    let execution = Orchestrator::new(registry, EngineConfig::default())
        .execute(&definition, context())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    let api = execution.context.artifact("api").unwrap();
    assert_eq!(api.output["received"]["tables"], json!(["users"]));
    assert_eq!(entries(&log, "exec:"), vec!["exec:schema:dev", "exec:api:dev"]);
}

// ─── Fatal definitions ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_cycle_is_rejected_before_anything_runs() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log)),
        )
        .unwrap()
        .build();
    let definition = WorkflowDefinition::from_yaml(
        r#"
name: loop
phases:
  - name: build
    steps:
      - { id: a, capability: { category: implementation }, depends_on: [b] }
      - { id: b, capability: { category: implementation }, depends_on: [a] }
"#,
    )
    .unwrap();

    let orchestrator = Orchestrator::new(registry, EngineConfig::default());
    let err = orchestrator.execute(&definition, context()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CyclicDependency { .. }));
    assert!(log.lock().unwrap().is_empty());
    assert!(orchestrator.monitor().executions().await.is_empty());
}

#[tokio::test]
async fn test_no_capable_agent_is_fatal() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log)),
        )
        .unwrap()
        .build();
    let definition = WorkflowDefinition::from_yaml(
        r#"
name: unmatched
phases:
  - name: ops
    steps:
      - { id: deploy, capability: { category: deployment } }
"#,
    )
    .unwrap();

    let err = Orchestrator::new(registry, EngineConfig::default())
        .execute(&definition, context())
        .await
        .unwrap_err();
    match err {
        OrchestratorError::NoCapableAgent { step, best_confidence, .. } => {
            assert_eq!(step, "deploy");
            assert_eq!(best_confidence, 0.0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_initial_artifact_for_a_step_is_rejected() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log)),
        )
        .unwrap()
        .build();
    let definition = WorkflowDefinition::from_yaml(
        r#"
name: seeded
phases:
  - name: build
    steps:
      - { id: a, capability: { category: implementation }, compensation: undo-a }
      - { id: b, capability: { category: implementation }, depends_on: [a] }
"#,
    )
    .unwrap();
    let mut ctx = context();
    ctx.commit_artifact("b", AgentResult::new("someone", "already there"))
        .unwrap();

    let orchestrator = Orchestrator::new(registry, EngineConfig::default());
    let err = orchestrator.execute(&definition, ctx).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::InvalidDefinition(ref m) if m.contains("'b'")));
    assert!(log.lock().unwrap().is_empty());
    assert!(orchestrator.monitor().executions().await.is_empty());
}

// ─── Monitoring and archive ────────────────────────────────────────────────

#[tokio::test]
async fn test_report_is_stable_and_execution_archived() {
    let log = journal();
    let registry = CapabilityRegistry::builder()
        .register(
            AgentDescriptor::new("architect").with_strengths(&["design"]),
            Arc::new(Script::new("architect", &log)),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("dev").with_strengths(&["implementation"]),
            Arc::new(Script::new("dev", &log)),
        )
        .unwrap()
        .register(
            AgentDescriptor::new("tester").with_strengths(&["testing"]),
            Arc::new(Script::new("tester", &log)),
        )
        .unwrap()
        .build();

    let store = ExecutionStore::new(Database::open_in_memory().unwrap());
    let orchestrator =
        Orchestrator::new(registry, EngineConfig::default()).with_store(store.clone());
    let execution = orchestrator
        .execute(&sequential_workflow(), context())
        .await
        .unwrap();

    let first = orchestrator.monitor().report(&execution.id).await.unwrap();
    let second = orchestrator.monitor().report(&execution.id).await.unwrap();
    assert_eq!(first, second);
    assert!(first.summary.complete);
    assert_eq!(first.summary.agent_count, 3);
    assert_eq!(first.summary.steps_completed, 3);
    assert_eq!(first.performance.critical_path, vec!["design", "implement", "test"]);

    let archived = store.get(&execution.id).await.unwrap().unwrap();
    assert_eq!(archived.status, ExecutionStatus::Succeeded);
    assert_eq!(archived.steps.len(), 3);
    assert_eq!(store.list(10).await.unwrap()[0].id, execution.id);

    // Handoff notes carried the previous step's decisions.
    let implement = execution.context.artifact("implement").unwrap();
    assert_eq!(implement.agent, "dev");
    assert_eq!(execution.history.len(), 6);
}
