//! `relay run`: execute a workflow against simulated agents.

use relay_core::models::{FeatureSpec, WorkflowContext, WorkflowExecution};
use relay_core::{EngineConfig, Orchestrator, WorkflowDefinition, WorkflowReport};

use super::{open_store, print_json};
use crate::simulation::AgentsFile;

/// Inputs of one `relay run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workflow_file: String,
    pub agents_file: Option<String>,
    pub config_file: Option<String>,
    pub context_file: Option<String>,
    /// Archive database; `None` keeps the run in memory only
    pub db_path: Option<String>,
}

/// Load an engine configuration file (or defaults) and apply env overrides.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    config.with_env_overrides().map_err(|e| e.to_string())
}

/// The context a run starts from: a YAML file, or one derived from the workflow.
pub fn load_context(
    path: Option<&str>,
    workflow: &WorkflowDefinition,
) -> Result<WorkflowContext, String> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read context file '{}': {}", path, e))?;
            serde_yaml::from_str(&content)
                .map_err(|e| format!("Failed to parse context YAML: {}", e))
        }
        None => {
            let description = workflow
                .description
                .clone()
                .unwrap_or_else(|| workflow.name.clone());
            let feature = FeatureSpec::new(&workflow.name, description)
                .with_criterion(format!("every step of '{}' completes", workflow.name));
            Ok(WorkflowContext::new(feature))
        }
    }
}

/// Run a workflow and return the execution with its report.
pub async fn execute(
    options: &RunOptions,
) -> Result<(WorkflowExecution, WorkflowReport), String> {
    let workflow = WorkflowDefinition::from_file(&options.workflow_file).map_err(|e| e.to_string())?;
    let registry = AgentsFile::load(options.agents_file.as_deref())?.build_registry()?;
    let config = load_config(options.config_file.as_deref())?;
    let context = load_context(options.context_file.as_deref(), &workflow)?;

    let mut orchestrator = Orchestrator::new(registry, config);
    if let Some(db_path) = &options.db_path {
        orchestrator = orchestrator.with_store(open_store(db_path)?);
    }

    let execution = orchestrator
        .execute(&workflow, context)
        .await
        .map_err(|e| e.to_string())?;
    let report = orchestrator
        .monitor()
        .report(&execution.id)
        .await
        .ok_or_else(|| format!("No report recorded for execution {}", execution.id))?;
    Ok((execution, report))
}

/// Run a workflow and print the outcome.
pub async fn run(options: &RunOptions, json: bool) -> Result<(), String> {
    if !json {
        println!("📄 Loaded workflow: {}", options.workflow_file);
        match &options.agents_file {
            Some(path) => println!("   agents: {}", path),
            None => println!("   agents: built-in catalog"),
        }
        println!();
    }

    let (execution, report) = execute(options).await?;

    if json {
        print_json(&serde_json::json!({
            "execution": execution,
            "report": report,
        }));
    } else {
        print_execution(&execution, &report);
    }

    if execution.status.is_success() {
        if !json {
            println!("\n🎉 Workflow completed: {}", execution.status);
        }
        Ok(())
    } else {
        Err(format!(
            "Workflow ended as {}: {}",
            execution.status,
            execution.failure.as_deref().unwrap_or("no reason recorded")
        ))
    }
}

pub(crate) fn print_execution(execution: &WorkflowExecution, report: &WorkflowReport) {
    println!("Execution {} ({})", execution.id, execution.workflow);
    println!(
        "   status: {}, duration: {}ms",
        execution.status,
        execution.duration_ms().unwrap_or(0)
    );
    println!();

    for step in &execution.steps {
        println!(
            "   {:<24} {:<20} {:<20} attempts={}",
            step.id,
            step.status.as_str(),
            step.agent.as_deref().unwrap_or("-"),
            step.attempts
        );
    }

    print_report(report);

    if let Some(escalation) = &execution.escalation {
        println!();
        println!("🚨 Escalated at step '{}': {}", escalation.step, escalation.error);
    }
}

pub(crate) fn print_report(report: &WorkflowReport) {
    let performance = &report.performance;
    println!();
    println!(
        "   parallel groups: {}, speedup: {:.2}x, efficiency: {:.0}%",
        performance.parallel_groups,
        performance.parallel_speedup,
        performance.parallelization_efficiency * 100.0
    );
    if !performance.critical_path.is_empty() {
        println!(
            "   critical path: {} (~{}s)",
            performance.critical_path.join(" → "),
            performance.estimated_critical_path_secs
        );
    }

    let quality = &report.quality;
    if !quality.gates.is_empty() {
        println!(
            "   quality gates: {} passed, {} failed ({:.0}% of checks)",
            quality.gates_passed, quality.gates_failed, quality.overall_score
        );
        for gate in &quality.gates {
            let mark = if gate.passed { "✅" } else { "❌" };
            println!("     {} {}", mark, gate.gate);
        }
    }

    let recovery = &report.recovery;
    if recovery.error_count > 0 {
        println!(
            "   errors: {}, recovery attempts: {}, compensations: {} ({} failed)",
            recovery.error_count,
            recovery.attempts.len(),
            recovery.compensations.len(),
            recovery.compensation_failures
        );
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            println!("   • {}", recommendation);
        }
    }
}
