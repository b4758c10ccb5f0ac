//! `relay validate`: plan a workflow without executing it.

use relay_core::{ExecutionPlan, Orchestrator, WorkflowDefinition};

use super::{print_serialized, run::load_config, truncate};
use crate::simulation::AgentsFile;

/// Build the execution plan for a workflow file.
pub fn plan(
    workflow_file: &str,
    agents_file: Option<&str>,
    config_file: Option<&str>,
) -> Result<ExecutionPlan, String> {
    let workflow = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    let registry = AgentsFile::load(agents_file)?.build_registry()?;
    let orchestrator = Orchestrator::new(registry, load_config(config_file)?);
    orchestrator.plan(&workflow).map_err(|e| e.to_string())
}

pub fn validate(
    workflow_file: &str,
    agents_file: Option<&str>,
    config_file: Option<&str>,
    json: bool,
) -> Result<(), String> {
    let plan = plan(workflow_file, agents_file, config_file)?;
    if json {
        return print_serialized(&plan);
    }

    println!("✅ Workflow '{}' is valid", plan.workflow);
    println!(
        "   Steps: {}, parallel groups: {}, estimated: {}s",
        plan.assignments.len(),
        plan.parallel_groups,
        plan.estimated_duration_secs
    );
    println!();

    println!("┌──────────────────────┬──────────────────────┬────────────┬────────────────────┐");
    println!("│ Step                 │ Agent                │ Confidence │ Supporting         │");
    println!("├──────────────────────┼──────────────────────┼────────────┼────────────────────┤");
    for assignment in &plan.assignments {
        let selection = &assignment.selection;
        println!(
            "│ {:<20} │ {:<20} │ {:>10.2} │ {:<18} │",
            truncate(&assignment.step, 20),
            truncate(&selection.primary, 20),
            selection.confidence,
            truncate(&selection.supporting.join(","), 18)
        );
    }
    println!("└──────────────────────┴──────────────────────┴────────────┴────────────────────┘");

    println!();
    for phase in &plan.phases {
        println!("Phase '{}' ({})", phase.name, phase.strategy.as_str());
        for (i, group) in phase.groups.iter().enumerate() {
            println!("   {}. {}", i + 1, group.join(" ∥ "));
        }
    }

    println!();
    println!(
        "Critical path: {} (~{}s)",
        plan.critical_path.steps.join(" → "),
        plan.critical_path.estimated_secs
    );
    Ok(())
}
