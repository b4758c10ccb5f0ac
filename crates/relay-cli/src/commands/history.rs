//! `relay history` and `relay show`: browse archived executions.

use relay_core::models::WorkflowExecution;
use relay_core::store::ExecutionSummary;

use super::{open_store, print_serialized, truncate};

pub async fn summaries(db_path: &str, limit: usize) -> Result<Vec<ExecutionSummary>, String> {
    open_store(db_path)?
        .list(limit)
        .await
        .map_err(|e| e.to_string())
}

pub async fn fetch(db_path: &str, id: &str) -> Result<WorkflowExecution, String> {
    open_store(db_path)?
        .get(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Execution '{}' not found", id))
}

pub async fn list(db_path: &str, limit: usize, json: bool) -> Result<(), String> {
    let rows = summaries(db_path, limit).await?;
    if json {
        return print_serialized(&rows);
    }
    if rows.is_empty() {
        println!("No archived executions in {}", db_path);
        return Ok(());
    }

    println!("┌──────────────────────────────────────┬──────────────────┬──────────────────────────┬───────┬─────────────────────┐");
    println!("│ ID                                   │ Workflow         │ Status                   │ Steps │ Started             │");
    println!("├──────────────────────────────────────┼──────────────────┼──────────────────────────┼───────┼─────────────────────┤");
    for row in &rows {
        println!(
            "│ {:<36} │ {:<16} │ {:<24} │ {:>5} │ {:<19} │",
            row.id,
            truncate(&row.workflow, 16),
            row.status.as_str(),
            row.step_count,
            row.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("└──────────────────────────────────────┴──────────────────┴──────────────────────────┴───────┴─────────────────────┘");
    Ok(())
}

pub async fn show(db_path: &str, id: &str, json: bool) -> Result<(), String> {
    let execution = fetch(db_path, id).await?;
    if json {
        return print_serialized(&execution);
    }

    println!("Execution {} ({})", execution.id, execution.workflow);
    println!("   status: {}", execution.status);
    println!("   started: {}", execution.started_at.to_rfc3339());
    if let Some(ended) = execution.ended_at {
        println!("   ended: {}", ended.to_rfc3339());
    }
    if let Some(reason) = &execution.failure {
        println!("   failure: {}", reason);
    }
    println!();

    println!("History:");
    for entry in &execution.history {
        println!(
            "   {} {:<24} {:<20} {}{}",
            entry.at.format("%H:%M:%S%.3f"),
            entry.step,
            entry.status.as_str(),
            entry.agent.as_deref().unwrap_or("-"),
            entry
                .note
                .as_ref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default()
        );
    }

    let artifacts = execution.context.artifacts();
    if !artifacts.is_empty() {
        println!();
        println!("Artifacts:");
        for (key, result) in artifacts {
            println!("   {} by {}: {}", key, result.agent, result.summary);
        }
    }
    Ok(())
}
