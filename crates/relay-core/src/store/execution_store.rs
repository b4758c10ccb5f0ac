use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::OrchestratorError;
use crate::models::{ContextDisposition, ExecutionStatus, WorkflowExecution};

/// One row of the execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub id: String,
    pub workflow: String,
    pub status: ExecutionStatus,
    pub disposition: String,
    pub step_count: usize,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Archive of finished executions. The full record is stored as JSON.
#[derive(Clone)]
pub struct ExecutionStore {
    db: Database,
}

impl ExecutionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the archived record of an execution.
    pub async fn archive(&self, execution: &WorkflowExecution) -> Result<(), OrchestratorError> {
        let record = serde_json::to_string(execution)
            .map_err(|e| OrchestratorError::Storage(format!("Failed to encode execution: {}", e)))?;
        let id = execution.id.clone();
        let workflow = execution.workflow.clone();
        let status = execution.status.as_str();
        let disposition = disposition_label(execution.context.disposition());
        let step_count = execution.steps.len() as i64;
        let started_at = execution.started_at.timestamp_millis();
        let ended_at = execution.ended_at.map(|t| t.timestamp_millis());

        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO workflow_executions \
                     (id, workflow, status, disposition, step_count, started_at, ended_at, record) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        id,
                        workflow,
                        status,
                        disposition,
                        step_count,
                        started_at,
                        ended_at,
                        record,
                    ],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!("[ExecutionStore] Archived execution {}", execution.id);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkflowExecution>, OrchestratorError> {
        let id = id.to_string();
        let record: Option<String> = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT record FROM workflow_executions WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        record
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    OrchestratorError::Storage(format!("Failed to decode execution: {}", e))
                })
            })
            .transpose()
    }

    /// Most recent executions first.
    pub async fn list(&self, limit: usize) -> Result<Vec<ExecutionSummary>, OrchestratorError> {
        let limit = limit as i64;
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow, status, disposition, step_count, started_at, ended_at \
                     FROM workflow_executions ORDER BY started_at DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], |row| Ok(row_to_summary(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, OrchestratorError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "DELETE FROM workflow_executions WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(n > 0)
            })
            .await
    }
}

fn disposition_label(disposition: &ContextDisposition) -> &'static str {
    match disposition {
        ContextDisposition::Active => "active",
        ContextDisposition::Archived => "archived",
        ContextDisposition::RetainedFailed { .. } => "retained_failed",
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> ExecutionSummary {
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());
    let status: String = row.get(2).unwrap_or_default();

    ExecutionSummary {
        id: row.get(0).unwrap_or_default(),
        workflow: row.get(1).unwrap_or_default(),
        status: ExecutionStatus::from_str(&status).unwrap_or(ExecutionStatus::Running),
        disposition: row.get(3).unwrap_or_default(),
        step_count: row.get::<_, i64>(4).unwrap_or(0) as usize,
        started_at: to_dt(row.get(5).ok()).unwrap_or_else(Utc::now),
        ended_at: to_dt(row.get(6).unwrap_or(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionMetrics, FeatureSpec, WorkflowContext};

    fn execution(id: &str, started_ms: i64, status: ExecutionStatus) -> WorkflowExecution {
        let mut context = WorkflowContext::new(FeatureSpec::new("F", "f"));
        if status.is_success() {
            context.mark_archived();
        } else {
            context.mark_failed("step 'b' failed");
        }
        let started_at = Utc.timestamp_millis_opt(started_ms).single().unwrap();
        WorkflowExecution {
            id: id.into(),
            workflow: "wf".into(),
            started_at,
            ended_at: Some(started_at),
            status,
            steps: Vec::new(),
            history: Vec::new(),
            metrics: ExecutionMetrics::default(),
            context,
            escalation: None,
            failure: None,
        }
    }

    #[tokio::test]
    async fn test_archive_get_list_delete() {
        let store = ExecutionStore::new(Database::open_in_memory().unwrap());
        store
            .archive(&execution("old", 1_000, ExecutionStatus::Succeeded))
            .await
            .unwrap();
        store
            .archive(&execution("new", 2_000, ExecutionStatus::FailedAndCompensated))
            .await
            .unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed[0].status, ExecutionStatus::FailedAndCompensated);
        assert_eq!(listed[0].disposition, "retained_failed");
        assert_eq!(listed[1].disposition, "archived");
        assert_eq!(store.list(1).await.unwrap().len(), 1);

        let fetched = store.get("new").await.unwrap().unwrap();
        assert_eq!(fetched.workflow, "wf");
        assert!(matches!(
            fetched.context.disposition(),
            ContextDisposition::RetainedFailed { .. }
        ));

        assert!(store.delete("old").await.unwrap());
        assert!(!store.delete("old").await.unwrap());
        assert!(store.get("old").await.unwrap().is_none());
    }
}
