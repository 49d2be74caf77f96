//! Persistence boundary for runs and execution logs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{WorkflowError, WorkflowResult};
use crate::model::{RunStatus, WorkflowLogEntry, WorkflowRun};

/// Storage backend for run records and their append-only logs. The engine
/// only ever appends logs and moves a run's status forward; ordering and
/// terminal-once are enforced by the run coordinator, not the store.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &WorkflowRun) -> WorkflowResult<()>;

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> WorkflowResult<()>;

    async fn append_log(&self, entry: &WorkflowLogEntry) -> WorkflowResult<()>;

    async fn list_runs(&self, workflow_id: &str) -> WorkflowResult<Vec<WorkflowRun>>;

    async fn get_logs(&self, run_id: &str) -> WorkflowResult<Vec<WorkflowLogEntry>>;
}

/// In-memory store, used by tests and as a default for embedders that do
/// not need durability.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<Vec<WorkflowRun>>,
    logs: RwLock<Vec<WorkflowLogEntry>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: &WorkflowRun) -> WorkflowResult<()> {
        self.runs.write().push(run.clone());
        Ok(())
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> WorkflowResult<()> {
        let mut runs = self.runs.write();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn append_log(&self, entry: &WorkflowLogEntry) -> WorkflowResult<()> {
        self.logs.write().push(entry.clone());
        Ok(())
    }

    async fn list_runs(&self, workflow_id: &str) -> WorkflowResult<Vec<WorkflowRun>> {
        Ok(self
            .runs
            .read()
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn get_logs(&self, run_id: &str) -> WorkflowResult<Vec<WorkflowLogEntry>> {
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(id: &str, workflow_id: &str) -> WorkflowRun {
        WorkflowRun {
            id: id.to_string(),
            workflow_id: workflow_id.to_string(),
            environment_id: None,
            status: RunStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_status_update_touches_updated_at() {
        let store = MemoryRunStore::new();
        store.create_run(&run("r1", "w1")).await.unwrap();
        let before = store.list_runs("w1").await.unwrap()[0].updated_at;

        store
            .update_run_status("r1", RunStatus::Completed)
            .await
            .unwrap();

        let after = &store.list_runs("w1").await.unwrap()[0];
        assert_eq!(after.status, RunStatus::Completed);
        assert!(after.updated_at >= before);
    }

    #[tokio::test]
    async fn test_update_unknown_run_fails() {
        let store = MemoryRunStore::new();
        let err = store
            .update_run_status("missing", RunStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_logs_filtered_by_run() {
        let store = MemoryRunStore::new();
        for run_id in ["r1", "r2", "r1"] {
            store
                .append_log(&WorkflowLogEntry {
                    timestamp: Utc::now(),
                    run_id: run_id.to_string(),
                    branch: 0,
                    node_id: None,
                    node_type: None,
                    message: "m".to_string(),
                    data: None,
                    debug: false,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.get_logs("r1").await.unwrap().len(), 2);
        assert_eq!(store.get_logs("r2").await.unwrap().len(), 1);
    }
}
