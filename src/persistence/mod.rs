//! Run history
//!
//! Only summaries of finished runs persist across runs; job records are
//! discarded with the run.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::Workflow;
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Summary of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub workflow_name: String,

    pub status: ExecutionStatus,

    /// `push`, `pull_request` or `schedule`
    pub event_name: String,

    /// Full ref of the event, empty for schedules
    pub git_ref: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,
}

/// Trait for history backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary, replacing any summary with the same id
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of a workflow, newest first
    async fn list_runs(&self, workflow_name: &str, limit: usize) -> Result<Vec<RunSummary>>;

    /// Runs of every workflow, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// Names of workflows with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;

    async fn count_runs(&self, workflow_name: &str) -> Result<usize>;
}

/// In-memory history (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    fn newest_first(mut runs: Vec<RunSummary>, limit: usize) -> Vec<RunSummary> {
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        runs
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_name: &str, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let matching = runs
            .values()
            .filter(|r| r.workflow_name == workflow_name)
            .cloned()
            .collect();
        Ok(Self::newest_first(matching, limit))
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(Self::newest_first(runs.values().cloned().collect(), limit))
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.workflow_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn count_runs(&self, workflow_name: &str) -> Result<usize> {
        let runs = self.runs.read().await;
        Ok(runs.values().filter(|r| r.workflow_name == workflow_name).count())
    }
}

/// Create a summary from a finished run
pub fn create_summary(workflow: &Workflow, report: &RunReport) -> RunSummary {
    let (event_name, git_ref) = report
        .event
        .as_ref()
        .map(|e| (e.event_name.clone(), e.git_ref.clone()))
        .unwrap_or_default();

    RunSummary {
        run_id: report.run_id,
        workflow_name: report.workflow.clone(),
        status: report.status,
        event_name,
        git_ref,
        started_at: report.started_at.unwrap_or_else(Utc::now),
        completed_at: report.completed_at,
        total_jobs: workflow.state.total_jobs,
        succeeded_jobs: workflow.state.succeeded_jobs,
        failed_jobs: workflow.state.failed_jobs,
        skipped_jobs: workflow.state.skipped_jobs,
    }
}
