//! Test utilities for gatekeep workflows

use async_trait::async_trait;
use gatekeep::cache::{CacheStore, InMemoryCacheStore};
use gatekeep::core::config::WorkflowConfig;
use gatekeep::core::{
    preset, CellStatus, Event, ExecutionStatus, JobResult, JobStatus, StepStatus, Workflow,
};
use gatekeep::execution::{
    EngineError, ExecutionEngine, ExecutionEvent, JobExecutor, OutputSink, ResolvedStep,
    RunReport, RunnerError, SchedulingStrategy, StepRunner,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Step runner driven by command substrings instead of a shell
///
/// Steps whose command contains a `fail` needle exit 1, `delay` needles
/// sleep first, and `artifact` needles drop a file under the step's
/// working directory. Clones share the record of resolved steps.
#[derive(Default, Clone)]
pub struct ScriptedRunner {
    fail: Vec<String>,
    delay: Vec<(String, Duration)>,
    artifacts: Vec<(String, PathBuf)>,
    seen: Arc<Mutex<Vec<ResolvedStep>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, needle: &str) -> Self {
        self.fail.push(needle.to_string());
        self
    }

    pub fn delaying(mut self, needle: &str, delay: Duration) -> Self {
        self.delay.push((needle.to_string(), delay));
        self
    }

    pub fn writing(mut self, needle: &str, relative: impl Into<PathBuf>) -> Self {
        self.artifacts.push((needle.to_string(), relative.into()));
        self
    }

    pub fn seen(&self) -> Vec<ResolvedStep> {
        self.seen.lock().unwrap().clone()
    }

    /// Commands run for one matrix cell label, e.g. `(3.9, ubuntu)`
    pub fn commands_for_cell(&self, cell: &str) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter(|s| s.cell == cell)
            .filter_map(|s| s.command)
            .collect()
    }

    pub fn ran(&self, needle: &str) -> usize {
        self.seen()
            .iter()
            .filter(|s| s.command.as_deref().is_some_and(|c| c.contains(needle)))
            .count()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(&self, step: &ResolvedStep, _sink: &dyn OutputSink) -> Result<(), RunnerError> {
        self.seen.lock().unwrap().push(step.clone());

        let Some(command) = step.command.as_deref() else {
            return Ok(());
        };

        for (needle, delay) in &self.delay {
            if command.contains(needle.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        for (needle, relative) in &self.artifacts {
            if command.contains(needle.as_str()) {
                let target = step.working_dir.join(relative);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| RunnerError::Io(e.to_string()))?;
                }
                std::fs::write(&target, command).map_err(|e| RunnerError::Io(e.to_string()))?;
            }
        }
        if self.fail.iter().any(|needle| command.contains(needle.as_str())) {
            return Err(RunnerError::NonZeroExit(1));
        }
        Ok(())
    }
}

/// Parse a workflow from YAML
pub fn workflow_from_yaml(yaml: &str) -> Workflow {
    WorkflowConfig::from_yaml(yaml)
        .and_then(|c| c.to_workflow())
        .unwrap_or_else(|e| panic!("Failed to parse workflow YAML: {:#}", e))
}

/// The bundled lint / unit / deploy workflow
pub fn bundled_workflow() -> Workflow {
    workflow_from_yaml(preset::PYTHON_PACKAGE_YAML)
}

/// Result of one engine run, with everything the engine emitted
pub struct WorkflowTestResult {
    pub workflow: Workflow,
    pub report: RunReport,
    pub events: Vec<ExecutionEvent>,
}

impl WorkflowTestResult {
    pub fn job(&self, id: &str) -> &JobResult {
        self.report
            .job(id)
            .unwrap_or_else(|| panic!("Job '{}' not in report: {:?}", id, self.report.jobs))
    }

    pub fn started_jobs(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::JobStarted { job_id, .. } => Some(job_id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Run `workflow` for `event` with the given executor
pub async fn run_with_executor(
    mut workflow: Workflow,
    event: &Event,
    executor: JobExecutor<ScriptedRunner>,
    strategy: SchedulingStrategy,
) -> Result<WorkflowTestResult, EngineError> {
    let engine = ExecutionEngine::new(executor, strategy);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;

    let report = engine.execute(&mut workflow, event).await?;
    let events = events.lock().unwrap().clone();

    Ok(WorkflowTestResult {
        workflow,
        report,
        events,
    })
}

/// Run `workflow` in a throwaway workspace with no cache
///
/// Keep a clone of `runner` to inspect the steps it ran.
pub async fn run_workflow(workflow: Workflow, event: &Event, runner: ScriptedRunner) -> WorkflowTestResult {
    let workspace = tempfile::tempdir().unwrap();
    let executor = JobExecutor::new(runner, workspace.path());
    run_with_executor(workflow, event, executor, SchedulingStrategy::Parallel)
        .await
        .unwrap()
}

/// Executor sharing `cache`, rooted at `workspace`
pub fn cached_executor(
    runner: ScriptedRunner,
    workspace: &Path,
    cache: Arc<InMemoryCacheStore>,
) -> JobExecutor<ScriptedRunner> {
    let store: Arc<dyn CacheStore> = cache;
    JobExecutor::new(runner, workspace).with_cache(store)
}

/// Assert the run ended with `status`
pub fn assert_run_status(result: &WorkflowTestResult, status: ExecutionStatus) {
    assert_eq!(
        result.report.status, status,
        "Run should be {:?}, jobs: {:?}",
        status, result.report.jobs
    );
}

/// Assert a job's collapsed status
pub fn assert_job_status(result: &WorkflowTestResult, job_id: &str, status: JobStatus) {
    assert_eq!(
        result.job(job_id).status,
        status,
        "Job '{}' result: {:?}",
        job_id,
        result.job(job_id)
    );
}

/// Cells of a job that did not succeed
pub fn failed_cells(result: &WorkflowTestResult, job_id: &str) -> Vec<String> {
    result
        .job(job_id)
        .cells
        .iter()
        .filter(|c| !matches!(c.status, CellStatus::Success))
        .map(|c| c.cell.to_string())
        .collect()
}

/// Step statuses of the first cell of a job, by step name
pub fn step_statuses(result: &WorkflowTestResult, job_id: &str) -> Vec<(String, StepStatus)> {
    result
        .job(job_id)
        .cells
        .first()
        .map(|c| c.steps.iter().map(|s| (s.name.clone(), s.status)).collect())
        .unwrap_or_default()
}
