//! Job executor - runs every matrix cell of one job

use crate::{
    cache::{CacheEntry, CacheKey, CacheStore},
    core::{
        trigger::EventContext, CacheStatus, CellResult, CellStatus, Job, JobResult, JobStatus,
        MatrixCell, RunContext, Step, StepAction, StepRecord, StepStatus, UpstreamResults,
        Workflow,
    },
    execution::{
        gate::{self, GateDecision},
        runner::{NoopSink, OutputSink, ResolvedStep, RunnerError, StepRunner},
        workdir,
    },
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Actions that only prepare a hosted runner and do nothing locally
pub const BUILTIN_ACTIONS: &[&str] = &["actions/checkout", "actions/setup-python"];

/// Executes jobs with a step runner
pub struct JobExecutor<R> {
    runner: Arc<R>,
    cache: Option<Arc<dyn CacheStore>>,
    sink: Arc<dyn OutputSink>,
    workspace: PathBuf,

    /// `uses:` reference -> command template
    actions: Arc<BTreeMap<String, String>>,

    /// Workflow-level env
    env: Arc<BTreeMap<String, String>>,

    /// Explicit secrets; others come from the process env
    secrets: Arc<HashMap<String, String>>,
}

impl<R> Clone for JobExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            cache: self.cache.clone(),
            sink: self.sink.clone(),
            workspace: self.workspace.clone(),
            actions: self.actions.clone(),
            env: self.env.clone(),
            secrets: self.secrets.clone(),
        }
    }
}

/// Where a cell's cache lives and what happened when reading it
struct CachePlan {
    status: CacheStatus,
    key: Option<CacheKey>,
    dir: PathBuf,
}

impl<R: StepRunner + 'static> JobExecutor<R> {
    pub fn new(runner: R, workspace: impl Into<PathBuf>) -> Self {
        Self {
            runner: Arc::new(runner),
            cache: None,
            sink: Arc::new(NoopSink),
            workspace: workspace.into(),
            actions: Arc::new(BTreeMap::new()),
            env: Arc::new(BTreeMap::new()),
            secrets: Arc::new(HashMap::new()),
        }
    }

    pub fn with_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_actions(mut self, actions: BTreeMap<String, String>) -> Self {
        self.actions = Arc::new(actions);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn with_secrets(mut self, secrets: HashMap<String, String>) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    /// Copy bound to a workflow's actions table and env
    pub fn for_workflow(&self, workflow: &Workflow) -> Self {
        self.clone()
            .with_actions(workflow.actions.clone())
            .with_env(workflow.env.clone())
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Variables for a job, optionally inside one matrix cell
    fn context(&self, job: &Job, event: &EventContext, cell: &MatrixCell) -> RunContext {
        let mut context = RunContext::new(event).with_matrix(cell);
        context.secrets = (*self.secrets).clone();
        context.with_env(&self.env).with_env(&job.env)
    }

    /// Gate a job whose dependencies have terminated
    pub fn gate(&self, job: &Job, upstream: &UpstreamResults, event: &EventContext) -> GateDecision {
        let context = self
            .context(job, event, &MatrixCell::default())
            .with_upstream_ok(job.dependencies_satisfied(upstream));
        gate::decide(job, upstream, &context)
    }

    /// Run a job: gate it, run every cell, and collapse the outcomes
    pub async fn run_job(&self, job: &Job, upstream: &UpstreamResults, event: &EventContext) -> JobResult {
        if let GateDecision::Skip(reason) = self.gate(job, upstream, event) {
            info!("Skipping job '{}': {}", job.id, reason);
            return JobResult::skipped(&job.id, reason);
        }

        let started_at = Utc::now();
        let cells = job.cells();
        info!("Running job '{}' ({} cell(s))", job.id, cells.len());

        let limiter = job.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let shared_job = Arc::new(job.clone());
        let shared_event = Arc::new(event.clone());

        let mut handles = Vec::with_capacity(cells.len());
        for (index, cell) in cells.into_iter().enumerate() {
            let executor = self.clone();
            let job = shared_job.clone();
            let event = shared_event.clone();
            let limiter = limiter.clone();
            let task_cell = cell.clone();
            let handle = tokio::spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                executor.run_cell(&job, &event, task_cell, index).await
            });
            handles.push((cell, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (cell, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Cell {} of job '{}' aborted: {}", cell, job.id, e);
                    results.push(CellResult {
                        cell,
                        status: CellStatus::Failure {
                            step: String::new(),
                            error: format!("cell task aborted: {}", e),
                        },
                        steps: Vec::new(),
                        cache: CacheStatus::Disabled,
                        cache_key: None,
                        duration_ms: 0,
                    });
                }
            }
        }

        aggregate(&job.id, results, started_at)
    }

    async fn run_cell(
        &self,
        job: &Job,
        event: &EventContext,
        cell: MatrixCell,
        index: usize,
    ) -> CellResult {
        let started = Instant::now();
        let label = cell.to_string();
        let context = self.context(job, event, &cell);

        let cell_dir = workdir::cell_workdir(&self.workspace, &job.id, index);
        if let Err(e) = workdir::prepare(&self.workspace, &cell_dir).await {
            error!("Cannot prepare {} for job '{}' {}: {}", cell_dir.display(), job.id, label, e);
            return CellResult {
                cell,
                status: CellStatus::Failure {
                    step: String::new(),
                    error: format!("cannot prepare working directory: {}", e),
                },
                steps: Vec::new(),
                cache: CacheStatus::Disabled,
                cache_key: None,
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }
        debug!("Job '{}' {} runs in {}", job.id, label, cell_dir.display());

        let plan = self.restore_cache(job, &context, &cell_dir).await;

        let mut records = Vec::new();
        let outcome = tokio::time::timeout(
            job.timeout,
            self.run_steps(job, &context, &label, &cell_dir, &mut records),
        )
        .await;

        let status = match outcome {
            Ok(Ok(())) => CellStatus::Success,
            Ok(Err((step, error))) => CellStatus::Failure { step, error },
            Err(_) => {
                warn!(
                    "Job '{}' cell {} timed out after {}s",
                    job.id,
                    label,
                    job.timeout.as_secs()
                );
                CellStatus::TimedOut {
                    after_secs: job.timeout.as_secs(),
                }
            }
        };

        if let Some(plan) = &plan {
            if status.is_success() && plan.status == CacheStatus::Miss {
                if let Some(key) = &plan.key {
                    self.save_cache(key, plan.dir.clone()).await;
                }
            }
        }

        CellResult {
            cell,
            status,
            steps: records,
            cache: plan.as_ref().map_or(CacheStatus::Disabled, |p| p.status),
            cache_key: plan.and_then(|p| p.key).map(|k| k.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run steps in order; the error names the step that stopped the cell
    async fn run_steps(
        &self,
        job: &Job,
        context: &RunContext,
        label: &str,
        workdir: &Path,
        records: &mut Vec<StepRecord>,
    ) -> Result<(), (String, String)> {
        for step in &job.steps {
            let started = Instant::now();
            let name = context.render(&step.name);

            let result = match self.resolve_step(step, context, label, workdir) {
                Ok(resolved) => {
                    debug!("Job '{}' {} step '{}'", job.id, label, resolved.name);
                    self.runner.run(&resolved, self.sink.as_ref()).await
                }
                Err(e) => Err(e),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => records.push(StepRecord {
                    name,
                    status: StepStatus::Success,
                    error: None,
                    duration_ms,
                }),
                Err(e) if step.continue_on_error => {
                    warn!("Step '{}' failed but continues: {}", name, e);
                    records.push(StepRecord {
                        name,
                        status: StepStatus::FailedIgnored,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                }
                Err(e) => {
                    warn!("Step '{}' of job '{}' {} failed: {}", name, job.id, label, e);
                    records.push(StepRecord {
                        name: name.clone(),
                        status: StepStatus::Failed,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    return Err((name, e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Render a step's templates and resolve `uses:` to a command
    fn resolve_step(
        &self,
        step: &Step,
        context: &RunContext,
        label: &str,
        workdir: &Path,
    ) -> Result<ResolvedStep, RunnerError> {
        let mut scope = context.clone();

        let command = match &step.action {
            StepAction::Run(command) => {
                scope.extend_env(&step.env);
                Some(scope.render(command))
            }
            StepAction::Uses(reference) => {
                scope.inputs = step
                    .with
                    .iter()
                    .map(|(k, v)| (k.clone(), context.render(v)))
                    .collect();
                scope.extend_env(&step.env);

                let name = step.action_name().unwrap_or(reference.as_str());
                if BUILTIN_ACTIONS.contains(&name) {
                    None
                } else if let Some(template) = self
                    .actions
                    .get(reference)
                    .or_else(|| self.actions.get(name))
                {
                    Some(scope.render(template))
                } else {
                    return Err(RunnerError::UnsupportedAction(reference.clone()));
                }
            }
        };

        let working_dir = match &step.working_directory {
            Some(dir) => workdir.join(scope.render(dir)),
            None => workdir.to_path_buf(),
        };

        Ok(ResolvedStep {
            name: scope.render(&step.name),
            command,
            env: scope.env,
            working_dir,
            cell: label.to_string(),
        })
    }

    /// Look the cell's key up and restore a hit; cache errors never fail the cell
    ///
    /// Manifests are hashed from the workspace; the cached directory lives
    /// in the cell's own working directory.
    async fn restore_cache(&self, job: &Job, context: &RunContext, workdir: &Path) -> Option<CachePlan> {
        let config = job.cache.as_ref()?;
        let store = self.cache.as_ref()?;
        let dir = workdir.join(context.render(&config.path));

        let key = match CacheKey::for_cell(config, context, &self.workspace) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot derive cache key for job '{}': {}", job.id, e);
                return Some(CachePlan {
                    status: CacheStatus::Unavailable,
                    key: None,
                    dir,
                });
            }
        };

        let status = match store.get(&key).await {
            Ok(Some(entry)) => {
                let target = dir.clone();
                let restored = tokio::task::spawn_blocking(move || entry.restore(&target)).await;
                match restored {
                    Ok(Ok(())) => {
                        info!("Cache hit: {}", key);
                        CacheStatus::Hit
                    }
                    Ok(Err(e)) => {
                        warn!("Failed to restore cache {}: {}", key, e);
                        CacheStatus::Unavailable
                    }
                    Err(e) => {
                        warn!("Failed to restore cache {}: {}", key, e);
                        CacheStatus::Unavailable
                    }
                }
            }
            Ok(None) => {
                info!("Cache miss: {}", key);
                CacheStatus::Miss
            }
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", key, e);
                CacheStatus::Unavailable
            }
        };

        Some(CachePlan {
            status,
            key: Some(key),
            dir,
        })
    }

    async fn save_cache(&self, key: &CacheKey, dir: PathBuf) {
        let Some(store) = &self.cache else {
            return;
        };

        let entry = match tokio::task::spawn_blocking(move || CacheEntry::snapshot(&dir)).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => {
                warn!("Failed to snapshot cache {}: {}", key, e);
                return;
            }
            Err(e) => {
                warn!("Failed to snapshot cache {}: {}", key, e);
                return;
            }
        };

        match store.put(key, entry).await {
            Ok(()) => debug!("Saved cache {}", key),
            Err(e) => warn!("Failed to save cache {}: {}", key, e),
        }
    }
}

/// Collapse cell results into one job result
///
/// Success if every cell succeeded; TimedOut if every unsuccessful cell
/// timed out; Failure otherwise.
fn aggregate(job_id: &str, cells: Vec<CellResult>, started_at: chrono::DateTime<Utc>) -> JobResult {
    let unsuccessful: Vec<&CellResult> = cells.iter().filter(|c| !c.status.is_success()).collect();

    let status = if unsuccessful.is_empty() {
        JobStatus::Success
    } else if unsuccessful
        .iter()
        .all(|c| matches!(c.status, CellStatus::TimedOut { .. }))
    {
        JobStatus::TimedOut
    } else {
        JobStatus::Failure
    };

    let error = unsuccessful.first().map(|c| {
        let what = match &c.status {
            CellStatus::Failure { step, error } => format!("step '{}' failed: {}", step, error),
            CellStatus::TimedOut { after_secs } => format!("timed out after {}s", after_secs),
            CellStatus::Success => String::new(),
        };
        if c.cell.is_empty() {
            what
        } else {
            format!("cell {}: {}", c.cell, what)
        }
    });

    match status {
        JobStatus::Success => info!("Job '{}' succeeded", job_id),
        _ => warn!(
            "Job '{}' ended with {} ({} of {} cell(s) unsuccessful)",
            job_id,
            status,
            unsuccessful.len(),
            cells.len()
        ),
    }

    JobResult {
        job_id: job_id.to_string(),
        status,
        cells,
        skip_reason: None,
        error,
        started_at: Some(started_at),
        finished_at: Utc::now(),
    }
}
