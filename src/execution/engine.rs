//! Main execution engine - orchestrates an entire workflow run

use crate::{
    core::{
        preset::{LINT_JOB, UNIT_JOB},
        trigger::{Event, EventContext, TriggerOutcome},
        ExecutionStatus, JobResult, JobState, JobStatus, UpstreamResults, Workflow,
    },
    execution::{
        gate::{self, GateDecision},
        runner::StepRunner,
        scheduler::{ExecutionScheduler, SchedulingStrategy},
        JobExecutor,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
        event: EventContext,
        total_jobs: usize,
    },
    /// The event matched no trigger; nothing runs
    NotTriggered {
        run_id: Uuid,
        workflow: String,
        event: String,
    },
    JobStarted {
        job_id: String,
        cells: usize,
    },
    /// Emitted for every job once it is terminal, including skipped ones
    JobFinished {
        result: JobResult,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow stalled with pending jobs: {}", .0.join(", "))]
    Stalled(Vec<String>),

    #[error("job task failed: {0}")]
    JobPanicked(String),
}

/// Outcome of one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventContext>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Job results in the order the jobs finished
    pub jobs: Vec<JobResult>,
}

impl RunReport {
    pub fn job(&self, id: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.job_id == id)
    }

    pub fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.job(id).map(|j| j.status)
    }

    /// Ids of jobs that actually ran, in finishing order
    pub fn executed_jobs(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|j| j.status != JobStatus::Skipped)
            .map(|j| j.job_id.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::NotTriggered
        )
    }

    /// Whether this run opens the release gate
    ///
    /// `None` when the run was not triggered or has no lint and unit jobs.
    pub fn release_gate(&self) -> Option<bool> {
        let event = self.event.as_ref()?;
        self.job(LINT_JOB)?;
        self.job(UNIT_JOB)?;
        let upstream: UpstreamResults = self
            .jobs
            .iter()
            .map(|j| (j.job_id.clone(), j.status))
            .collect();
        Some(gate::should_deploy(event, &upstream))
    }
}

/// Main workflow execution engine
pub struct ExecutionEngine<R> {
    scheduler: ExecutionScheduler,
    executor: JobExecutor<R>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl<R: StepRunner + 'static> ExecutionEngine<R> {
    pub fn new(executor: JobExecutor<R>, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn executor(&self) -> &JobExecutor<R> {
        &self.executor
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Run a workflow for one event
    pub async fn execute(&self, workflow: &mut Workflow, event: &Event) -> Result<RunReport, EngineError> {
        let run_id = workflow.state.run_id;

        let event_ctx = match workflow.evaluate_trigger(event) {
            TriggerOutcome::Matched(ctx) => ctx,
            TriggerOutcome::NotMet => {
                info!("Event {} does not trigger workflow '{}'", event, workflow.name);
                workflow.state.not_triggered();
                self.emit_event(ExecutionEvent::NotTriggered {
                    run_id,
                    workflow: workflow.name.clone(),
                    event: event.to_string(),
                })
                .await;
                return Ok(report(workflow, None, Vec::new()));
            }
        };

        info!("Starting workflow run: {} ({}) for {}", workflow.name, run_id, event);
        workflow.state.start(workflow.jobs.len());
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            workflow: workflow.name.clone(),
            event: event_ctx.clone(),
            total_jobs: workflow.jobs.len(),
        })
        .await;

        let executor = self.executor.for_workflow(workflow);
        let mut in_flight: JoinSet<JobResult> = JoinSet::new();
        let mut finished = Vec::new();

        loop {
            let mut progressed = false;

            for job_id in self.scheduler.next_jobs(workflow) {
                let upstream = workflow.upstream_results();
                let Some(job) = workflow.job_mut(&job_id) else {
                    continue;
                };
                progressed = true;

                // Gated jobs go PENDING -> SKIPPED without running
                if let GateDecision::Skip(reason) = executor.gate(job, &upstream, &event_ctx) {
                    info!("Skipping job '{}': {}", job_id, reason);
                    let result = JobResult::skipped(&job_id, reason);
                    job.state = JobState::from_result(&result);
                    self.emit_event(ExecutionEvent::JobFinished {
                        result: result.clone(),
                    })
                    .await;
                    finished.push(result);
                    continue;
                }

                job.state = JobState::Running {
                    started_at: Utc::now(),
                };
                let job = job.clone();
                self.emit_event(ExecutionEvent::JobStarted {
                    job_id: job_id.clone(),
                    cells: job.cells().len(),
                })
                .await;

                let executor = executor.clone();
                let ctx = event_ctx.clone();
                in_flight.spawn(async move { executor.run_job(&job, &upstream, &ctx).await });
            }

            workflow.update_counts();

            if in_flight.is_empty() {
                if workflow.is_complete() {
                    break;
                }
                if progressed {
                    continue;
                }
                let pending: Vec<String> = workflow
                    .execution_order()
                    .iter()
                    .filter(|id| workflow.job(id).is_some_and(|j| !j.state.is_terminal()))
                    .cloned()
                    .collect();
                error!("No jobs ready to run and none running - workflow stalled");
                workflow.state.fail();
                return Err(EngineError::Stalled(pending));
            }

            match in_flight.join_next().await {
                Some(Ok(result)) => {
                    if let Some(job) = workflow.job_mut(&result.job_id) {
                        job.state = JobState::from_result(&result);
                    }
                    self.emit_event(ExecutionEvent::JobFinished {
                        result: result.clone(),
                    })
                    .await;
                    finished.push(result);
                }
                Some(Err(e)) => {
                    error!("Job task failed: {}", e);
                    workflow.state.fail();
                    return Err(EngineError::JobPanicked(e.to_string()));
                }
                None => {}
            }
            workflow.update_counts();
        }

        let status = if workflow.has_failed() {
            workflow.state.fail();
            ExecutionStatus::Failed
        } else {
            workflow.state.complete();
            ExecutionStatus::Completed
        };

        info!("Workflow run finished: {} - {:?}", workflow.name, status);
        self.emit_event(ExecutionEvent::RunCompleted { run_id, status }).await;

        Ok(report(workflow, Some(event_ctx), finished))
    }
}

fn report(workflow: &Workflow, event: Option<EventContext>, jobs: Vec<JobResult>) -> RunReport {
    RunReport {
        run_id: workflow.state.run_id,
        workflow: workflow.name.clone(),
        status: workflow.state.status,
        event,
        started_at: workflow.state.started_at,
        completed_at: workflow.state.completed_at,
        jobs,
    }
}
